// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Diagnostic log for the bootloader
//!
//! The bootloader has no console. Records go into a fixed-size ring buffer
//! that survives until reset and can be inspected with a debugger, and are
//! mirrored to defmt when the `defmt` feature is enabled.
//!
//! # Security
//!
//! - Never log key material, staged firmware bytes or storage contents
//! - Fingerprints and error codes are fine: they are public

use core::fmt::{self, Write};
use heapless::String;

/// Maximum log message length
pub const MAX_LOG_MESSAGE_LEN: usize = 128;

/// Log buffer size (number of entries)
pub const LOG_BUFFER_SIZE: usize = 32;

/// Log level enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum LogLevel {
    /// Fatal paths: wipes, halts, hardware faults
    Error = 0,
    /// Rejected packets and declined prompts
    Warn = 1,
    /// State transitions
    Info = 2,
    /// Per-chunk progress
    Debug = 3,
    /// Per-packet detail
    Trace = 4,
}

impl LogLevel {
    /// Single-character tag used in formatted records
    #[must_use]
    pub const fn prefix(&self) -> char {
        match self {
            Self::Error => 'E',
            Self::Warn => 'W',
            Self::Info => 'I',
            Self::Debug => 'D',
            Self::Trace => 'T',
        }
    }
}

/// One log record
#[derive(Clone)]
pub struct LogEntry {
    /// Severity
    pub level: LogLevel,
    /// Caller supplied tick (packet counter or boot step)
    pub tick: u32,
    /// Component tag, e.g. `"session"`
    pub module: &'static str,
    /// Formatted message, truncated to [`MAX_LOG_MESSAGE_LEN`]
    pub message: String<MAX_LOG_MESSAGE_LEN>,
}

impl fmt::Display for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{:08X}] {} [{}] {}",
            self.tick,
            self.level.prefix(),
            self.module,
            self.message
        )
    }
}

impl fmt::Debug for LogEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Writer that silently truncates once the message is full
struct Truncating<'a>(&'a mut String<MAX_LOG_MESSAGE_LEN>);

impl Write for Truncating<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for c in s.chars() {
            if self.0.push(c).is_err() {
                break;
            }
        }
        Ok(())
    }
}

/// Circular log buffer
pub struct LogBuffer {
    entries: [Option<LogEntry>; LOG_BUFFER_SIZE],
    next: usize,
    len: usize,
    dropped: u32,
    min_level: LogLevel,
}

impl LogBuffer {
    /// Create an empty buffer recording `Info` and above
    #[must_use]
    pub const fn new() -> Self {
        const EMPTY: Option<LogEntry> = None;
        Self {
            entries: [EMPTY; LOG_BUFFER_SIZE],
            next: 0,
            len: 0,
            dropped: 0,
            min_level: LogLevel::Info,
        }
    }

    /// Set the least severe level that is still recorded
    pub fn set_min_level(&mut self, level: LogLevel) {
        self.min_level = level;
    }

    /// Check if a level passes the filter
    #[must_use]
    pub const fn enabled(&self, level: LogLevel) -> bool {
        (level as u8) <= (self.min_level as u8)
    }

    /// Record a formatted message
    pub fn log(&mut self, level: LogLevel, tick: u32, module: &'static str, args: fmt::Arguments<'_>) {
        if !self.enabled(level) {
            return;
        }

        let mut message = String::new();
        let _ = Truncating(&mut message).write_fmt(args);

        #[cfg(feature = "defmt")]
        defmt::println!("{=u32} {=char} [{=str}] {=str}", tick, level.prefix(), module, message.as_str());

        if self.len == LOG_BUFFER_SIZE {
            self.dropped = self.dropped.saturating_add(1);
        } else {
            self.len += 1;
        }
        self.entries[self.next] = Some(LogEntry { level, tick, module, message });
        self.next = (self.next + 1) % LOG_BUFFER_SIZE;
    }

    /// Number of retained records
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Check if nothing has been recorded
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of records overwritten because the buffer was full
    #[must_use]
    pub const fn dropped(&self) -> u32 {
        self.dropped
    }

    /// Discard every record
    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            *entry = None;
        }
        self.next = 0;
        self.len = 0;
        self.dropped = 0;
    }

    /// Iterate over records, oldest first
    pub fn iter(&self) -> impl Iterator<Item = &LogEntry> + '_ {
        let oldest = if self.len < LOG_BUFFER_SIZE { 0 } else { self.next };
        (0..self.len).filter_map(move |i| self.entries[(oldest + i) % LOG_BUFFER_SIZE].as_ref())
    }

    /// Most recent record at or above `level` severity
    #[must_use]
    pub fn last_at(&self, level: LogLevel) -> Option<&LogEntry> {
        self.iter().filter(|e| e.level <= level).last()
    }
}

impl Default for LogBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Log an error
#[macro_export]
macro_rules! log_error {
    ($buffer:expr, $tick:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Error, $tick, $module, format_args!($($arg)*))
    };
}

/// Log a warning
#[macro_export]
macro_rules! log_warn {
    ($buffer:expr, $tick:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Warn, $tick, $module, format_args!($($arg)*))
    };
}

/// Log a state transition
#[macro_export]
macro_rules! log_info {
    ($buffer:expr, $tick:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Info, $tick, $module, format_args!($($arg)*))
    };
}

/// Log debug detail
#[macro_export]
macro_rules! log_debug {
    ($buffer:expr, $tick:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Debug, $tick, $module, format_args!($($arg)*))
    };
}

/// Log trace detail
#[macro_export]
macro_rules! log_trace {
    ($buffer:expr, $tick:expr, $module:expr, $($arg:tt)*) => {
        $buffer.log($crate::log::LogLevel::Trace, $tick, $module, format_args!($($arg)*))
    };
}
