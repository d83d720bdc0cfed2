// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 Qbitel Inc.

//! Core system control: reset, RAM clear and firmware handoff

use crate::traits::{Handoff, SystemControl};
use core::ptr::{read_volatile, write_volatile};

/// Vector Table Offset Register
const SCB_VTOR: u32 = 0xE000_ED08;
/// Application Interrupt and Reset Control Register
const SCB_AIRCR: u32 = 0xE000_ED0C;
const AIRCR_VECTKEY: u32 = 0x05FA << 16;
const AIRCR_SYSRESETREQ: u32 = 1 << 2;

/// Active-low button input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ButtonPin {
    /// GPIO input data register address
    pub idr: u32,
    /// Pin mask within the register
    pub mask: u32,
}

/// STM32F2 system control
pub struct Stm32f2System {
    override_button: ButtonPin,
}

impl Stm32f2System {
    /// Create a system controller reading the override button from `override_button`
    #[must_use]
    pub const fn new(override_button: ButtonPin) -> Self {
        Self { override_button }
    }
}

impl SystemControl for Stm32f2System {
    fn read_session_flag(&self, address: u32) -> u32 {
        // SAFETY: `address` is a word in SRAM reserved for the session flag
        unsafe { read_volatile(address as *const u32) }
    }

    fn clear_session_flag(&mut self, address: u32) {
        // SAFETY: see read_session_flag
        unsafe { write_volatile(address as *mut u32, 0) }
    }

    fn override_held(&self) -> bool {
        // SAFETY: reading a GPIO input data register
        let state = unsafe { read_volatile(self.override_button.idr as *const u32) };
        state & self.override_button.mask == 0
    }

    fn reset(&mut self) -> ! {
        dsb();
        // SAFETY: requesting a system reset through the SCB
        unsafe { write_volatile(SCB_AIRCR as *mut u32, AIRCR_VECTKEY | AIRCR_SYSRESETREQ) };
        dsb();
        loop {
            core::hint::spin_loop();
        }
    }

    fn jump_to_firmware(&mut self, handoff: Handoff) -> ! {
        let vector_table = handoff.vector_table;
        // SAFETY: `vector_table` points at the verified firmware vector table.
        // Word 0 is the initial stack pointer and word 1 the reset handler.
        let (initial_sp, reset) = unsafe {
            (
                read_volatile(vector_table as *const u32),
                read_volatile((vector_table + 4) as *const u32),
            )
        };
        let (ram_start, ram_end) = handoff.clear_ram.unwrap_or((0, 0));

        dsb();
        isb();

        // SAFETY: every value the handoff needs is in registers, and the
        // routine below never returns to this frame.
        unsafe {
            enter_firmware(&Entry {
                vtor: SCB_VTOR,
                vector_table,
                initial_sp,
                reset,
                set_sp: handoff.signed,
                ram_start,
                ram_end,
            })
        }
    }
}

/// Register image of the firmware handoff
struct Entry {
    vtor: u32,
    vector_table: u32,
    initial_sp: u32,
    reset: u32,
    /// Unsigned firmware keeps the bootloader's stack pointer
    set_sp: bool,
    ram_start: u32,
    ram_end: u32,
}

cfg_if::cfg_if! {
    if #[cfg(target_arch = "arm")] {
        /// Zero `[ram_start, ram_end)`, relocate the vector table, switch
        /// stacks and branch to the reset handler
        ///
        /// Runs entirely from registers: the cleared range may hold the
        /// current stack.
        #[inline(always)]
        unsafe fn enter_firmware(entry: &Entry) -> ! {
            core::arch::asm!(
                "2:",
                "cmp {start}, {end}",
                "bhs 3f",
                "str {zero}, [{start}], #4",
                "b 2b",
                "3:",
                "dsb sy",
                "str {table}, [{vtor}]",
                "isb",
                "cmp {set_sp}, #0",
                "beq 4f",
                "msr msp, {sp}",
                "4:",
                "bx {reset}",
                start = in(reg) entry.ram_start,
                end = in(reg) entry.ram_end,
                zero = in(reg) 0u32,
                table = in(reg) entry.vector_table,
                vtor = in(reg) entry.vtor,
                set_sp = in(reg) u32::from(entry.set_sp),
                sp = in(reg) entry.initial_sp,
                reset = in(reg) entry.reset,
                options(noreturn, nostack),
            )
        }
    } else {
        /// Off-target builds cannot leave the bootloader
        unsafe fn enter_firmware(entry: &Entry) -> ! {
            let _ = entry;
            loop {
                core::hint::spin_loop();
            }
        }
    }
}

#[inline(always)]
fn dsb() {
    #[cfg(target_arch = "arm")]
    // SAFETY: barrier instruction with no memory or stack effects
    unsafe {
        core::arch::asm!("dsb sy", options(nomem, nostack, preserves_flags));
    }
}

#[inline(always)]
fn isb() {
    #[cfg(target_arch = "arm")]
    // SAFETY: pipeline flush with no memory or stack effects
    unsafe {
        core::arch::asm!("isb", options(nomem, nostack, preserves_flags));
    }
}
