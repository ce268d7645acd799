//! Interrupt dispatch (§4.7, component H), grounded in the teacher's
//! `Cpu::handle_interrupts` (`cpu/mod.rs`): fixed priority VBLANK > STAT >
//! TIMER > SERIAL > JOYPAD, gated by IME and masked by IE & IF. The guest has
//! no serial interrupt vector to jump to (§1 Non-goal: link cable), so a
//! pending serial interrupt is acknowledged (its IF bit cleared) but never
//! dispatched -- it simply cannot win priority against anything with a real
//! vector.

use crate::memory::map::*;
use crate::memory::Bus;
use crate::state::{trap_reason, GuestState, HaltState};

/// T-cycle cost of servicing an interrupt (push PC + jump to vector), fixed
/// on real hardware regardless of which interrupt fires.
const INTERRUPT_SERVICE_CYCLES: u64 = 20;

pub struct InterruptController;

impl InterruptController {
    /// Checks IE & IF & IME and, if anything is pending and enabled,
    /// pushes PC, jumps to the vector, clears IME and the serviced IF bit.
    /// Returns the T-cycles spent servicing the interrupt, or 0 if nothing
    /// fired. A HALTed CPU wakes on any IE & IF match even with IME clear
    /// (the halt-without-interrupt-enable quirk is out of scope, §1).
    pub fn step(state: &mut GuestState, bus: &mut Bus) -> u64 {
        let ie = bus.ie_register;
        let if_reg = bus.io[(IF_ADDR - IO_REGISTERS_START) as usize];
        let pending = ie & if_reg & 0x1F;

        if pending == 0 {
            return 0;
        }

        if state.halt == HaltState::Halt {
            state.halt = HaltState::Running;
        }

        if !state.ime {
            return 0;
        }

        let (bit, vector) = Self::highest_priority(pending);
        state.ime = false;
        bus.io[(IF_ADDR - IO_REGISTERS_START) as usize] &= !(1 << bit);

        if let Some(vector) = vector {
            let sp = state.sp.wrapping_sub(2);
            state.sp = sp;
            let [hi, lo] = state.pc.to_be_bytes();
            bus.write_byte(sp, lo);
            bus.write_byte(sp.wrapping_add(1), hi);
            state.pc = vector;
            state.trap_reason = trap_reason::INT;
        }

        INTERRUPT_SERVICE_CYCLES
    }

    /// Resolves the bit index and vector address of the highest-priority
    /// interrupt in `pending` (already masked by IE & IF). Ties never occur
    /// since `pending` is a bitmask scanned from bit 0 upward, but the
    /// scan order itself realizes the priority table: VBLANK (bit 0) always
    /// wins over every other simultaneous request.
    fn highest_priority(pending: u8) -> (u8, Option<u16>) {
        if pending & (1 << VBLANK_INTERRUPT_BIT) != 0 {
            (VBLANK_INTERRUPT_BIT, Some(VBLANK_VECTOR))
        } else if pending & (1 << LCD_STAT_INTERRUPT_BIT) != 0 {
            (LCD_STAT_INTERRUPT_BIT, Some(LCD_STAT_VECTOR))
        } else if pending & (1 << TIMER_INTERRUPT_BIT) != 0 {
            (TIMER_INTERRUPT_BIT, Some(TIMER_VECTOR))
        } else if pending & (1 << SERIAL_INTERRUPT_BIT) != 0 {
            (SERIAL_INTERRUPT_BIT, None)
        } else {
            (JOYPAD_INTERRUPT_BIT, Some(JOYPAD_VECTOR))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh() -> (GuestState, Bus) {
        let mut rom = vec![0u8; 0x8000];
        rom[0x0147] = 0;
        let mut state = GuestState::new_at_boot_rom();
        state.sp = 0xFFFE;
        state.pc = 0x1234;
        state.ime = true;
        (state, Bus::new(rom).unwrap())
    }

    #[test]
    fn vblank_wins_over_every_other_pending_interrupt() {
        let (mut state, mut bus) = fresh();
        bus.ie_register = 0x1F;
        bus.io[(IF_ADDR - IO_REGISTERS_START) as usize] = 0x1F;
        let cycles = InterruptController::step(&mut state, &mut bus);
        assert_eq!(cycles, INTERRUPT_SERVICE_CYCLES);
        assert_eq!(state.pc, VBLANK_VECTOR);
        assert!(!state.ime);
        assert_eq!(
            bus.io[(IF_ADDR - IO_REGISTERS_START) as usize] & 1,
            0
        );
    }

    #[test]
    fn disabled_ime_blocks_dispatch_but_still_wakes_halt() {
        let (mut state, mut bus) = fresh();
        state.ime = false;
        state.halt = HaltState::Halt;
        bus.ie_register = 1 << VBLANK_INTERRUPT_BIT;
        bus.io[(IF_ADDR - IO_REGISTERS_START) as usize] = 1 << VBLANK_INTERRUPT_BIT;
        let cycles = InterruptController::step(&mut state, &mut bus);
        assert_eq!(cycles, 0);
        assert_eq!(state.halt, HaltState::Running);
        assert_eq!(state.pc, 0x1234);
    }

    #[test]
    fn serial_interrupt_is_acknowledged_but_has_no_vector() {
        let (mut state, mut bus) = fresh();
        bus.ie_register = 1 << SERIAL_INTERRUPT_BIT;
        bus.io[(IF_ADDR - IO_REGISTERS_START) as usize] = 1 << SERIAL_INTERRUPT_BIT;
        let cycles = InterruptController::step(&mut state, &mut bus);
        assert_eq!(cycles, INTERRUPT_SERVICE_CYCLES);
        assert_eq!(state.pc, 0x1234); // unchanged: no vector to jump to
        assert_eq!(
            bus.io[(IF_ADDR - IO_REGISTERS_START) as usize] & (1 << SERIAL_INTERRUPT_BIT),
            0
        );
    }

    #[test]
    fn nothing_pending_costs_zero_cycles() {
        let (mut state, mut bus) = fresh();
        bus.ie_register = 0xFF;
        let cycles = InterruptController::step(&mut state, &mut bus);
        assert_eq!(cycles, 0);
    }
}
