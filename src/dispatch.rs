//! Top-level dispatch loop (§4.8, component I): ties the block cache,
//! scheduler, and interrupt controller together into the teacher's
//! `Cpu::step` role, generalized from "decode and run one instruction" to
//! "run one compiled block, then let the rest of the hardware catch up".
//!
//! HALT parks the dispatcher by jumping straight to `max(inst_count + 16,
//! next_update)` rather than ticking a fixed step size (mirrors the
//! teacher's `Cpu::step` HALT branch, generalized to the scheduler's actual
//! wake-up time). A block the optimizer classified as a busy-wait
//! (`SpinKind`) is fast-forwarded the same way: rather than replaying the
//! spin body once per T-cycle until the polled register changes, the
//! dispatcher jumps `inst_count` straight to the next scheduled event and
//! lets the spin body re-evaluate against the result. Either way, the
//! scheduler and interrupt dispatcher only actually run once `inst_count`
//! has reached `next_update` (§4.7 step 5); ticks that stay under it
//! accumulate in `state.pending_ticks` so the eventual `Scheduler::advance`
//! call still sees the full elapsed time, not just the tick that crossed
//! the line.

use crate::cache::BlockCache;
use crate::emit::Emitter;
use crate::error::CoreResult;
use crate::interrupt::InterruptController;
use crate::ir::SpinKind;
use crate::memory::Bus;
use crate::scheduler::Scheduler;
use crate::state::{GuestState, HaltState};

/// Minimum HALT jump per tick when `next_update` is closer than this (§4.7
/// step 6: `max(inst_count + 16, next_update)`).
const HALT_TICK_CYCLES: u64 = 16;

pub struct Dispatcher<E: Emitter> {
    cache: BlockCache<E>,
}

impl<E: Emitter> Dispatcher<E> {
    pub fn new(cache: BlockCache<E>) -> Self {
        Dispatcher { cache }
    }

    /// Runs guest code until at least `budget` T-cycles have elapsed.
    /// Intended to be called once per host frame tick by the renderer
    /// thread; returns the T-cycles actually spent (always >= budget unless
    /// a decode error aborts the run).
    pub fn run_for(&mut self, state: &mut GuestState, bus: &mut Bus, budget: u64) -> CoreResult<u64> {
        let mut spent = 0u64;
        while spent < budget {
            spent += self.step(state, bus)?;
        }
        Ok(spent)
    }

    /// Runs a single dispatch tick: either one parked HALT jump, or one
    /// compiled block (possibly fast-forwarded past a spin loop). Either
    /// way, the scheduler and interrupt dispatcher only actually run once
    /// `inst_count` has reached `next_update` (§4.7 step 5). Returns
    /// elapsed cycles.
    pub fn step(&mut self, state: &mut GuestState, bus: &mut Bus) -> CoreResult<u64> {
        // EI enables IME on the instruction *after* EI, not EI itself; the
        // flag set in exec.rs's Ei arm is consumed here, one dispatch tick
        // after it was raised.
        if state.halt_arg == 1 {
            state.ime = true;
            state.halt_arg = 0;
        }

        if state.halt == HaltState::Halt {
            // §4.7 step 6: jump straight to the scheduler's next wake-up
            // rather than ticking by a fixed step size.
            let target = (state.inst_count + HALT_TICK_CYCLES).max(state.next_update);
            let elapsed = target - state.inst_count;
            state.inst_count = target;
            state.pending_ticks += elapsed;
            self.run_scheduler_if_due(state, bus);
            return Ok(elapsed);
        }

        let pc = state.pc;
        let spin = self.cache.classify_at(pc, bus)?;
        let cycles = self.cache.step_block(pc, bus, state)?;
        state.inst_count += cycles;
        state.pending_ticks += cycles;

        let mut elapsed = cycles;
        if spin != SpinKind::None && state.pc == pc {
            // Still spinning after one pass: nothing but time will change
            // the polled register, so jump straight to the next scheduled
            // event instead of re-running the loop body tick by tick.
            let jump = state.next_update.saturating_sub(state.inst_count);
            state.inst_count += jump;
            state.pending_ticks += jump;
            elapsed += jump;
        }

        self.run_scheduler_if_due(state, bus);
        Ok(elapsed)
    }

    /// §4.7 step 5: the scheduler (and the interrupt dispatcher that rides
    /// on it) only actually runs once `inst_count` has caught up to
    /// `next_update`; ticks below that line just accumulate in
    /// `pending_ticks` so nothing is lost once it does run.
    fn run_scheduler_if_due(&mut self, state: &mut GuestState, bus: &mut Bus) {
        if state.inst_count < state.next_update {
            return;
        }
        let ticks = std::mem::take(&mut state.pending_ticks);
        Scheduler::advance(state, bus, ticks);
        InterruptController::step(state, bus);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::InterpretingEmitter;

    fn fresh_bus() -> Bus {
        let mut rom = vec![0u8; 0x8000];
        rom[0x0147] = 0x00;
        Bus::new(rom).unwrap()
    }

    #[test]
    fn steps_a_simple_loop_without_erroring() {
        let mut bus = fresh_bus();
        bus.rom[0] = 0x00; // NOP
        bus.rom[1] = 0xC3; // JP 0x0000
        bus.rom[2] = 0x00;
        bus.rom[3] = 0x00;
        let mut state = GuestState::new_at_boot_rom();
        let mut dispatcher = Dispatcher::new(BlockCache::new(InterpretingEmitter, 1));
        let spent = dispatcher.run_for(&mut state, &mut bus, 1000).unwrap();
        assert!(spent >= 1000);
    }

    #[test]
    fn halt_parks_until_a_pending_interrupt_wakes_it() {
        let mut bus = fresh_bus();
        bus.rom[0] = 0x76; // HALT
        let mut state = GuestState::new_at_boot_rom();
        state.ime = true;
        let mut dispatcher = Dispatcher::new(BlockCache::new(InterpretingEmitter, 0));
        dispatcher.step(&mut state, &mut bus).unwrap();
        assert_eq!(state.halt, HaltState::Halt);

        bus.ie_register = 1;
        bus.write_byte(crate::memory::map::IF_ADDR, 1);
        for _ in 0..5 {
            dispatcher.step(&mut state, &mut bus).unwrap();
            if state.halt == HaltState::Running {
                break;
            }
        }
        assert_eq!(state.halt, HaltState::Running);
        assert_eq!(state.pc, crate::memory::map::VBLANK_VECTOR);
    }

    #[test]
    fn scheduler_is_gated_until_next_update_is_reached() {
        let mut bus = fresh_bus();
        bus.rom[0] = 0xC3; // JP 0x0010 -- not a self-loop, so no spin fast-forward
        bus.rom[1] = 0x10;
        bus.rom[2] = 0x00;
        let mut state = GuestState::new_at_boot_rom();
        state.next_update = 1000;
        let mut dispatcher = Dispatcher::new(BlockCache::new(InterpretingEmitter, 0));
        dispatcher.step(&mut state, &mut bus).unwrap();
        assert!(state.inst_count < state.next_update);
        assert_eq!(state.pending_ticks, state.inst_count);
        assert_eq!(bus.io[(crate::memory::map::DIV_ADDR - crate::memory::map::IO_REGISTERS_START) as usize], 0);
    }

    #[test]
    fn halt_jumps_to_next_update_instead_of_ticking_by_four() {
        let mut bus = fresh_bus();
        bus.rom[0] = 0x76; // HALT
        let mut state = GuestState::new_at_boot_rom();
        dispatcher_step_until_halted(&mut state, &mut bus);
        state.next_update = state.inst_count + 500;
        let mut dispatcher = Dispatcher::new(BlockCache::new(InterpretingEmitter, 0));
        let elapsed = dispatcher.step(&mut state, &mut bus).unwrap();
        assert_eq!(elapsed, 500);
    }

    fn dispatcher_step_until_halted(state: &mut GuestState, bus: &mut Bus) {
        let mut dispatcher = Dispatcher::new(BlockCache::new(InterpretingEmitter, 0));
        dispatcher.step(state, bus).unwrap();
        assert_eq!(state.halt, HaltState::Halt);
    }

    #[test]
    fn spin_loop_fast_forwards_past_ly_polling() {
        // LD A,(FF44) ; CP 0x90 ; JR NZ,-7 (self loop polling LY)
        let mut bus = fresh_bus();
        let body = [0xFA, 0x44, 0xFF, 0xFE, 0x90, 0x20, 0xF9];
        bus.rom[..body.len()].copy_from_slice(&body);
        bus.io[(crate::memory::map::LCDC_ADDR - crate::memory::map::IO_REGISTERS_START) as usize] =
            1 << crate::memory::map::LCDC_LCD_ENABLE_BIT;
        let mut state = GuestState::new_at_boot_rom();
        let mut dispatcher = Dispatcher::new(BlockCache::new(InterpretingEmitter, 2));
        let before = state.inst_count;
        dispatcher.step(&mut state, &mut bus).unwrap();
        assert!(state.inst_count > before);
    }
}
