//! Compiled block cache (§4.4/§4.5, component F).
//!
//! The teacher has no cache at all -- it decodes straight from the
//! `INSTRUCTIONS` table on every `step`. This keyed store is what turns that
//! per-instruction table lookup into the JIT's per-block one: ROM blocks are
//! addressed by `(bank, address)` since the same address means different
//! bytes under different bank mappings, HRAM blocks sit in their own small
//! table since HRAM is the only RAM region the spec allows compiling (self-
//! modifying code elsewhere is always interpreted fresh), and a write to any
//! HRAM byte invalidates every HRAM block compiled before that write.

use std::collections::HashMap;

use crate::emit::{Block, Emitter};
use crate::error::CoreResult;
use crate::ir::SpinKind;
use crate::memory::map::HRAM_START;
use crate::memory::Bus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct RomKey {
    bank: usize,
    address: u16,
}

pub struct BlockCache<E: Emitter> {
    emitter: E,
    opt_level: u8,
    rom_blocks: HashMap<RomKey, Block>,
    hram_blocks: HashMap<u16, Block>,
}

impl<E: Emitter> BlockCache<E> {
    pub fn new(emitter: E, opt_level: u8) -> Self {
        BlockCache {
            emitter,
            opt_level: opt_level.min(3),
            rom_blocks: HashMap::new(),
            hram_blocks: HashMap::new(),
        }
    }

    /// Runs the block starting at `pc`, compiling it on a cache miss.
    /// Returns the elapsed T-cycles and the PC after the block completed.
    pub fn step_block(&mut self, pc: u16, bus: &mut Bus, state: &mut crate::state::GuestState) -> CoreResult<u64> {
        for addr in bus.drain_hram_dirty() {
            self.invalidate_hram(addr);
        }

        let in_hram = pc >= HRAM_START;
        let in_rom = pc < crate::memory::map::ROM_BANK_N_END.wrapping_add(1);

        if in_hram {
            if !self.hram_blocks.contains_key(&pc) {
                let block = self.compile_at(pc, bus)?;
                self.hram_blocks.insert(pc, block);
            }
            let block = self.hram_blocks.get_mut(&pc).unwrap();
            return Ok(block.run(state, bus));
        }

        if in_rom {
            let bank = if pc < crate::memory::map::ROM_BANK_N_START {
                0
            } else {
                bus.mbc.current_rom_bank
            };
            let key = RomKey { bank, address: pc };
            if !self.rom_blocks.contains_key(&key) {
                let block = self.compile_at(pc, bus)?;
                self.rom_blocks.insert(key, block);
            }
            let block = self.rom_blocks.get_mut(&key).unwrap();
            return Ok(block.run(state, bus));
        }

        // Any other RAM region: compile-and-discard, never cached, since a
        // guest program is free to overwrite WRAM with new code at any time
        // and the core has no invalidation hook for it (§4.5 component F).
        let mut block = self.compile_at(pc, bus)?;
        Ok(block.run(state, bus))
    }

    /// Reports the busy-wait classification of the block starting at `pc`
    /// without re-running it, compiling it first on a cache miss. Used by
    /// the dispatcher to decide whether a spin loop can be fast-forwarded.
    pub fn classify_at(&mut self, pc: u16, bus: &Bus) -> CoreResult<SpinKind> {
        let in_hram = pc >= HRAM_START;
        let in_rom = pc < crate::memory::map::ROM_BANK_N_END.wrapping_add(1);

        if in_hram {
            if !self.hram_blocks.contains_key(&pc) {
                let block = self.compile_at(pc, bus)?;
                self.hram_blocks.insert(pc, block);
            }
            return Ok(self.hram_blocks.get(&pc).unwrap().spin());
        }

        if in_rom {
            let bank = if pc < crate::memory::map::ROM_BANK_N_START {
                0
            } else {
                bus.mbc.current_rom_bank
            };
            let key = RomKey { bank, address: pc };
            if !self.rom_blocks.contains_key(&key) {
                let block = self.compile_at(pc, bus)?;
                self.rom_blocks.insert(key, block);
            }
            return Ok(self.rom_blocks.get(&key).unwrap().spin());
        }

        Ok(self.compile_at(pc, bus)?.spin())
    }

    fn compile_at(&self, pc: u16, bus: &Bus) -> CoreResult<Block> {
        let read = |addr: u16| bus.read_byte(addr);
        self.emitter.compile(&read, pc, self.opt_level)
    }

    fn invalidate_hram(&mut self, written_addr: u16) {
        self.hram_blocks
            .retain(|&start, block| !(written_addr >= start && written_addr < block.end));
    }

    pub fn rom_block_count(&self) -> usize {
        self.rom_blocks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emit::InterpretingEmitter;
    use crate::state::GuestState;

    fn fresh_bus() -> Bus {
        let mut rom = vec![0u8; 0x8000];
        rom[0x0147] = 0x00;
        Bus::new(rom).unwrap()
    }

    #[test]
    fn rom_block_is_compiled_once_and_reused() {
        let mut bus = fresh_bus();
        bus.rom[0] = 0x00; // NOP
        bus.rom[1] = 0xC3; // JP 0x0000
        bus.rom[2] = 0x00;
        bus.rom[3] = 0x00;
        let mut cache = BlockCache::new(InterpretingEmitter, 0);
        let mut state = GuestState::new_at_boot_rom();
        cache.step_block(0, &mut bus, &mut state).unwrap();
        assert_eq!(cache.rom_block_count(), 1);
        cache.step_block(0, &mut bus, &mut state).unwrap();
        assert_eq!(cache.rom_block_count(), 1);
    }

    #[test]
    fn hram_write_invalidates_compiled_hram_block() {
        let mut bus = fresh_bus();
        bus.write_byte(0xFF80, 0x00); // NOP
        bus.write_byte(0xFF81, 0xC9); // RET (ends block)
        let mut cache = BlockCache::new(InterpretingEmitter, 0);
        let mut state = GuestState::new_at_boot_rom();
        state.sp = 0xFFFE;
        cache.step_block(0xFF80, &mut bus, &mut state).unwrap();
        assert!(cache.hram_blocks.contains_key(&0xFF80));
        bus.write_byte(0xFF80, 0x76); // self-modify to HALT
        cache.step_block(0xFF80, &mut bus, &mut state).unwrap();
        // recompiled after invalidation, should reflect the new byte (HALT).
        assert_eq!(state.halt, crate::state::HaltState::Halt);
    }
}
