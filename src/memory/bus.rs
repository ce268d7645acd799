//! The memory map (§3, §4.5, component B): a single `Bus` fronting ROM, the
//! MBC, working RAM, video RAM, OAM, I/O registers, and HRAM.
//!
//! Grounded in the teacher's `memory_bus.rs`: `read_byte`/`write_byte` follow
//! the same region-dispatch shape (match on address range, route cartridge
//! addresses through the MBC, mirror ECHO RAM into working RAM, force STAT
//! bit 7 high on read). Extended per §4.5 to the full bank-switching set in
//! `mbc.rs`, to DMA, and to the HRAM-write cache-invalidation hook that the
//! teacher's tree-walking interpreter never needed (it has no compiled-block
//! cache to invalidate).

use crate::error::{CoreError, CoreResult};
use crate::memory::map::*;
use crate::memory::mbc::{Mbc, MbcKind};

const WRAM_SIZE: usize = (WRAM_BANK_0_SIZE) + (WRAM_BANK_N_SIZE);

pub struct Bus {
    pub rom: Vec<u8>,
    pub cart_ram: Vec<u8>,
    pub has_ram: bool,
    pub has_battery: bool,
    pub mbc: Mbc,

    pub vram: [u8; VRAM_SIZE],
    pub wram: [u8; WRAM_SIZE],
    pub oam: [u8; OAM_SIZE],
    pub io: [u8; IO_REGISTERS_SIZE],
    pub hram: [u8; HRAM_SIZE],
    pub ie_register: u8,

    /// Raw joypad button/d-pad state, active-low semantics applied on read
    /// (§4.5/§6): bit clear == pressed. Owned by the input layer, latched
    /// here for the P1/JOYP read path.
    pub joypad_buttons: u8,
    pub joypad_dpad: u8,

    /// Set for each HRAM offset written since the cache last drained it.
    /// The block cache (component F) polls this to invalidate self-modified
    /// HRAM blocks (§4.5 P4 / self-modifying-code rule).
    pub hram_dirty: [bool; HRAM_SIZE],

    /// Pending OAM DMA source page, set by a write to 0xFF46. The dispatcher
    /// performs the actual 160-byte copy once per instruction boundary so
    /// that a block mid-execution isn't torn mid-DMA.
    pub dma_pending: Option<u8>,
}

impl Bus {
    pub fn new(rom: Vec<u8>) -> CoreResult<Self> {
        if rom.len() < 0x0150 {
            return Err(CoreError::MapFailure("ROM shorter than header".into()));
        }
        let cartridge_type = rom[0x0147];
        let (kind, has_ram, has_battery) = MbcKind::from_header(cartridge_type);

        let num_rom_banks = match rom[0x0148] {
            n @ 0x00..=0x08 => 2usize << n,
            _ => rom.len() / ROM_BANK_N_SIZE,
        };
        let ram_banks = match rom[0x0149] {
            0x00 => 0,
            0x01 => 1,
            0x02 => 1,
            0x03 => 4,
            0x04 => 16,
            0x05 => 8,
            _ => 0,
        };
        let ram_banks = if kind == MbcKind::Mbc2 { 1 } else { ram_banks };
        let cart_ram_len = if kind == MbcKind::Mbc2 {
            512 // MBC2's built-in 4-bit RAM array, not bank-switched.
        } else {
            ram_banks * EXT_RAM_SIZE
        };

        Ok(Bus {
            rom,
            cart_ram: vec![0u8; cart_ram_len.max(if has_ram { EXT_RAM_SIZE } else { 0 })],
            has_ram,
            has_battery,
            mbc: Mbc::new(kind, num_rom_banks, ram_banks),
            vram: [0; VRAM_SIZE],
            wram: [0; WRAM_SIZE],
            oam: [0; OAM_SIZE],
            io: [0; IO_REGISTERS_SIZE],
            hram: [0; HRAM_SIZE],
            ie_register: 0,
            joypad_buttons: 0x0F,
            joypad_dpad: 0x0F,
            hram_dirty: [false; HRAM_SIZE],
            dma_pending: None,
        })
    }

    pub fn read_byte(&self, addr: u16) -> u8 {
        match addr {
            ROM_BANK_0_START..=ROM_BANK_0_END => self.rom.get(addr as usize).copied().unwrap_or(0xFF),
            ROM_BANK_N_START..=ROM_BANK_N_END => {
                let offset = self.mbc.current_rom_bank * ROM_BANK_N_SIZE + (addr - ROM_BANK_N_START) as usize;
                self.rom.get(offset).copied().unwrap_or(0xFF)
            }
            VRAM_START..=VRAM_END => self.vram[(addr - VRAM_START) as usize],
            EXT_RAM_START..=EXT_RAM_END => self.read_cart_ram(addr),
            WRAM_BANK_0_START..=WRAM_BANK_N_END => self.wram[(addr - WRAM_BANK_0_START) as usize],
            ECHO_RAM_START..=ECHO_RAM_END => self.wram[(addr - ECHO_RAM_START) as usize],
            OAM_START..=OAM_END => self.oam[(addr - OAM_START) as usize],
            NOT_USABLE_START..=NOT_USABLE_END => 0xFF,
            P1_JOYP_ADDR => self.read_joyp(),
            STAT_ADDR => self.io[(STAT_ADDR - IO_REGISTERS_START) as usize] | 0x80,
            IO_REGISTERS_START..=IO_REGISTERS_END => self.io[(addr - IO_REGISTERS_START) as usize],
            HRAM_START..=HRAM_END => self.hram[(addr - HRAM_START) as usize],
            INTERRUPT_ENABLE_REGISTER => self.ie_register,
        }
    }

    fn read_cart_ram(&self, addr: u16) -> u8 {
        if !self.mbc.ram_enabled {
            return 0xFF;
        }
        if self.mbc.kind == MbcKind::Mbc3 {
            if let Some(reg) = self.mbc.rtc_selected {
                return self.mbc.rtc.read(reg);
            }
        }
        if self.mbc.kind == MbcKind::Mbc2 {
            let offset = (addr - EXT_RAM_START) as usize % 512;
            return self.cart_ram[offset] | 0xF0;
        }
        let bank = self.mbc.effective_ram_bank().unwrap_or(0);
        let offset = bank * EXT_RAM_SIZE + (addr - EXT_RAM_START) as usize;
        self.cart_ram.get(offset).copied().unwrap_or(0xFF)
    }

    /// §4.5: every `memory_write` behavior the core must realize.
    pub fn write_byte(&mut self, addr: u16, value: u8) {
        match addr {
            ROM_BANK_0_START..=ROM_BANK_N_END => self.mbc.write_command(addr, value),
            VRAM_START..=VRAM_END => self.vram[(addr - VRAM_START) as usize] = value,
            EXT_RAM_START..=EXT_RAM_END => self.write_cart_ram(addr, value),
            WRAM_BANK_0_START..=WRAM_BANK_N_END => self.wram[(addr - WRAM_BANK_0_START) as usize] = value,
            ECHO_RAM_START..=ECHO_RAM_END => self.wram[(addr - ECHO_RAM_START) as usize] = value,
            OAM_START..=OAM_END => self.oam[(addr - OAM_START) as usize] = value,
            NOT_USABLE_START..=NOT_USABLE_END => {}
            P1_JOYP_ADDR => self.write_joyp_select(value),
            TIMA_ADDR => {
                // Writing TIMA resets it to 0 rather than storing `value`
                // directly (§4.5 quirk carried over from the teacher).
                self.io[(TIMA_ADDR - IO_REGISTERS_START) as usize] = 0;
            }
            DMA_ADDR => {
                self.io[(DMA_ADDR - IO_REGISTERS_START) as usize] = value;
                self.dma_pending = Some(value);
            }
            AUDIO_REGS_START..=AUDIO_REGS_END => self.write_audio_register(addr, value),
            IO_REGISTERS_START..=IO_REGISTERS_END => self.io[(addr - IO_REGISTERS_START) as usize] = value,
            HRAM_START..=HRAM_END => {
                let offset = (addr - HRAM_START) as usize;
                self.hram[offset] = value;
                self.hram_dirty[offset] = true;
            }
            INTERRUPT_ENABLE_REGISTER => self.ie_register = value,
        }
    }

    fn write_cart_ram(&mut self, addr: u16, value: u8) {
        if !self.mbc.ram_enabled {
            return;
        }
        if self.mbc.kind == MbcKind::Mbc3 {
            if let Some(reg) = self.mbc.rtc_selected {
                self.mbc.rtc.write(reg, value);
                return;
            }
        }
        if self.mbc.kind == MbcKind::Mbc2 {
            let offset = (addr - EXT_RAM_START) as usize % 512;
            self.cart_ram[offset] = value & 0x0F;
            return;
        }
        let bank = self.mbc.effective_ram_bank().unwrap_or(0);
        let offset = bank * EXT_RAM_SIZE + (addr - EXT_RAM_START) as usize;
        if let Some(slot) = self.cart_ram.get_mut(offset) {
            *slot = value;
        }
    }

    /// Audio register writes are a data-plane hook for the audio lock named
    /// in the concurrency model (§5): the actual synthesis is out of scope
    /// (§1 Non-goals), so this only stores the register byte under the same
    /// critical section a full implementation would use for sample mixing.
    fn write_audio_register(&mut self, addr: u16, value: u8) {
        self.io[(addr - IO_REGISTERS_START) as usize] = value;
    }

    fn read_joyp(&self) -> u8 {
        let select = self.io[(P1_JOYP_ADDR - IO_REGISTERS_START) as usize];
        let select_buttons = select & 0x20 == 0;
        let select_dpad = select & 0x10 == 0;
        let mut lower = 0x0F;
        if select_buttons {
            lower &= self.joypad_buttons;
        }
        if select_dpad {
            lower &= self.joypad_dpad;
        }
        0xC0 | (select & 0x30) | lower
    }

    fn write_joyp_select(&mut self, value: u8) {
        let slot = &mut self.io[(P1_JOYP_ADDR - IO_REGISTERS_START) as usize];
        *slot = (*slot & 0xCF) | (value & 0x30);
    }

    /// Runs the pending OAM DMA transfer (§4.5), copying 160 bytes from
    /// `source << 8` into OAM. Called by the dispatcher at an instruction
    /// boundary, never mid-block.
    pub fn run_pending_dma(&mut self) {
        let Some(page) = self.dma_pending.take() else {
            return;
        };
        let base = (page as u16) << 8;
        for i in 0..OAM_SIZE as u16 {
            self.oam[i as usize] = self.read_byte(base + i);
        }
    }

    /// Drains and clears the HRAM-dirty set, returning the offsets written
    /// since the last drain. Consumed by the block cache's invalidation rule.
    pub fn drain_hram_dirty(&mut self) -> Vec<u16> {
        let mut out = Vec::new();
        for (i, dirty) in self.hram_dirty.iter_mut().enumerate() {
            if *dirty {
                out.push(HRAM_START + i as u16);
                *dirty = false;
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rom_with_header(cart_type: u8, rom_size_code: u8, ram_size_code: u8) -> Vec<u8> {
        let mut rom = vec![0u8; 0x8000];
        rom[0x0147] = cart_type;
        rom[0x0148] = rom_size_code;
        rom[0x0149] = ram_size_code;
        rom
    }

    #[test]
    fn echo_ram_mirrors_wram() {
        let mut bus = Bus::new(rom_with_header(0x00, 0x00, 0x00)).unwrap();
        bus.write_byte(0xC010, 0x42);
        assert_eq!(bus.read_byte(0xE010), 0x42);
    }

    #[test]
    fn stat_read_forces_bit_7_high() {
        let mut bus = Bus::new(rom_with_header(0x00, 0x00, 0x00)).unwrap();
        bus.write_byte(STAT_ADDR, 0x00);
        assert_eq!(bus.read_byte(STAT_ADDR) & 0x80, 0x80);
    }

    #[test]
    fn tima_write_always_resets_to_zero() {
        let mut bus = Bus::new(rom_with_header(0x00, 0x00, 0x00)).unwrap();
        bus.write_byte(TIMA_ADDR, 0x99);
        assert_eq!(bus.read_byte(TIMA_ADDR), 0);
    }

    #[test]
    fn hram_write_marks_dirty_and_drains_once() {
        let mut bus = Bus::new(rom_with_header(0x00, 0x00, 0x00)).unwrap();
        bus.write_byte(0xFF85, 7);
        let dirty = bus.drain_hram_dirty();
        assert_eq!(dirty, vec![0xFF85]);
        assert!(bus.drain_hram_dirty().is_empty());
    }

    #[test]
    fn dma_copies_160_bytes_from_source_page() {
        let mut bus = Bus::new(rom_with_header(0x00, 0x00, 0x00)).unwrap();
        for i in 0..OAM_SIZE {
            bus.wram[i] = i as u8;
        }
        bus.write_byte(DMA_ADDR, 0xC0);
        bus.run_pending_dma();
        for i in 0..OAM_SIZE {
            assert_eq!(bus.oam[i], i as u8);
        }
    }

    #[test]
    fn joypad_read_is_active_low_and_gated_by_select() {
        let mut bus = Bus::new(rom_with_header(0x00, 0x00, 0x00)).unwrap();
        bus.joypad_buttons = 0b1110; // A pressed (bit 0 clear)
        bus.joypad_dpad = 0x0F;
        bus.write_byte(P1_JOYP_ADDR, 0x10); // select buttons
        assert_eq!(bus.read_byte(P1_JOYP_ADDR) & 0x0F, 0b1110);
    }

    #[test]
    fn mbc2_ram_reads_high_nibble_forced() {
        let mut bus = Bus::new(rom_with_header(0x06, 0x00, 0x00)).unwrap();
        bus.mbc.ram_enabled = true;
        bus.write_byte(0xA000, 0x05);
        assert_eq!(bus.read_byte(0xA000), 0xF5);
    }
}
