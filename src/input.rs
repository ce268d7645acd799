//! Key-state collaborator (§4.7/§6), grounded in the teacher's `Joypad`
//! (`joypad.rs`) but decoupled from `sdl2::keyboard::Keycode` so the core
//! crate doesn't depend on SDL: the core only knows about abstract `GbKey`
//! values and a queue of press/release events. `app/input.rs` is where the
//! SDL-specific keycode mapping (§6: X→A, Z→B, arrows→D-pad, Enter→Start,
//! Backspace→Select) lives, translating real keyboard events into this
//! queue before handing it to the dispatcher.

use std::collections::VecDeque;

use crate::memory::map::{IF_ADDR, IO_REGISTERS_START, JOYPAD_INTERRUPT_BIT};
use crate::memory::Bus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GbKey {
    Right,
    Left,
    Up,
    Down,
    A,
    B,
    Select,
    Start,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyEvent {
    Down(GbKey),
    Up(GbKey),
}

/// Bit position within the active-low 4-bit group (`joypad_buttons` for
/// A/B/Select/Start, `joypad_dpad` for the D-pad), and which P1 select bit
/// (4 or 5) must be low for that group to be "currently selected" by the
/// game (§4.5's `read_joyp`).
fn group_bit(key: GbKey) -> (bool, u8, u8) {
    match key {
        GbKey::Right => (true, 0, 0x10),
        GbKey::Left => (true, 1, 0x10),
        GbKey::Up => (true, 2, 0x10),
        GbKey::Down => (true, 3, 0x10),
        GbKey::A => (false, 0, 0x20),
        GbKey::B => (false, 1, 0x20),
        GbKey::Select => (false, 2, 0x20),
        GbKey::Start => (false, 3, 0x20),
    }
}

/// Queue of key events produced by the front end, drained by the dispatcher
/// once per scheduler tick (§4.7) rather than once per host frame.
#[derive(Debug, Default)]
pub struct InputQueue {
    pending: VecDeque<KeyEvent>,
}

impl InputQueue {
    pub fn new() -> Self {
        InputQueue::default()
    }

    pub fn push(&mut self, event: KeyEvent) {
        self.pending.push_back(event);
    }

    /// Applies every queued event to `bus`'s joypad bitfields and raises the
    /// Joypad IF bit on any release-to-press edge within the group the game
    /// currently has selected (§4.7, mirroring the teacher's
    /// `Joypad::key_down` newly-pressed-and-selected rule).
    pub fn drain(&mut self, bus: &mut Bus) {
        let select = bus.io[(crate::memory::map::P1_JOYP_ADDR - IO_REGISTERS_START) as usize];
        while let Some(event) = self.pending.pop_front() {
            let (is_dpad, bit, select_mask) = match event {
                KeyEvent::Down(key) | KeyEvent::Up(key) => group_bit(key),
            };
            let field = if is_dpad { &mut bus.joypad_dpad } else { &mut bus.joypad_buttons };
            let was_pressed = *field & (1 << bit) == 0;

            match event {
                KeyEvent::Down(_) => *field &= !(1 << bit),
                KeyEvent::Up(_) => *field |= 1 << bit,
            }

            let now_pressed = matches!(event, KeyEvent::Down(_));
            let group_selected = select & select_mask == 0;
            if now_pressed && !was_pressed && group_selected {
                bus.io[(IF_ADDR - IO_REGISTERS_START) as usize] |= 1 << JOYPAD_INTERRUPT_BIT;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fresh_bus() -> Bus {
        let mut rom = vec![0u8; 0x8000];
        rom[0x0147] = 0x00;
        Bus::new(rom).unwrap()
    }

    #[test]
    fn pressing_a_selected_button_raises_joypad_interrupt() {
        let mut bus = fresh_bus();
        bus.write_byte(crate::memory::map::P1_JOYP_ADDR, 0x10); // select buttons
        let mut queue = InputQueue::new();
        queue.push(KeyEvent::Down(GbKey::A));
        queue.drain(&mut bus);
        assert_eq!(bus.joypad_buttons & 1, 0);
        assert_ne!(
            bus.io[(IF_ADDR - IO_REGISTERS_START) as usize] & (1 << JOYPAD_INTERRUPT_BIT),
            0
        );
    }

    #[test]
    fn pressing_an_unselected_group_does_not_raise_interrupt() {
        let mut bus = fresh_bus();
        bus.write_byte(crate::memory::map::P1_JOYP_ADDR, 0x20); // select d-pad only
        let mut queue = InputQueue::new();
        queue.push(KeyEvent::Down(GbKey::A));
        queue.drain(&mut bus);
        assert_eq!(
            bus.io[(IF_ADDR - IO_REGISTERS_START) as usize] & (1 << JOYPAD_INTERRUPT_BIT),
            0
        );
    }

    #[test]
    fn releasing_a_key_clears_its_bit() {
        let mut bus = fresh_bus();
        let mut queue = InputQueue::new();
        queue.push(KeyEvent::Down(GbKey::Up));
        queue.drain(&mut bus);
        assert_eq!(bus.joypad_dpad & (1 << 2), 0);
        queue.push(KeyEvent::Up(GbKey::Up));
        queue.drain(&mut bus);
        assert_ne!(bus.joypad_dpad & (1 << 2), 0);
    }
}
