//! SDL keycode mapping (§6), grounded in the teacher's `Joypad::key_down`/
//! `key_up` (`joypad.rs`) but remapped to this crate's key bindings: X→A,
//! Z→B, arrows→D-pad, Enter→Start, Backspace→Select, Escape→quit, Alt+Enter→
//! toggle fullscreen. Translates SDL events into `gbjit::input::KeyEvent`s
//! the dispatcher drains, and reports front-end-only actions (quit,
//! fullscreen) the main loop handles itself.

use gbjit::input::{GbKey, InputQueue, KeyEvent};
use sdl2::event::Event;
use sdl2::keyboard::{Keycode, Mod};
use sdl2::EventPump;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontEndAction {
    Quit,
    ToggleFullscreen,
}

fn map_key(key: Keycode) -> Option<GbKey> {
    match key {
        Keycode::X => Some(GbKey::A),
        Keycode::Z => Some(GbKey::B),
        Keycode::Right => Some(GbKey::Right),
        Keycode::Left => Some(GbKey::Left),
        Keycode::Up => Some(GbKey::Up),
        Keycode::Down => Some(GbKey::Down),
        Keycode::Return => Some(GbKey::Start),
        Keycode::Backspace => Some(GbKey::Select),
        _ => None,
    }
}

/// Drains pending SDL events into `queue` and returns any front-end-level
/// actions observed (quit, fullscreen toggle) this poll.
pub fn poll_events(event_pump: &mut EventPump, queue: &mut InputQueue) -> Vec<FrontEndAction> {
    let mut actions = Vec::new();
    for event in event_pump.poll_iter() {
        match event {
            Event::Quit { .. } => actions.push(FrontEndAction::Quit),
            Event::KeyDown {
                keycode: Some(Keycode::Escape),
                ..
            } => actions.push(FrontEndAction::Quit),
            Event::KeyDown {
                keycode: Some(Keycode::Return),
                keymod,
                repeat: false,
                ..
            } if keymod.intersects(Mod::LALTMOD | Mod::RALTMOD) => {
                actions.push(FrontEndAction::ToggleFullscreen);
            }
            Event::KeyDown {
                keycode: Some(key),
                repeat: false,
                ..
            } => {
                if let Some(gb_key) = map_key(key) {
                    queue.push(KeyEvent::Down(gb_key));
                }
            }
            Event::KeyUp {
                keycode: Some(key),
                repeat: false,
                ..
            } => {
                if let Some(gb_key) = map_key(key) {
                    queue.push(KeyEvent::Up(gb_key));
                }
            }
            _ => {}
        }
    }
    actions
}
