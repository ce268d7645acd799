//! Window/timing constants for the front end (§6), trimmed from the
//! teacher's `app/constants.rs`: the debug disassembly/VRAM-view layout
//! math is dropped (explicit Non-goal, no debug UI), the GB screen and
//! frame-pacing constants survive unchanged.

use std::time::Duration;

pub const TARGET_FPS: u32 = 60;
pub const TARGET_FRAME_DURATION: Duration = Duration::from_nanos(1_000_000_000u64 / TARGET_FPS as u64);

/// T-cycles per frame at the real DMG clock (4.194304 MHz / 60fps).
pub const CYCLES_PER_FRAME: u64 = 69_905;

pub const DEFAULT_SCALE: u32 = 3;
