//! Line-renderer seam (§4.8/§6), grounded in the teacher's `Ppu` pixel
//! compositor (`ppu/render.rs`) but reduced to the surface this crate needs:
//! a trait the dispatcher's VBLANK handler can hand a scanline buffer to,
//! plus a thin SDL backend. Full background/window/sprite pixel composition
//! is out of scope (§1 Non-goal: full PPU rendering) -- `LineRenderer` exists
//! so the dispatcher has somewhere real to deliver the DMG's 160x144 frame
//! once a host-side PPU produces one, without this crate depending on SDL
//! directly.

use sdl2::pixels::Color;
use sdl2::rect::Rect;
use sdl2::render::Canvas;
use sdl2::video::Window;

pub const GB_SCREEN_WIDTH: u32 = 160;
pub const GB_SCREEN_HEIGHT: u32 = 144;

/// A single DMG scanline: 160 2-bit shades, already resolved through BGP.
pub type ScanlinePixels = [u8; GB_SCREEN_WIDTH as usize];

/// The renderer seam the dispatcher's VBLANK/HBLANK handling delivers
/// finished scanlines to. A host-code-generating backend would still flow
/// frames through this same trait.
pub trait LineRenderer {
    fn draw_line(&mut self, line: u8, pixels: &ScanlinePixels);
    fn present(&mut self);
}

/// Thin SDL backend: scales each DMG shade to a greyscale fill rect at the
/// configured `--scale` factor (§6), matching the teacher's `draw_gb_screen`
/// pixel-doubling approach without the debug disassembly/VRAM panes it also
/// drew (explicit Non-goal here).
pub struct SdlLineRenderer {
    canvas: Canvas<Window>,
    scale: u32,
}

impl SdlLineRenderer {
    pub fn new(canvas: Canvas<Window>, scale: u32) -> Self {
        SdlLineRenderer { canvas, scale: scale.max(1) }
    }

    fn shade_color(shade: u8) -> Color {
        match shade & 0x03 {
            0 => Color::RGB(0xE0, 0xF8, 0xD0),
            1 => Color::RGB(0x88, 0xC0, 0x70),
            2 => Color::RGB(0x34, 0x68, 0x56),
            _ => Color::RGB(0x08, 0x18, 0x20),
        }
    }
}

impl LineRenderer for SdlLineRenderer {
    fn draw_line(&mut self, line: u8, pixels: &ScanlinePixels) {
        for (x, &shade) in pixels.iter().enumerate() {
            self.canvas.set_draw_color(Self::shade_color(shade));
            let rect = Rect::new(
                (x as u32 * self.scale) as i32,
                (line as u32 * self.scale) as i32,
                self.scale,
                self.scale,
            );
            if let Err(e) = self.canvas.fill_rect(rect) {
                log::warn!("failed to fill scanline rect at x={x}, line={line}: {e}");
            }
        }
    }

    fn present(&mut self) {
        self.canvas.present();
    }
}
