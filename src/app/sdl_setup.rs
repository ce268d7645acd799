//! SDL window/canvas bring-up (§6), trimmed from the teacher's
//! `app/sdl_setup.rs`: no `sdl2::ttf` context (the debug disassembly text it
//! backed is an explicit Non-goal here).

use sdl2::render::{Canvas, TextureCreator};
use sdl2::video::{Window, WindowContext};
use sdl2::Sdl;

pub struct SdlContext {
    pub sdl: Sdl,
    pub canvas: Canvas<Window>,
    pub texture_creator: TextureCreator<WindowContext>,
    pub event_pump: sdl2::EventPump,
}

pub fn init_sdl(window_title: &str, width: u32, height: u32) -> Result<SdlContext, String> {
    log::info!("initializing SDL2");
    let sdl = sdl2::init()?;
    let video_subsystem = sdl.video()?;

    let window = video_subsystem
        .window(window_title, width, height)
        .position_centered()
        .build()
        .map_err(|e| e.to_string())?;

    let canvas = window.into_canvas().accelerated().present_vsync().build().map_err(|e| e.to_string())?;
    let texture_creator = canvas.texture_creator();
    let event_pump = sdl.event_pump()?;

    Ok(SdlContext {
        sdl,
        canvas,
        texture_creator,
        event_pump,
    })
}
