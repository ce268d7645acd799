//! CLI front end (§6), trimmed from the teacher's `app/main.rs`: the same
//! SDL window/event-pump/frame-pacing shape, stripped of the debug
//! disassembly and VRAM-view panes (explicit Non-goal here) and driven by
//! `gbjit::Dispatcher` instead of a bare `Cpu::step` loop.

mod constants;
mod input;
mod sdl_setup;

use std::path::PathBuf;
use std::thread;
use std::time::Instant;

use clap::Parser;
use gbjit::input::InputQueue;
use gbjit::{BlockCache, Bus, Dispatcher, GuestState, InterpretingEmitter};

#[derive(Parser, Debug)]
#[command(name = "gbjit", about = "A dynamic binary translator for the DMG")]
struct Cli {
    /// Path to the ROM file to run.
    rom: PathBuf,

    /// Peephole/JIT aggressiveness, clamped to 0..3.
    #[arg(short = 'O', long = "opt-level", default_value_t = 2)]
    opt_level: u8,

    /// Window scale factor.
    #[arg(short = 's', long = "scale", default_value_t = constants::DEFAULT_SCALE)]
    scale: u32,
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    if let Err(err) = run(cli) {
        log::error!("fatal: {err}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), String> {
    let rom_bytes = std::fs::read(&cli.rom).map_err(|e| format!("failed to read ROM '{}': {e}", cli.rom.display()))?;
    let mut bus = Bus::new(rom_bytes).map_err(|e| e.to_string())?;

    let save_path = cli.rom.with_extension("sav");
    if let Err(e) = gbjit::save::load_battery(&save_path, &mut bus) {
        log::warn!("battery save not loaded: {e}");
    }

    let mut state = GuestState::new_post_boot();
    let opt_level = cli.opt_level.min(3);
    let mut dispatcher = Dispatcher::new(BlockCache::new(InterpretingEmitter, opt_level));

    let scale = cli.scale.max(1);
    let window_title = format!("gbjit - {}", cli.rom.display());
    let mut sdl_context = sdl_setup::init_sdl(
        &window_title,
        gbjit::render::GB_SCREEN_WIDTH * scale,
        gbjit::render::GB_SCREEN_HEIGHT * scale,
    )?;

    let mut input_queue = InputQueue::new();
    let mut fullscreen = false;

    'main_loop: loop {
        let frame_start = Instant::now();

        for action in input::poll_events(&mut sdl_context.event_pump, &mut input_queue) {
            match action {
                input::FrontEndAction::Quit => break 'main_loop,
                input::FrontEndAction::ToggleFullscreen => {
                    fullscreen = !fullscreen;
                    let mode = if fullscreen {
                        sdl2::video::FullscreenType::Desktop
                    } else {
                        sdl2::video::FullscreenType::Off
                    };
                    if let Err(e) = sdl_context.canvas.window_mut().set_fullscreen(mode) {
                        log::warn!("failed to toggle fullscreen: {e}");
                    }
                }
            }
        }
        input_queue.drain(&mut bus);

        if let Err(e) = dispatcher.run_for(&mut state, &mut bus, constants::CYCLES_PER_FRAME) {
            log::error!("dispatch error: {e}");
            break 'main_loop;
        }
        bus.run_pending_dma();

        sdl_context.canvas.clear();
        sdl_context.canvas.present();

        let elapsed = frame_start.elapsed();
        if elapsed < constants::TARGET_FRAME_DURATION {
            thread::sleep(constants::TARGET_FRAME_DURATION - elapsed);
        }
    }

    if let Err(e) = gbjit::save::save_battery(&save_path, &bus) {
        log::warn!("battery save not written: {e}");
    }

    Ok(())
}
