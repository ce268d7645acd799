//! `gbjit`: a dynamic binary translator for the Sharp LR35902 (GBZ80) core
//! of the original Game Boy. Generalizes the teacher's tree-walking
//! interpreter (`0hmX-GameboyEmulatorInRust`) into a decode -> IR ->
//! peephole-optimize -> compile -> cache -> dispatch pipeline; see
//! DESIGN.md for the grounding ledger.

pub mod audio;
pub mod cache;
pub mod decode;
pub mod dispatch;
pub mod emit;
pub mod error;
pub mod flags;
pub mod input;
pub mod interrupt;
pub mod ir;
pub mod memory;
pub mod optimize;
pub mod render;
pub mod save;
pub mod scheduler;
pub mod state;

pub use cache::BlockCache;
pub use dispatch::Dispatcher;
pub use emit::{Emitter, InterpretingEmitter};
pub use error::{CoreError, CoreResult};
pub use memory::Bus;
pub use state::GuestState;
