//! Structured error kinds for the core, used at the compile/dispatch boundary.
//!
//! Generalizes the teacher's `Result<T, String>` convention (see
//! `cpu/mod.rs::step`) into a closed `thiserror` enum, per §7 of the spec.

use thiserror::Error;

/// Errors that can surface from decoding, emitting, or running guest code.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid opcode {opcode:#04X} at {address:#06X} (cb={is_cb})")]
    InvalidOpcode {
        address: u16,
        opcode: u8,
        is_cb: bool,
    },

    #[error("failed to map ROM file: {0}")]
    MapFailure(String),

    #[error("failed to open file {path}: {source}")]
    OpenFailure {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error(
        "battery save size mismatch: file has {file_len} bytes, header expects {expected} bytes"
    )]
    SaveMismatch { file_len: usize, expected: usize },
}

pub type CoreResult<T> = Result<T, CoreError>;
