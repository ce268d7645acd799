//! Memory map module (§3, §4.5, component B).

pub mod bus;
pub mod map;
pub mod mbc;

pub use bus::Bus;
pub use mbc::{Mbc, MbcKind};
