//! Battery save file round-trip (§9 external collaborator `save`).
//!
//! The teacher has no analogous module -- cartridge RAM there is lost on
//! exit. Grounded in the error kinds `error.rs` already carries for this
//! purpose (`SaveMismatch`, `OpenFailure`): the image is the concatenation
//! of every external RAM bank, exactly `num_ram_banks * EXT_RAM_SIZE` bytes,
//! with no header of its own.

use std::fs;
use std::path::Path;

use crate::error::{CoreError, CoreResult};
use crate::memory::Bus;

/// Loads a `.sav` file into `bus.cart_ram`. A missing file is not an error
/// (a fresh cartridge has no prior save); a present file whose length
/// disagrees with the header's RAM size is refused (`SaveMismatch`) and the
/// caller continues with a zero image rather than aborting startup.
pub fn load_battery(path: &Path, bus: &mut Bus) -> CoreResult<()> {
    if !bus.has_battery {
        return Ok(());
    }
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(source) => {
            return Err(CoreError::OpenFailure {
                path: path.display().to_string(),
                source,
            })
        }
    };
    if data.len() != bus.cart_ram.len() {
        return Err(CoreError::SaveMismatch {
            file_len: data.len(),
            expected: bus.cart_ram.len(),
        });
    }
    bus.cart_ram.copy_from_slice(&data);
    Ok(())
}

/// Flushes `bus.cart_ram` to `path`. The currently-mapped bank is already
/// live in `cart_ram` (writes land there directly, §4.5), so there is
/// nothing to "flush" beyond writing the image as-is.
pub fn save_battery(path: &Path, bus: &Bus) -> CoreResult<()> {
    if !bus.has_battery {
        return Ok(());
    }
    fs::write(path, &bus.cart_ram).map_err(|source| CoreError::OpenFailure {
        path: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bus_with_ram(len: usize) -> Bus {
        let mut rom = vec![0u8; 0x8000];
        rom[0x0147] = 0x03; // MBC1+RAM+BATTERY
        rom[0x0149] = 0x02; // 1 bank * 8192
        let mut bus = Bus::new(rom).unwrap();
        bus.cart_ram = vec![0u8; len];
        bus
    }

    #[test]
    fn round_trips_through_a_temp_file() {
        let dir = std::env::temp_dir().join(format!("gbjit-save-test-{}", std::process::id()));
        let mut bus = bus_with_ram(8192);
        bus.cart_ram[42] = 0xAB;
        save_battery(&dir, &bus).unwrap();

        let mut loaded = bus_with_ram(8192);
        load_battery(&dir, &mut loaded).unwrap();
        assert_eq!(loaded.cart_ram[42], 0xAB);
        let _ = fs::remove_file(&dir);
    }

    #[test]
    fn size_mismatch_is_refused() {
        let dir = std::env::temp_dir().join(format!("gbjit-save-mismatch-{}", std::process::id()));
        fs::write(&dir, vec![0u8; 10]).unwrap();
        let mut bus = bus_with_ram(8192);
        let result = load_battery(&dir, &mut bus);
        assert!(matches!(result, Err(CoreError::SaveMismatch { .. })));
        let _ = fs::remove_file(&dir);
    }

    #[test]
    fn missing_file_is_not_an_error() {
        let dir = std::env::temp_dir().join("gbjit-save-definitely-missing.sav");
        let _ = fs::remove_file(&dir);
        let mut bus = bus_with_ram(8192);
        assert!(load_battery(&dir, &mut bus).is_ok());
    }
}
