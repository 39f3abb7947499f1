//! Capability resolution for virtual devices.
//!
//! [`lifx_core::get_product_info`] is generated offline (see `xtask update-products`) from the
//! upstream `products.json` and only carries the fields real clients need: per-feature booleans
//! and a temperature range. This emulator additionally needs to know what to *default a freshly
//! created virtual device to* (how many zones, what tile layout) and where the firmware-gated
//! line for extended multizone sits. Rather than hand-editing the ~90 generated match arms to
//! carry those fields, this module layers a small supplementary table on top, keyed by the same
//! `(vendor, product)` pair. See DESIGN.md for the tradeoff.

use lifx_core::{get_product_info, ProductInfo, TemperatureRange};

use crate::error::EmulatorError;

/// The capability flags from [`ProductInfo`] plus `extended_multizone`, expanded into the
/// field names §3 of the specification uses. Flags are fixed at device-creation time and never
/// change at runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub has_color: bool,
    pub has_infrared: bool,
    pub has_multizone: bool,
    pub has_extended_multizone: bool,
    pub has_matrix: bool,
    pub has_hev: bool,
    pub has_relays: bool,
    pub has_buttons: bool,
}

impl Capabilities {
    pub fn is_switch(&self) -> bool {
        self.has_relays && self.has_buttons && !self.has_color
    }
}

/// Defaults applied when a multizone or matrix device is created and no override is supplied.
#[derive(Debug, Clone, Copy)]
pub struct EmulatorDefaults {
    pub zone_count: u16,
    pub extended_multizone_firmware_floor: Option<(u16, u16)>,
    pub tile_count: u8,
    pub tile_width: u8,
    pub tile_height: u8,
    pub min_kelvin: u16,
    pub max_kelvin: u16,
}

impl Default for EmulatorDefaults {
    fn default() -> Self {
        EmulatorDefaults {
            zone_count: 1,
            extended_multizone_firmware_floor: None,
            tile_count: 1,
            tile_width: 8,
            tile_height: 8,
            min_kelvin: 1500,
            max_kelvin: 9000,
        }
    }
}

fn temperature_bounds(range: &TemperatureRange) -> (u16, u16) {
    match *range {
        TemperatureRange::Variable { min, max } => (min, max),
        TemperatureRange::Fixed(k) => (k, k),
        TemperatureRange::None => (1500, 9000),
    }
}

/// Supplementary per-product defaults this emulator needs that the generated product table
/// does not carry. Only products that actually need non-generic defaults (multizone, matrix)
/// have an entry; everything else falls back to [`EmulatorDefaults::default`].
fn emulator_overrides(vendor: u32, product: u32) -> Option<EmulatorDefaults> {
    let d = EmulatorDefaults::default();
    match (vendor, product) {
        // LIFX Z (original, firmware-upgradable to extended multizone at build 1532997580).
        (1, 31) | (1, 32) => Some(EmulatorDefaults {
            zone_count: 8,
            extended_multizone_firmware_floor: Some((2, 77)),
            ..d
        }),
        // LIFX Beam (original, same firmware-upgrade story as LIFX Z).
        (1, 38) => Some(EmulatorDefaults {
            zone_count: 10,
            extended_multizone_firmware_floor: Some((2, 77)),
            ..d
        }),
        // LIFX Z (2nd generation): extended multizone natively, no firmware floor.
        (1, 117) | (1, 118) => Some(EmulatorDefaults {
            zone_count: 16,
            extended_multizone_firmware_floor: None,
            ..d
        }),
        // LIFX Beam (2nd generation): same story as the newer Z.
        (1, 119) | (1, 120) => Some(EmulatorDefaults {
            zone_count: 10,
            extended_multizone_firmware_floor: None,
            ..d
        }),
        // LIFX Tile: a chain of 5 square tiles by default.
        (1, 55) => Some(EmulatorDefaults {
            tile_count: 5,
            tile_width: 8,
            tile_height: 8,
            ..d
        }),
        // LIFX Candle: a single non-square tile.
        (1, 57) | (1, 68) | (1, 137) | (1, 138) => Some(EmulatorDefaults {
            tile_count: 1,
            tile_width: 6,
            tile_height: 5,
            ..d
        }),
        _ => None,
    }
}

/// A fully-resolved description of what a device of this product looks like: its capability
/// flags and the defaults used to populate a freshly-created device's sub-state.
#[derive(Debug, Clone)]
pub struct ResolvedProduct {
    pub name: &'static str,
    pub capabilities: Capabilities,
    pub defaults: EmulatorDefaults,
}

/// Looks up a product, combining the generated table with this crate's supplementary defaults.
pub fn resolve(vendor: u32, product: u32) -> Result<ResolvedProduct, EmulatorError> {
    let info: &'static ProductInfo =
        get_product_info(vendor, product).ok_or(EmulatorError::UnknownProduct { vendor, product })?;

    let (min_kelvin, max_kelvin) = temperature_bounds(&info.temperature_range);
    let mut defaults = emulator_overrides(vendor, product).unwrap_or_default();
    defaults.min_kelvin = min_kelvin;
    defaults.max_kelvin = max_kelvin;
    if !info.multizone {
        defaults.zone_count = 0;
    }
    if !info.matrix && !info.chain {
        defaults.tile_count = 0;
    }

    Ok(ResolvedProduct {
        name: info.name,
        capabilities: Capabilities {
            has_color: info.color,
            has_infrared: info.infrared,
            has_multizone: info.multizone,
            // Resolved once the device's firmware version is known; see
            // `finalize_extended_multizone`. A device is never created with this flag final.
            has_extended_multizone: false,
            has_matrix: info.matrix || info.chain,
            has_hev: info.hev,
            has_relays: info.relays,
            has_buttons: info.buttons,
        },
        defaults,
    })
}

/// Implements the firmware-gated extended multizone rule from §4.6:
/// - products with no firmware floor support it natively once `multizone` is true.
/// - products with a floor support it only once the reported firmware build meets or exceeds
///   `(major, minor)`.
pub fn supports_extended_multizone(
    has_multizone: bool,
    firmware_floor: Option<(u16, u16)>,
    firmware_version: (u16, u16),
) -> bool {
    if !has_multizone {
        return false;
    }
    match firmware_floor {
        None => true,
        Some(floor) => firmware_version >= floor,
    }
}

/// Sets `has_extended_multizone` on an already-resolved capability set once the device's
/// firmware version has been decided (at device-creation time). Capability flags are fixed for
/// the device's lifetime after this point, per §3.
pub fn finalize_extended_multizone(
    mut capabilities: Capabilities,
    firmware_floor: Option<(u16, u16)>,
    firmware_version: (u16, u16),
) -> Capabilities {
    capabilities.has_extended_multizone =
        supports_extended_multizone(capabilities.has_multizone, firmware_floor, firmware_version);
    capabilities
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn a19_has_no_multizone_or_matrix() {
        let p = resolve(1, 27).unwrap();
        assert!(p.capabilities.has_color);
        assert!(!p.capabilities.has_multizone);
        assert_eq!(p.defaults.zone_count, 0);
    }

    #[test]
    fn original_z_upgrades_via_firmware() {
        let p = resolve(1, 31).unwrap();
        assert!(p.capabilities.has_multizone);
        assert_eq!(p.defaults.zone_count, 8);
        assert!(!supports_extended_multizone(
            p.capabilities.has_multizone,
            p.defaults.extended_multizone_firmware_floor,
            (2, 70)
        ));
        assert!(supports_extended_multizone(
            p.capabilities.has_multizone,
            p.defaults.extended_multizone_firmware_floor,
            (2, 77)
        ));
    }

    #[test]
    fn newer_z_supports_extended_natively() {
        let p = resolve(1, 117).unwrap();
        assert!(supports_extended_multizone(
            p.capabilities.has_multizone,
            p.defaults.extended_multizone_firmware_floor,
            (0, 1)
        ));
    }

    #[test]
    fn switch_is_color_false_relays_and_buttons_true() {
        let p = resolve(1, 70).unwrap();
        assert!(p.capabilities.is_switch());
    }

    #[test]
    fn unknown_product_is_an_error() {
        assert!(resolve(1, 999_999).is_err());
    }
}
