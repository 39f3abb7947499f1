//! The per-device state record (§3) and the handful of accessor helpers that implement
//! capability gating directly, instead of through a generic field-routing layer (§4.3a).

use std::ffi::CString;
use std::time::Instant;

use lifx_core::{
    HSBK, LastHevCycleResult, LifxString, MultiZoneEffectType, TileEffectType, TileStateDevice,
};

use crate::error::Result;
use crate::ids::{DeviceId, Ident};
use crate::product::{self, Capabilities};

pub const NUM_FRAMEBUFFERS: usize = 8;
const DEFAULT_RELAY_COUNT: usize = 4;

pub(crate) fn make_label(s: &str) -> LifxString {
    let bytes: Vec<u8> = s.bytes().filter(|&b| b != 0).collect();
    let cstring = CString::new(bytes).unwrap_or_else(|_| CString::new("").unwrap());
    LifxString::new(&cstring)
}

fn default_color(kelvin: u16) -> HSBK {
    HSBK {
        hue: 0,
        saturation: 0,
        brightness: 32768,
        kelvin,
    }
}

#[derive(Debug, Clone)]
pub struct CoreState {
    pub id: DeviceId,
    pub label: LifxString,
    pub power_level: u16,
    pub color: HSBK,
    pub vendor: u32,
    pub product: u32,
    pub firmware_major: u16,
    pub firmware_minor: u16,
    pub firmware_build: u64,
    pub created_at: Instant,
    pub mac: [u8; 6],
    pub port: u16,
}

#[derive(Debug, Clone, Copy)]
pub struct NetworkState {
    pub wifi_signal_dbm: f32,
}

#[derive(Debug, Clone)]
pub struct LocationState {
    pub id: Ident,
    pub label: LifxString,
    pub updated_at: u64,
}

#[derive(Debug, Clone)]
pub struct GroupState {
    pub id: Ident,
    pub label: LifxString,
    pub updated_at: u64,
}

#[derive(Debug, Clone, Copy)]
pub struct WaveformState {
    pub active: bool,
    pub transient: bool,
    pub color: HSBK,
    pub period_ms: u32,
    pub cycles: f32,
    pub skew_ratio: i16,
    pub waveform: lifx_core::Waveform,
}

impl WaveformState {
    fn new(kelvin: u16) -> Self {
        WaveformState {
            active: false,
            transient: false,
            color: default_color(kelvin),
            period_ms: 0,
            cycles: 0.0,
            skew_ratio: 0,
            waveform: lifx_core::Waveform::Saw,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct InfraredState {
    pub brightness: u16,
}

#[derive(Debug, Clone)]
pub struct RelayState {
    pub levels: Vec<u16>,
}

#[derive(Debug, Clone, Copy)]
pub struct HevState {
    pub cycle_duration_s: u32,
    pub cycle_remaining_s: u32,
    pub last_power: bool,
    pub indication: bool,
    pub last_result: LastHevCycleResult,
}

impl Default for HevState {
    fn default() -> Self {
        HevState {
            cycle_duration_s: 0,
            cycle_remaining_s: 0,
            last_power: false,
            indication: false,
            last_result: LastHevCycleResult::None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MultizoneState {
    pub zone_count: u16,
    pub zone_colors: Vec<HSBK>,
    pub effect_instance_id: u32,
    pub effect_type: MultiZoneEffectType,
    pub effect_speed: u32,
    pub effect_duration_ns: u64,
}

impl MultizoneState {
    fn new(zone_count: u16, kelvin: u16) -> Self {
        let mut colors = Vec::with_capacity(zone_count as usize);
        for i in 0..zone_count {
            colors.push(HSBK {
                hue: ((i as u32 * 65535) / zone_count.max(1) as u32) as u16,
                saturation: 65535,
                brightness: 65535,
                kelvin,
            });
        }
        MultizoneState {
            zone_count,
            zone_colors: colors,
            effect_instance_id: 0,
            effect_type: MultiZoneEffectType::Off,
            effect_speed: 0,
            effect_duration_ns: 0,
        }
    }
}

/// One matrix tile's metadata plus its framebuffers. Buffer 0 is always allocated (it is the
/// visible buffer); buffers 1-7 are allocated lazily on first write, per §3.
#[derive(Debug, Clone)]
pub struct TileRuntime {
    pub metadata: TileStateDevice,
    pub framebuffers: [Option<Vec<HSBK>>; NUM_FRAMEBUFFERS],
}

impl TileRuntime {
    fn new(width: u8, height: u8, index: u8, firmware: (u16, u16, u64), kelvin: u16) -> Self {
        let pixels = vec![default_color(kelvin); width as usize * height as usize];
        let mut framebuffers: [Option<Vec<HSBK>>; NUM_FRAMEBUFFERS] = Default::default();
        framebuffers[0] = Some(pixels);
        TileRuntime {
            metadata: TileStateDevice {
                accel_meter_x: 0,
                accel_meter_y: 0,
                accel_meter_z: 0,
                reserved: 0,
                user_x: index as f32,
                user_y: 0.0,
                width,
                height,
                reserved2: 0,
                device_version_vendor: 1,
                device_version_product: 55,
                device_version_reserved: 0,
                firmware_build: firmware.2,
                reserved3: 0,
                firmware_version_minor: firmware.1,
                firmware_version_major: firmware.0,
                reserved4: 0,
            },
            framebuffers,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TileEffectState {
    pub active: bool,
    pub typ: TileEffectType,
    pub speed: u32,
    pub duration_ns: u64,
}

impl Default for TileEffectState {
    fn default() -> Self {
        TileEffectState {
            active: false,
            typ: TileEffectType::Off,
            speed: 0,
            duration_ns: 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MatrixState {
    pub tile_width: u8,
    pub tile_height: u8,
    pub tiles: Vec<TileRuntime>,
    pub effect: TileEffectState,
}

/// The full per-device record: an always-present core plus capability-gated sub-records.
/// Reads on a sub-record the device doesn't have return the documented default; writes are a
/// no-op. See §3's invariants.
#[derive(Debug, Clone)]
pub struct DeviceState {
    pub core: CoreState,
    pub network: NetworkState,
    pub location: LocationState,
    pub group: GroupState,
    pub waveform: WaveformState,
    pub capabilities: Capabilities,
    pub product_name: &'static str,
    pub infrared: Option<InfraredState>,
    pub hev: Option<HevState>,
    pub multizone: Option<MultizoneState>,
    pub matrix: Option<MatrixState>,
    pub relays: Option<RelayState>,
}

/// Parameters accepted by [`DeviceState::create`]; unset fields are filled with plausible
/// defaults by the factory.
#[derive(Debug, Clone, Default)]
pub struct DeviceSpec {
    pub vendor: u32,
    pub product: u32,
    pub id: Option<DeviceId>,
    pub label: Option<String>,
    pub firmware_major: Option<u16>,
    pub firmware_minor: Option<u16>,
    pub firmware_build: Option<u64>,
    pub port: Option<u16>,
    pub zone_count: Option<u16>,
    pub tile_count: Option<u8>,
}

impl DeviceState {
    /// Builds a new device from a product id and optional overrides, per the factory described
    /// in §3's Lifecycle paragraph.
    pub fn create(spec: DeviceSpec) -> Result<DeviceState> {
        let resolved = product::resolve(spec.vendor, spec.product)?;
        let firmware_major = spec.firmware_major.unwrap_or(3);
        let firmware_minor = spec.firmware_minor.unwrap_or(70);
        let firmware_build = spec.firmware_build.unwrap_or(1_600_000_000_000_000_000);

        let capabilities = product::finalize_extended_multizone(
            resolved.capabilities,
            resolved.defaults.extended_multizone_firmware_floor,
            (firmware_major, firmware_minor),
        );

        let id = spec.id.unwrap_or_else(random_device_id);
        let kelvin = resolved.defaults.min_kelvin.max(1500).min(9000);

        let infrared = capabilities
            .has_infrared
            .then_some(InfraredState { brightness: 65535 });
        let hev = capabilities.has_hev.then(HevState::default);

        let zone_count = spec.zone_count.unwrap_or(resolved.defaults.zone_count);
        let multizone = capabilities
            .has_multizone
            .then(|| MultizoneState::new(zone_count, kelvin));

        let tile_count = spec.tile_count.unwrap_or(resolved.defaults.tile_count);
        let matrix = capabilities.has_matrix.then(|| {
            let tiles = (0..tile_count.max(1))
                .map(|i| {
                    TileRuntime::new(
                        resolved.defaults.tile_width,
                        resolved.defaults.tile_height,
                        i,
                        (firmware_major, firmware_minor, firmware_build),
                        kelvin,
                    )
                })
                .collect();
            MatrixState {
                tile_width: resolved.defaults.tile_width,
                tile_height: resolved.defaults.tile_height,
                tiles,
                effect: TileEffectState::default(),
            }
        });

        let relays = capabilities.has_relays.then(|| RelayState {
            levels: vec![0; DEFAULT_RELAY_COUNT],
        });

        let label = spec
            .label
            .unwrap_or_else(|| format!("{} {}", resolved.name, id));

        Ok(DeviceState {
            core: CoreState {
                id,
                label: make_label(&label),
                power_level: 65535,
                color: default_color(kelvin),
                vendor: spec.vendor,
                product: spec.product,
                firmware_major,
                firmware_minor,
                firmware_build,
                created_at: Instant::now(),
                mac: id.to_bytes(),
                port: spec.port.unwrap_or(56700),
            },
            network: NetworkState {
                wifi_signal_dbm: -50.0,
            },
            location: LocationState {
                id: Ident::new_random(),
                label: make_label("Emulated Location"),
                updated_at: 0,
            },
            group: GroupState {
                id: Ident::new_random(),
                label: make_label("Emulated Group"),
                updated_at: 0,
            },
            waveform: WaveformState::new(kelvin),
            capabilities,
            product_name: resolved.name,
            infrared,
            hev,
            multizone,
            matrix,
            relays,
        })
    }

    pub fn id(&self) -> DeviceId {
        self.core.id
    }

    pub fn uptime_ns(&self) -> u64 {
        self.core.created_at.elapsed().as_nanos() as u64
    }

    // --- Label -----------------------------------------------------------------------------

    pub fn label(&self) -> &LifxString {
        &self.core.label
    }

    pub fn set_label(&mut self, label: &str) {
        self.core.label = make_label(label);
    }

    // --- Power -------------------------------------------------------------------------------

    pub fn power_level(&self) -> u16 {
        self.core.power_level
    }

    /// Writes clamp to `{0, 65535}` per §3's invariant; any non-zero value is treated as "on".
    pub fn set_power_level(&mut self, level: u16) {
        self.core.power_level = if level == 0 { 0 } else { 65535 };
    }

    // --- Color ---------------------------------------------------------------------------------

    pub fn color(&self) -> HSBK {
        self.core.color
    }

    /// Sets the device's color, clamping `kelvin` to `[1500, 9000]` per §3. On multizone devices
    /// this fills every zone; on matrix devices it fills every tile's visible buffer, matching
    /// the Light.SetColor behavior documented in §4.2's handler table.
    pub fn set_color(&mut self, mut color: HSBK) {
        color.kelvin = color.kelvin.clamp(1500, 9000);
        self.core.color = color;
        if let Some(mz) = &mut self.multizone {
            for zone in &mut mz.zone_colors {
                *zone = color;
            }
        }
        if let Some(matrix) = &mut self.matrix {
            for tile in &mut matrix.tiles {
                if let Some(buf) = &mut tile.framebuffers[0] {
                    for px in buf.iter_mut() {
                        *px = color;
                    }
                }
            }
        }
    }

    // --- Infrared (capability-gated: has_infrared) -------------------------------------------

    pub fn infrared_brightness(&self) -> u16 {
        self.infrared.as_ref().map(|i| i.brightness).unwrap_or(0)
    }

    pub fn set_infrared_brightness(&mut self, brightness: u16) {
        if let Some(ir) = &mut self.infrared {
            ir.brightness = brightness;
        }
    }

    // --- HEV (capability-gated: has_hev) -------------------------------------------------------

    pub fn hev(&self) -> HevState {
        self.hev.unwrap_or_default()
    }

    pub fn start_hev_cycle(&mut self, duration_s: u32) {
        if let Some(hev) = &mut self.hev {
            let duration_s = if duration_s == 0 {
                hev.cycle_duration_s.max(1)
            } else {
                duration_s
            };
            hev.last_power = self.core.power_level != 0;
            hev.cycle_duration_s = duration_s;
            hev.cycle_remaining_s = duration_s;
            self.core.power_level = 65535;
        }
    }

    pub fn stop_hev_cycle(&mut self) {
        if let Some(hev) = &mut self.hev {
            hev.cycle_remaining_s = 0;
            hev.last_result = LastHevCycleResult::InterruptedByLan;
            self.core.power_level = if hev.last_power { 65535 } else { 0 };
        }
    }

    pub fn set_hev_configuration(&mut self, indication: bool, duration_s: u32) {
        if let Some(hev) = &mut self.hev {
            hev.indication = indication;
            hev.cycle_duration_s = duration_s;
        }
    }

    // --- Multizone (capability-gated: has_multizone) -------------------------------------------

    pub fn zone_count(&self) -> u16 {
        self.multizone.as_ref().map(|m| m.zone_count).unwrap_or(0)
    }

    pub fn zone_colors(&self) -> &[HSBK] {
        self.multizone
            .as_ref()
            .map(|m| m.zone_colors.as_slice())
            .unwrap_or(&[])
    }

    /// Sets zones `[start, end]` inclusive, clamped to the valid zone range. A no-op if the
    /// device has no multizone sub-state.
    pub fn set_zone_range(&mut self, start: u16, end: u16, color: HSBK) {
        if let Some(mz) = &mut self.multizone {
            if mz.zone_count == 0 {
                return;
            }
            let last = mz.zone_count - 1;
            let start = start.min(last);
            let end = end.min(last);
            for zone in mz.zone_colors[start as usize..=end as usize].iter_mut() {
                *zone = color;
            }
        }
    }

    pub fn set_multizone_effect(
        &mut self,
        instance_id: u32,
        typ: MultiZoneEffectType,
        speed: u32,
        duration_ns: u64,
    ) {
        if let Some(mz) = &mut self.multizone {
            mz.effect_instance_id = instance_id;
            mz.effect_type = typ;
            mz.effect_speed = speed;
            mz.effect_duration_ns = duration_ns;
        }
    }

    // --- Matrix / tile (capability-gated: has_matrix) ------------------------------------------

    pub fn tile_count(&self) -> u8 {
        self.matrix.as_ref().map(|m| m.tiles.len() as u8).unwrap_or(0)
    }

    pub fn tile_width(&self) -> u8 {
        self.matrix.as_ref().map(|m| m.tile_width).unwrap_or(8)
    }

    pub fn tile_height(&self) -> u8 {
        self.matrix.as_ref().map(|m| m.tile_height).unwrap_or(8)
    }

    pub fn tile_metadata(&self, index: usize) -> Option<TileStateDevice> {
        self.matrix.as_ref().and_then(|m| m.tiles.get(index)).map(|t| t.metadata)
    }

    /// Reads `width` pixels starting at `(x, y)` from `framebuffer_index` on the given tile. A
    /// framebuffer that has never been written to reads back as the device's current color (it
    /// is allocated lazily on first write, per §3).
    pub fn read_tile_rect(
        &self,
        tile_index: usize,
        framebuffer_index: u8,
        x: u8,
        y: u8,
        width: u8,
    ) -> Vec<HSBK> {
        let Some(matrix) = &self.matrix else {
            return Vec::new();
        };
        let Some(tile) = matrix.tiles.get(tile_index) else {
            return Vec::new();
        };
        let tw = matrix.tile_width as usize;
        let th = matrix.tile_height as usize;
        let fallback = vec![self.core.color; tw * th];
        let buf = tile.framebuffers[framebuffer_index as usize % NUM_FRAMEBUFFERS]
            .as_ref()
            .unwrap_or(&fallback);
        read_rect(buf, tw, th, x, y, width)
    }

    /// Writes `colors` into a rectangular region of `framebuffer_index` on the given tile,
    /// allocating that framebuffer on first write (buffer 0 is always pre-allocated).
    pub fn write_tile_rect(
        &mut self,
        tile_index: usize,
        framebuffer_index: u8,
        x: u8,
        y: u8,
        width: u8,
        colors: &[HSBK],
    ) {
        let Some(matrix) = &mut self.matrix else {
            return;
        };
        let tw = matrix.tile_width as usize;
        let th = matrix.tile_height as usize;
        let Some(tile) = matrix.tiles.get_mut(tile_index) else {
            return;
        };
        let slot = &mut tile.framebuffers[framebuffer_index as usize % NUM_FRAMEBUFFERS];
        let buf = slot.get_or_insert_with(|| vec![default_color(3500); tw * th]);
        write_rect(buf, tw, th, x, y, width, colors);
    }

    /// Copies a rectangular region from one framebuffer to another on the same tile, per
    /// [`lifx_core::Message::CopyFrameBuffer`].
    pub fn copy_frame_buffer(
        &mut self,
        tile_index: usize,
        src_index: u8,
        dst_index: u8,
        x: u8,
        y: u8,
        width: u8,
        height: u8,
    ) {
        let pixels: Vec<HSBK> = (0..height)
            .flat_map(|row| self.read_tile_rect(tile_index, src_index, x, y.wrapping_add(row), width).into_iter().take(width as usize))
            .collect();
        // read_tile_rect above reads row by row (y + row); re-assemble by writing row by row too.
        let Some(matrix) = &mut self.matrix else { return };
        let tw = matrix.tile_width as usize;
        let th = matrix.tile_height as usize;
        let Some(tile) = matrix.tiles.get_mut(tile_index) else { return };
        let slot = &mut tile.framebuffers[dst_index as usize % NUM_FRAMEBUFFERS];
        let buf = slot.get_or_insert_with(|| vec![default_color(3500); tw * th]);
        for row in 0..height {
            let start = row as usize * width as usize;
            let end = start + width as usize;
            if let Some(row_pixels) = pixels.get(start..end) {
                write_rect(buf, tw, th, x, y.wrapping_add(row), width, row_pixels);
            }
        }
    }

    // --- Relay (capability-gated: has_relays) --------------------------------------------------

    pub fn relay_power(&self, relay_index: u8) -> u16 {
        self.relays
            .as_ref()
            .and_then(|r| r.levels.get(relay_index as usize))
            .copied()
            .unwrap_or(0)
    }

    pub fn set_relay_power(&mut self, relay_index: u8, level: u16) {
        if let Some(relays) = &mut self.relays {
            if let Some(slot) = relays.levels.get_mut(relay_index as usize) {
                *slot = if level == 0 { 0 } else { 65535 };
            }
        }
    }

    pub fn tile_effect(&self) -> TileEffectState {
        self.matrix.as_ref().map(|m| m.effect).unwrap_or_default()
    }

    pub fn set_tile_effect(&mut self, typ: TileEffectType, speed: u32, duration_ns: u64) {
        if let Some(matrix) = &mut self.matrix {
            matrix.effect = TileEffectState {
                active: !matches!(typ, TileEffectType::Off),
                typ,
                speed,
                duration_ns,
            };
        }
    }
}

fn read_rect(buf: &[HSBK], tile_width: usize, tile_height: usize, x: u8, y: u8, width: u8) -> Vec<HSBK> {
    let mut out = Vec::with_capacity(width as usize);
    for i in 0..width as usize {
        let px = x as usize + i;
        if px >= tile_width || y as usize >= tile_height {
            out.push(HSBK { hue: 0, saturation: 0, brightness: 0, kelvin: 3500 });
            continue;
        }
        out.push(buf[y as usize * tile_width + px]);
    }
    out
}

fn write_rect(buf: &mut [HSBK], tile_width: usize, tile_height: usize, x: u8, y: u8, width: u8, colors: &[HSBK]) {
    for (i, color) in colors.iter().take(width as usize).enumerate() {
        let px = x as usize + i;
        if px >= tile_width || y as usize >= tile_height {
            continue;
        }
        buf[y as usize * tile_width + px] = *color;
    }
}

fn random_device_id() -> DeviceId {
    use rand::RngCore;
    let mut bytes = [0u8; 6];
    // d0:73:d5 is the real LIFX OUI; the low 3 bytes are randomized per virtual device.
    bytes[0] = 0xd0;
    bytes[1] = 0x73;
    bytes[2] = 0xd5;
    rand::thread_rng().fill_bytes(&mut bytes[3..]);
    DeviceId::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(vendor: u32, product: u32) -> DeviceSpec {
        DeviceSpec {
            vendor,
            product,
            id: Some(DeviceId::from_bytes([0xd0, 0x73, 0xd5, 0x00, 0x00, 0x01])),
            ..Default::default()
        }
    }

    #[test]
    fn color_bulb_defaults() {
        let d = DeviceState::create(spec(1, 27)).unwrap();
        assert!(d.capabilities.has_color);
        assert_eq!(d.zone_count(), 0);
        assert_eq!(d.tile_width(), 8);
    }

    #[test]
    fn set_color_clamps_kelvin() {
        let mut d = DeviceState::create(spec(1, 27)).unwrap();
        d.set_color(HSBK {
            hue: 1,
            saturation: 2,
            brightness: 3,
            kelvin: 20000,
        });
        assert_eq!(d.color().kelvin, 9000);
        d.set_color(HSBK {
            hue: 1,
            saturation: 2,
            brightness: 3,
            kelvin: 100,
        });
        assert_eq!(d.color().kelvin, 1500);
    }

    #[test]
    fn multizone_device_fills_all_zones_on_set_color() {
        let mut d = DeviceState::create(spec(1, 31)).unwrap();
        assert_eq!(d.zone_count(), 8);
        let color = HSBK {
            hue: 100,
            saturation: 200,
            brightness: 300,
            kelvin: 4000,
        };
        d.set_color(color);
        assert!(d.zone_colors().iter().all(|&c| c == color));
    }

    #[test]
    fn infrared_write_on_device_without_infrared_is_a_no_op() {
        let mut d = DeviceState::create(spec(1, 27)).unwrap();
        assert!(!d.capabilities.has_infrared);
        d.set_infrared_brightness(12345);
        assert_eq!(d.infrared_brightness(), 0);
    }

    #[test]
    fn tile_write_allocates_non_visible_framebuffer_lazily() {
        let mut d = DeviceState::create(spec(1, 55)).unwrap();
        assert_eq!(d.tile_count(), 5);
        let colors = vec![
            HSBK {
                hue: 1,
                saturation: 1,
                brightness: 1,
                kelvin: 3500
            };
            4
        ];
        d.write_tile_rect(0, 2, 0, 0, 4, &colors);
        let read_back = d.read_tile_rect(0, 2, 0, 0, 4);
        assert_eq!(read_back, colors);
    }

    #[test]
    fn switch_has_no_multizone_or_matrix() {
        let d = DeviceState::create(spec(1, 70)).unwrap();
        assert!(d.capabilities.is_switch());
        assert_eq!(d.zone_count(), 0);
        assert_eq!(d.tile_count(), 0);
    }

    #[test]
    fn switch_relay_power_round_trips() {
        let mut d = DeviceState::create(spec(1, 70)).unwrap();
        assert_eq!(d.relay_power(0), 0);
        d.set_relay_power(0, 65535);
        assert_eq!(d.relay_power(0), 65535);
        assert_eq!(d.relay_power(1), 0);
    }

    #[test]
    fn relay_write_on_device_without_relays_is_a_no_op() {
        let mut d = DeviceState::create(spec(1, 27)).unwrap();
        assert!(!d.capabilities.has_relays);
        d.set_relay_power(0, 65535);
        assert_eq!(d.relay_power(0), 0);
    }
}
