//! The handler registry (§4.2): one dispatch function per packet namespace, organized as a
//! `match` over [`lifx_core::Message`] rather than a runtime-built table, per §4.2a.

mod device;
mod light;
mod multizone;
mod relay;
mod tile;

use lifx_core::Message;

use crate::device::DeviceState;

/// Whether a message is a `Get*`-style query. Queries always elicit their `State*` response
/// regardless of `res_required`; `Set*` messages only do when the caller asked for it. This
/// mirrors the real protocol's behavior, not a detail this emulator invented.
pub fn is_query(msg: &Message) -> bool {
    matches!(
        msg,
        Message::GetService
            | Message::GetHostInfo
            | Message::GetHostFirmware
            | Message::GetWifiInfo
            | Message::GetWifiFirmware
            | Message::GetPower
            | Message::GetLabel
            | Message::GetVersion
            | Message::GetInfo
            | Message::GetLocation
            | Message::GetGroup
            | Message::LightGet
            | Message::LightGetPower
            | Message::LightGetInfrared
            | Message::LightGetHevCycle
            | Message::LightGetHevCycleConfiguration
            | Message::LightGetLastHevCycleResult
            | Message::GetColorZones
            | Message::GetMultiZoneEffect
            | Message::GetExtendedColorZone
            | Message::GetDeviceChain
            | Message::GetTileEffect
            | Message::RelayGetPower
    )
}

/// Namespace a packet type number belongs to, used to decide whether a device without the
/// relevant capability should answer `StateUnhandled` instead of dispatching at all.
///
/// `Infrared` (120-122) and `Hev` (142-148) are carved out of the broader Light range (101-199)
/// rather than folded into `Light`: §4.2 gates them on `has_infrared`/`has_hev` individually, not
/// on `has_color`, so a color-only bulb must answer `StateUnhandled` for `LightGetInfrared` even
/// though it answers `LightGet` normally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Namespace {
    Device,
    Light,
    Infrared,
    Hev,
    MultiZone,
    Tile,
    Relay,
}

pub fn namespace_of(packet_type: u16) -> Namespace {
    match packet_type {
        120..=122 => Namespace::Infrared,
        142..=148 => Namespace::Hev,
        101..=199 => Namespace::Light,
        501..=512 => Namespace::MultiZone,
        701..=720 => Namespace::Tile,
        816..=818 => Namespace::Relay,
        _ => Namespace::Device,
    }
}

/// Whether `state` has the capability a namespace requires. Device-namespace messages (power,
/// label, location, ...) are always handled; the rest are gated, matching §4.2's "unsupported
/// namespace -> StateUnhandled" rule.
pub fn supports(state: &DeviceState, namespace: Namespace) -> bool {
    match namespace {
        Namespace::Device => true,
        Namespace::Light => state.capabilities.has_color,
        Namespace::Infrared => state.capabilities.has_infrared,
        Namespace::Hev => state.capabilities.has_hev,
        Namespace::MultiZone => state.capabilities.has_multizone,
        Namespace::Tile => state.capabilities.has_matrix,
        Namespace::Relay => state.capabilities.has_relays,
    }
}

/// Dispatches one decoded message against device state, returning the response(s) a real
/// device would queue. Does not decide ack/res_required gating or `StateUnhandled` fallback;
/// see [`crate::transport`] for that sequencing.
pub fn dispatch(state: &mut DeviceState, msg: &Message) -> Vec<Message> {
    match namespace_of(msg.get_num()) {
        Namespace::Device => device::handle(state, msg),
        Namespace::Light | Namespace::Infrared | Namespace::Hev => light::handle(state, msg),
        Namespace::MultiZone => multizone::handle(state, msg),
        Namespace::Tile => tile::handle(state, msg),
        Namespace::Relay => relay::handle(state, msg),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceSpec, DeviceState};
    use crate::ids::DeviceId;

    fn device(vendor: u32, product: u32) -> DeviceState {
        DeviceState::create(DeviceSpec {
            vendor,
            product,
            id: Some(DeviceId::from_bytes([0xd0, 0x73, 0xd5, 0xff, 0x00, 0x70])),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn namespace_of_carves_infrared_and_hev_out_of_light() {
        assert_eq!(namespace_of(102), Namespace::Light); // LightSetColor
        assert_eq!(namespace_of(120), Namespace::Infrared); // LightGetInfrared
        assert_eq!(namespace_of(143), Namespace::Hev); // LightSetHevCycle
        assert_eq!(namespace_of(501), Namespace::MultiZone);
        assert_eq!(namespace_of(701), Namespace::Tile);
        assert_eq!(namespace_of(816), Namespace::Relay);
        assert_eq!(namespace_of(20), Namespace::Device);
    }

    #[test]
    fn switch_lacks_light_infrared_and_matrix_support() {
        let switch = device(1, 70);
        assert!(switch.capabilities.is_switch());
        assert!(!supports(&switch, Namespace::Light));
        assert!(!supports(&switch, Namespace::Infrared));
        assert!(!supports(&switch, Namespace::MultiZone));
        assert!(!supports(&switch, Namespace::Tile));
        assert!(supports(&switch, Namespace::Relay));
        assert!(supports(&switch, Namespace::Device));
    }

    #[test]
    fn color_bulb_lacks_multizone_tile_and_relay_support() {
        let bulb = device(1, 27);
        assert!(supports(&bulb, Namespace::Light));
        assert!(!supports(&bulb, Namespace::MultiZone));
        assert!(!supports(&bulb, Namespace::Tile));
        assert!(!supports(&bulb, Namespace::Relay));
    }

    #[test]
    fn is_query_distinguishes_get_from_set() {
        assert!(is_query(&Message::LightGet));
        assert!(!is_query(&Message::LightSetColor {
            reserved: 0,
            color: lifx_core::HSBK {
                hue: 0,
                saturation: 0,
                brightness: 0,
                kelvin: 3500,
            },
            duration: 0,
        }));
    }

    #[test]
    fn dispatch_routes_by_namespace() {
        let mut bulb = device(1, 27);
        let responses = dispatch(&mut bulb, &Message::LightGet);
        assert!(matches!(responses.as_slice(), [Message::LightState { .. }]));
    }
}
