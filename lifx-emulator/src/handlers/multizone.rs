//! Handlers for the MultiZone namespace (501-512): per-zone color control, zone effects, and
//! the extended (single-packet, up to 82 zones) variants gated on `has_extended_multizone`.

use lifx_core::{ApplicationRequest, Message, MultiZoneEffectType, HSBK};

use crate::device::DeviceState;

const EXTENDED_ZONES_PER_PACKET: usize = 82;

pub fn handle(state: &mut DeviceState, msg: &Message) -> Vec<Message> {
    match *msg {
        Message::SetColorZones {
            start_index,
            end_index,
            color,
            apply,
            ..
        } => {
            // `ApplyOnly` means "ignore the requested changes in this message and only apply
            // pending changes" (lifx-core's `ApplicationRequest` docs); this emulator has no
            // staging buffer for `NoApply` writes, so the only contract-safe behavior is to
            // treat `ApplyOnly` as a no-op rather than alias it to `Apply`.
            if matches!(apply, ApplicationRequest::Apply) {
                state.set_zone_range(start_index as u16, end_index as u16, color);
            }
            set_color_zones_response(state, start_index)
        }

        Message::GetColorZones {
            start_index,
            end_index,
        } => state_zone_responses(state, start_index, end_index),

        Message::GetMultiZoneEffect => vec![multizone_effect_state(state)],

        Message::SetMultiZoneEffect {
            instance_id,
            typ,
            speed,
            duration,
            ..
        } => {
            state.set_multizone_effect(instance_id, typ, speed, duration);
            vec![multizone_effect_state(state)]
        }

        Message::GetExtendedColorZone => extended_state_responses(state),

        Message::SetExtendedColorZones {
            apply,
            zone_index,
            colors_count,
            colors,
            ..
        } => {
            // See the `SetColorZones` arm above: `ApplyOnly` has no staged writes to commit in
            // this emulator, so it is a no-op rather than an alias for `Apply`.
            if matches!(apply, ApplicationRequest::Apply) {
                let end = zone_index.saturating_add(colors_count.max(1) as u16).saturating_sub(1);
                let mut idx = zone_index;
                for color in colors.iter().take(colors_count as usize) {
                    state.set_zone_range(idx, idx, *color);
                    idx = idx.saturating_add(1);
                }
                let _ = end;
            }
            extended_state_responses(state)
        }

        _ => Vec::new(),
    }
}

/// Builds a single `StateMultiZone` covering the 8-zone window starting at `idx`, padding past
/// `zone_count` with a blank color.
fn zone_window(state: &DeviceState, idx: u8) -> Message {
    let count = state.zone_count();
    let colors = state.zone_colors();
    let window: Vec<HSBK> = (0..8)
        .map(|i| {
            let zone = idx as usize + i;
            colors.get(zone).copied().unwrap_or(HSBK {
                hue: 0,
                saturation: 0,
                brightness: 0,
                kelvin: 3500,
            })
        })
        .collect();
    Message::StateMultiZone {
        count: count as u8,
        index: idx,
        color0: window[0],
        color1: window[1],
        color2: window[2],
        color3: window[3],
        color4: window[4],
        color5: window[5],
        color6: window[6],
        color7: window[7],
    }
}

/// Builds the `StateMultiZone` sequence covering `[start, end]`, following the documented rule
/// that a device may reply with more coverage than requested: this emulator always packs the
/// whole requested range using `StateMultiZone` 8-zone windows, per §4.2's "one or more
/// StateMultiZone (8 zones each) covering [start..end]" and Testable Property #5's exact
/// `ceil(Z/8)`-response count for `GetColorZones(0, Z-1)`.
fn state_zone_responses(state: &DeviceState, start: u8, end: u8) -> Vec<Message> {
    let count = state.zone_count();
    if count == 0 {
        return Vec::new();
    }
    let start = start.min(count.saturating_sub(1) as u8);
    let end = end.min(count.saturating_sub(1) as u8);

    let mut out = Vec::new();
    let mut idx = start;
    while idx <= end {
        out.push(zone_window(state, idx));
        idx = match idx.checked_add(8) {
            Some(n) if n <= end => n,
            _ => break,
        };
    }
    out
}

/// Builds the single-window response `SetColorZones` produces, anchored at `start_index`. Unlike
/// `GetColorZones`, §4.2 documents this as "0 or 1 StateMultiZone depending on `apply` and
/// `res_required`" rather than "one or more" covering the whole range: the "0" case is left to
/// the transport layer's `res_required`/is-query gating, so this always builds the one window a
/// client would see if it does get a response.
fn set_color_zones_response(state: &DeviceState, start_index: u8) -> Vec<Message> {
    if state.zone_count() == 0 {
        return Vec::new();
    }
    let start = start_index.min(state.zone_count().saturating_sub(1) as u8);
    vec![zone_window(state, start)]
}

fn multizone_effect_state(state: &DeviceState) -> Message {
    let mz = state.multizone.as_ref();
    Message::StateMultiZoneEffect {
        instance_id: mz.map(|m| m.effect_instance_id).unwrap_or(0),
        typ: mz.map(|m| m.effect_type).unwrap_or(MultiZoneEffectType::Off),
        reserved: 0,
        speed: mz.map(|m| m.effect_speed).unwrap_or(0),
        duration: mz.map(|m| m.effect_duration_ns).unwrap_or(0),
        reserved7: 0,
        reserved8: 0,
        parameters: [0u8; 32],
    }
}

/// Paginates the whole zone array into `ceil(zone_count / 82)` `StateExtendedColorZones`
/// packets, one per 82-zone window starting at 0, 82, 164, ... covering every zone regardless
/// of how large `zone_count` is.
fn extended_state_responses(state: &DeviceState) -> Vec<Message> {
    let colors_all = state.zone_colors();
    if colors_all.is_empty() {
        return vec![extended_window(state, 0, colors_all)];
    }

    let mut out = Vec::new();
    let mut start = 0usize;
    while start < colors_all.len() {
        out.push(extended_window(state, start as u16, &colors_all[start..]));
        start += EXTENDED_ZONES_PER_PACKET;
    }
    out
}

fn extended_window(state: &DeviceState, zone_index: u16, remaining: &[HSBK]) -> Message {
    let mut colors = [HSBK {
        hue: 0,
        saturation: 0,
        brightness: 0,
        kelvin: 3500,
    }; EXTENDED_ZONES_PER_PACKET];
    let n = remaining.len().min(EXTENDED_ZONES_PER_PACKET);
    colors[..n].copy_from_slice(&remaining[..n]);
    Message::StateExtendedColorZones {
        zones_count: state.zone_count(),
        zone_index,
        colors_count: n as u8,
        colors,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceSpec;
    use crate::ids::DeviceId;

    fn strip(zone_count: u16) -> DeviceState {
        let mut d = DeviceState::create(DeviceSpec {
            vendor: 1,
            product: 31,
            id: Some(DeviceId::from_bytes([0xd0, 0x73, 0xd5, 0x00, 0x01, 0x00])),
            zone_count: Some(zone_count),
            ..Default::default()
        })
        .unwrap();
        for i in 0..zone_count {
            let color = HSBK {
                hue: i * 100,
                saturation: 65535,
                brightness: 65535,
                kelvin: 3500,
            };
            d.set_zone_range(i, i, color);
        }
        d
    }

    /// Testable Property #5 / E3: `GetColorZones(0, Z-1)` on a `zone_count = Z` device produces
    /// exactly `ceil(Z/8)` `StateMultiZone` responses whose concatenated zones reconstruct the
    /// device's current zone array.
    #[test]
    fn get_color_zones_paginates_into_ceil_z_over_8_responses() {
        let d = strip(20);
        let responses = handle(
            &mut d.clone(),
            &Message::GetColorZones {
                start_index: 0,
                end_index: 19,
            },
        );
        assert_eq!(responses.len(), 3);

        let indices: Vec<u8> = responses
            .iter()
            .map(|m| match m {
                Message::StateMultiZone { index, .. } => *index,
                other => panic!("expected StateMultiZone, got {other:?}"),
            })
            .collect();
        assert_eq!(indices, vec![0, 8, 16]);

        let mut reconstructed = Vec::new();
        for response in &responses {
            if let Message::StateMultiZone {
                color0,
                color1,
                color2,
                color3,
                color4,
                color5,
                color6,
                color7,
                ..
            } = response
            {
                reconstructed.extend([
                    *color0, *color1, *color2, *color3, *color4, *color5, *color6, *color7,
                ]);
            }
        }
        reconstructed.truncate(20);
        assert_eq!(reconstructed, d.zone_colors());
    }

    #[test]
    fn single_zone_range_still_produces_state_multi_zone() {
        let d = strip(20);
        let responses = handle(
            &mut d.clone(),
            &Message::GetColorZones {
                start_index: 5,
                end_index: 5,
            },
        );
        assert_eq!(responses.len(), 1);
        assert!(matches!(responses[0], Message::StateMultiZone { index: 5, .. }));
    }

    /// Testable Property #6: an extended-multizone device's `GetExtendedColorZone` covers the
    /// full zone array in `ceil(Z/82)` responses.
    #[test]
    fn get_extended_color_zone_paginates_into_ceil_z_over_82_responses() {
        let mut d = DeviceState::create(DeviceSpec {
            vendor: 1,
            product: 117,
            id: Some(DeviceId::from_bytes([0xd0, 0x73, 0xd5, 0x00, 0x01, 0x01])),
            zone_count: Some(164),
            ..Default::default()
        })
        .unwrap();
        assert!(d.capabilities.has_extended_multizone);

        let responses = handle(&mut d, &Message::GetExtendedColorZone);
        assert_eq!(responses.len(), 2);
        assert!(matches!(
            responses[0],
            Message::StateExtendedColorZones { zone_index: 0, colors_count: 82, .. }
        ));
        assert!(matches!(
            responses[1],
            Message::StateExtendedColorZones { zone_index: 82, colors_count: 82, .. }
        ));
    }

    #[test]
    fn set_color_zones_with_apply_writes_the_requested_range() {
        let mut d = strip(20);
        let color = HSBK {
            hue: 9999,
            saturation: 1,
            brightness: 1,
            kelvin: 3500,
        };
        handle(
            &mut d,
            &Message::SetColorZones {
                start_index: 2,
                end_index: 4,
                color,
                duration: 0,
                apply: ApplicationRequest::Apply,
            },
        );
        assert_eq!(d.zone_colors()[2], color);
        assert_eq!(d.zone_colors()[3], color);
        assert_eq!(d.zone_colors()[4], color);
        assert_ne!(d.zone_colors()[1], color);
    }

    #[test]
    fn set_color_zones_no_apply_does_not_mutate_state() {
        let mut d = strip(20);
        let before = d.zone_colors().to_vec();
        handle(
            &mut d,
            &Message::SetColorZones {
                start_index: 0,
                end_index: 5,
                color: HSBK {
                    hue: 1,
                    saturation: 1,
                    brightness: 1,
                    kelvin: 3500,
                },
                duration: 0,
                apply: ApplicationRequest::NoApply,
            },
        );
        assert_eq!(d.zone_colors(), before.as_slice());
    }

    /// `ApplyOnly` is documented as "ignore the requested changes in this message and only apply
    /// pending changes"; with no staging buffer, the safe contract is a no-op, not an alias for
    /// `Apply`.
    #[test]
    fn set_color_zones_apply_only_does_not_mutate_state() {
        let mut d = strip(20);
        let before = d.zone_colors().to_vec();
        handle(
            &mut d,
            &Message::SetColorZones {
                start_index: 0,
                end_index: 5,
                color: HSBK {
                    hue: 1,
                    saturation: 1,
                    brightness: 1,
                    kelvin: 3500,
                },
                duration: 0,
                apply: ApplicationRequest::ApplyOnly,
            },
        );
        assert_eq!(d.zone_colors(), before.as_slice());
    }
}
