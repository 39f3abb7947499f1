//! Handlers for the Light namespace (101-149): color, waveform, power, infrared, HEV cycles.
//! Only dispatched to devices with `has_color` (§3); a switch never reaches this module because
//! [`crate::handlers::supports`] gates it first.

use lifx_core::Message;

use crate::device::DeviceState;

pub fn handle(state: &mut DeviceState, msg: &Message) -> Vec<Message> {
    match *msg {
        Message::LightGet => vec![light_state(state)],

        Message::LightSetColor { color, .. } => {
            state.set_color(color);
            vec![light_state(state)]
        }

        Message::SetWaveform {
            transient,
            color,
            period,
            cycles,
            skew_ratio,
            waveform,
            ..
        } => {
            apply_waveform(state, transient, color, period, cycles, skew_ratio, waveform);
            vec![light_state(state)]
        }

        Message::SetWaveformOptional {
            transient,
            color,
            period,
            cycles,
            skew_ratio,
            waveform,
            set_hue,
            set_saturation,
            set_brightness,
            set_kelvin,
            ..
        } => {
            let mut target = color;
            let current = state.color();
            if !set_hue {
                target.hue = current.hue;
            }
            if !set_saturation {
                target.saturation = current.saturation;
            }
            if !set_brightness {
                target.brightness = current.brightness;
            }
            if !set_kelvin {
                target.kelvin = current.kelvin;
            }
            apply_waveform(state, transient, target, period, cycles, skew_ratio, waveform);
            vec![light_state(state)]
        }

        Message::LightGetPower => vec![Message::LightStatePower {
            level: state.power_level(),
        }],

        Message::LightSetPower { level, .. } => {
            state.set_power_level(level);
            vec![Message::LightStatePower {
                level: state.power_level(),
            }]
        }

        Message::LightGetInfrared => vec![Message::LightStateInfrared {
            brightness: state.infrared_brightness(),
        }],

        Message::LightSetInfrared { brightness } => {
            state.set_infrared_brightness(brightness);
            vec![Message::LightStateInfrared {
                brightness: state.infrared_brightness(),
            }]
        }

        Message::LightGetHevCycle => vec![hev_state(state)],

        Message::LightSetHevCycle { enable, duration } => {
            if enable {
                state.start_hev_cycle(duration);
            } else {
                state.stop_hev_cycle();
            }
            vec![hev_state(state)]
        }

        Message::LightGetHevCycleConfiguration => vec![hev_configuration(state)],

        Message::LightSetHevCycleConfiguration { indication, duration } => {
            state.set_hev_configuration(indication, duration);
            vec![hev_configuration(state)]
        }

        Message::LightGetLastHevCycleResult => {
            vec![Message::LightStateLastHevCycleResult {
                result: state.hev().last_result,
            }]
        }

        _ => Vec::new(),
    }
}

fn light_state(state: &DeviceState) -> Message {
    Message::LightState {
        color: state.color(),
        reserved: 0,
        power: state.power_level(),
        label: state.label().clone(),
        reserved2: 0,
    }
}

fn hev_state(state: &DeviceState) -> Message {
    let hev = state.hev();
    Message::LightStateHevCycle {
        duration: hev.cycle_duration_s,
        remaining: hev.cycle_remaining_s,
        last_power: hev.last_power,
    }
}

fn hev_configuration(state: &DeviceState) -> Message {
    let hev = state.hev();
    Message::LightStateHevCycleConfiguration {
        indication: hev.indication,
        duration: hev.cycle_duration_s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceSpec;
    use crate::ids::DeviceId;
    use lifx_core::HSBK;

    fn bulb() -> DeviceState {
        DeviceState::create(DeviceSpec {
            vendor: 1,
            product: 27,
            id: Some(DeviceId::from_bytes([0xd0, 0x73, 0xd5, 0x00, 0x00, 0x01])),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn set_color_then_get_returns_the_color_set() {
        let mut d = bulb();
        let color = HSBK {
            hue: 21845,
            saturation: 65535,
            brightness: 32768,
            kelvin: 3500,
        };
        let responses = handle(
            &mut d,
            &Message::LightSetColor {
                reserved: 0,
                color,
                duration: 0,
            },
        );
        match responses.as_slice() {
            [Message::LightState { color: c, power, .. }] => {
                assert_eq!(*c, color);
                assert_eq!(*power, d.power_level());
            }
            other => panic!("unexpected response: {other:?}"),
        }

        let responses = handle(&mut d, &Message::LightGet);
        assert!(matches!(
            responses.as_slice(),
            [Message::LightState { color: c, .. }] if *c == color
        ));
    }

    #[test]
    fn set_waveform_non_transient_leaves_color_in_place() {
        let mut d = bulb();
        let color = HSBK {
            hue: 1000,
            saturation: 2000,
            brightness: 3000,
            kelvin: 4000,
        };
        handle(
            &mut d,
            &Message::SetWaveform {
                reserved: 0,
                transient: false,
                color,
                period: 1000,
                cycles: 3.0,
                skew_ratio: 0,
                waveform: lifx_core::Waveform::Sine,
            },
        );
        assert_eq!(d.color(), color);
        assert!(d.waveform.active);
    }

    #[test]
    fn set_infrared_on_infrared_capable_device_round_trips() {
        let mut d = DeviceState::create(DeviceSpec {
            vendor: 1,
            product: 29,
            id: Some(DeviceId::from_bytes([0xd0, 0x73, 0xd5, 0x00, 0x00, 0x02])),
            ..Default::default()
        })
        .unwrap();
        assert!(d.capabilities.has_infrared);
        let responses = handle(&mut d, &Message::LightSetInfrared { brightness: 12345 });
        assert!(matches!(
            responses.as_slice(),
            [Message::LightStateInfrared { brightness: 12345 }]
        ));
    }

    #[test]
    fn hev_cycle_start_and_stop_round_trip() {
        let mut d = DeviceState::create(DeviceSpec {
            vendor: 1,
            product: 90,
            id: Some(DeviceId::from_bytes([0xd0, 0x73, 0xd5, 0x00, 0x00, 0x03])),
            ..Default::default()
        })
        .unwrap();
        assert!(d.capabilities.has_hev);
        let responses = handle(
            &mut d,
            &Message::LightSetHevCycle {
                enable: true,
                duration: 60,
            },
        );
        assert!(matches!(
            responses.as_slice(),
            [Message::LightStateHevCycle { duration: 60, remaining: 60, .. }]
        ));

        let responses = handle(&mut d, &Message::LightSetHevCycle { enable: false, duration: 0 });
        assert!(matches!(
            responses.as_slice(),
            [Message::LightStateHevCycle { remaining: 0, .. }]
        ));
    }
}

#[allow(clippy::too_many_arguments)]
fn apply_waveform(
    state: &mut DeviceState,
    transient: bool,
    color: lifx_core::HSBK,
    period: u32,
    cycles: f32,
    skew_ratio: i16,
    waveform: lifx_core::Waveform,
) {
    state.waveform.active = true;
    state.waveform.transient = transient;
    state.waveform.color = color;
    state.waveform.period_ms = period;
    state.waveform.cycles = cycles;
    state.waveform.skew_ratio = skew_ratio;
    state.waveform.waveform = waveform;
    // Non-transient waveforms leave the device showing the waveform's target color once the
    // effect completes; the emulator applies it immediately rather than modeling the transition.
    if !transient {
        state.set_color(color);
    }
}
