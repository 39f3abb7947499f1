//! Handlers for the Relay namespace (816-818): LIFX Switch relay power control. Gated on
//! `has_relays`; this emulator models relay state as a fixed-size array sized at device creation.

use lifx_core::Message;

use crate::device::DeviceState;

pub fn handle(state: &mut DeviceState, msg: &Message) -> Vec<Message> {
    match *msg {
        Message::RelayGetPower { relay_index } => vec![Message::RelayStatePower {
            relay_index,
            level: state.relay_power(relay_index),
        }],

        Message::RelaySetPower { relay_index, level } => {
            state.set_relay_power(relay_index, level);
            vec![Message::RelayStatePower {
                relay_index,
                level: state.relay_power(relay_index),
            }]
        }

        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceSpec;
    use crate::ids::DeviceId;

    fn switch() -> DeviceState {
        DeviceState::create(DeviceSpec {
            vendor: 1,
            product: 70,
            id: Some(DeviceId::from_bytes([0xd0, 0x73, 0xd5, 0xff, 0x00, 0x70])),
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn set_power_then_get_round_trips_per_relay() {
        let mut d = switch();
        let responses = handle(
            &mut d,
            &Message::RelaySetPower {
                relay_index: 2,
                level: 1,
            },
        );
        assert!(matches!(
            responses.as_slice(),
            [Message::RelayStatePower { relay_index: 2, level: 65535 }]
        ));

        let responses = handle(&mut d, &Message::RelayGetPower { relay_index: 0 });
        assert!(matches!(
            responses.as_slice(),
            [Message::RelayStatePower { relay_index: 0, level: 0 }]
        ));
    }
}
