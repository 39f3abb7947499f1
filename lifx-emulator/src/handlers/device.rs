//! Handlers for the Device namespace (2-59): service discovery, host/wifi info, power, label,
//! version, runtime info, location, group, and echo. Always present, per §3.

use lifx_core::{Message, PowerLevel, Service};

use crate::device::DeviceState;

pub fn handle(state: &mut DeviceState, msg: &Message) -> Vec<Message> {
    match *msg {
        Message::GetService => vec![Message::StateService {
            service: Service::UDP,
            port: state.core.port as u32,
        }],

        Message::GetHostInfo => vec![Message::StateHostInfo {
            signal: state.network.wifi_signal_dbm,
            tx: 0,
            rx: 0,
            reserved: 0,
        }],

        Message::GetHostFirmware => vec![Message::StateHostFirmware {
            build: state.core.firmware_build,
            reserved: 0,
            version_minor: state.core.firmware_minor,
            version_major: state.core.firmware_major,
        }],

        Message::GetWifiInfo => vec![Message::StateWifiInfo {
            signal: state.network.wifi_signal_dbm,
            reserved6: 0,
            reserved7: 0,
            reserved: 0,
        }],

        Message::GetWifiFirmware => vec![Message::StateWifiFirmware {
            build: state.core.firmware_build,
            reserved: 0,
            version_minor: 0,
            version_major: 0,
        }],

        Message::GetPower => vec![Message::StatePower {
            level: state.power_level(),
        }],

        Message::SetPower { level } => {
            state.set_power_level(match level {
                PowerLevel::Standby => 0,
                PowerLevel::Enabled => 65535,
            });
            vec![Message::StatePower {
                level: state.power_level(),
            }]
        }

        Message::GetLabel => vec![Message::StateLabel {
            label: state.label().clone(),
        }],

        Message::SetLabel { ref label } => {
            state.set_label(&label.cstr().to_string_lossy());
            vec![Message::StateLabel {
                label: state.label().clone(),
            }]
        }

        Message::GetVersion => vec![Message::StateVersion {
            vendor: state.core.vendor,
            product: state.core.product,
            reserved: 0,
        }],

        Message::GetInfo => vec![Message::StateInfo {
            time: now_ns(),
            uptime: state.uptime_ns(),
            downtime: 0,
        }],

        Message::GetLocation => vec![Message::StateLocation {
            location: state.location.id.as_lifx_ident(),
            label: state.location.label.clone(),
            updated_at: state.location.updated_at,
        }],

        Message::SetLocation {
            ref location,
            ref label,
            updated_at,
        } => {
            state.location.id = location.clone().into();
            state.location.label = crate::device::make_label(&label.cstr().to_string_lossy());
            state.location.updated_at = updated_at;
            vec![Message::StateLocation {
                location: state.location.id.as_lifx_ident(),
                label: state.location.label.clone(),
                updated_at: state.location.updated_at,
            }]
        }

        Message::GetGroup => vec![Message::StateGroup {
            group: state.group.id.as_lifx_ident(),
            label: state.group.label.clone(),
            updated_at: state.group.updated_at,
        }],

        Message::SetGroup {
            ref group,
            ref label,
            updated_at,
        } => {
            state.group.id = group.clone().into();
            state.group.label = crate::device::make_label(&label.cstr().to_string_lossy());
            state.group.updated_at = updated_at;
            vec![Message::StateGroup {
                group: state.group.id.as_lifx_ident(),
                label: state.group.label.clone(),
                updated_at: state.group.updated_at,
            }]
        }

        Message::EchoRequest { payload } => vec![Message::EchoResponse { payload }],

        // Acknowledgement is a response type, never a request this device should dispatch on.
        Message::Acknowledgement { .. } => Vec::new(),

        _ => Vec::new(),
    }
}

fn now_ns() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceSpec;
    use crate::ids::DeviceId;

    fn bulb() -> DeviceState {
        DeviceState::create(DeviceSpec {
            vendor: 1,
            product: 27,
            id: Some(DeviceId::from_bytes([0xd0, 0x73, 0xd5, 0x00, 0x00, 0x01])),
            port: Some(56700),
            ..Default::default()
        })
        .unwrap()
    }

    /// E1: GetService always answers with the UDP service kind and the device's port.
    #[test]
    fn get_service_reports_udp_and_port() {
        let mut d = bulb();
        let responses = handle(&mut d, &Message::GetService);
        assert!(matches!(
            responses.as_slice(),
            [Message::StateService { service: Service::UDP, port: 56700 }]
        ));
    }

    #[test]
    fn set_label_truncates_to_32_bytes() {
        let mut d = bulb();
        let long = "x".repeat(60);
        handle(&mut d, &Message::SetLabel { label: crate::device::make_label(&long) });
        assert!(d.label().cstr().to_bytes().len() <= 32);
    }

    #[test]
    fn set_power_clamps_to_on_or_off() {
        let mut d = bulb();
        handle(&mut d, &Message::SetPower { level: PowerLevel::Enabled });
        assert_eq!(d.power_level(), 65535);
        handle(&mut d, &Message::SetPower { level: PowerLevel::Standby });
        assert_eq!(d.power_level(), 0);
    }

    #[test]
    fn echo_request_echoes_the_payload() {
        let mut d = bulb();
        let payload = lifx_core::EchoPayload([7u8; 64]);
        let responses = handle(&mut d, &Message::EchoRequest { payload });
        assert!(matches!(
            responses.as_slice(),
            [Message::EchoResponse { payload: p }] if p.0 == payload.0
        ));
    }
}
