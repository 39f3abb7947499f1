//! The UDP server (§4.7): owns the socket, sequences scenario rules against the handler
//! registry, and builds response headers. Per §4.7a this is the one place the emulator reaches
//! for an async runtime, since none of the teacher's example repos run a non-blocking UDP
//! server of this shape.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use lifx_core::{BuildOptions, Message, RawMessage};
use rand::rngs::ThreadRng;
use tokio::net::UdpSocket;

use crate::handlers;
use crate::ids::DeviceId;
use crate::manager::{scenario_context, DeviceManager, ManagedDevice};
use crate::persistence::{self, PersistenceHandle};
use crate::scenario::{self, MergedRules, ScenarioEngine};

/// Minimum legal datagram size: the 36-byte header with an empty payload (§4.1, pipeline step 2).
const MIN_DATAGRAM_LEN: usize = 36;

/// Owns the bound socket and the collaborators the pipeline dispatches into. Cheap to clone:
/// every field is already an `Arc` or a cloneable handle, so each inbound datagram's per-device
/// work can be spawned onto its own task without any of this being re-created.
#[derive(Clone)]
pub struct Server {
    socket: Arc<UdpSocket>,
    devices: Arc<DeviceManager>,
    scenarios: Arc<ScenarioEngine>,
    persistence: PersistenceHandle,
}

impl Server {
    pub async fn bind(
        addr: SocketAddr,
        devices: Arc<DeviceManager>,
        scenarios: Arc<ScenarioEngine>,
        persistence: PersistenceHandle,
    ) -> std::io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        log::info!("lifx-emulator listening on {addr}");
        Ok(Server {
            socket: Arc::new(socket),
            devices,
            scenarios,
            persistence,
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Runs the receive loop until `shutdown` fires. Each datagram is handled on its own
    /// `tokio::task` so a slow `response_delays` wait for one device never blocks the next
    /// datagram's reception, matching §5's cross-device independence.
    pub async fn run(self, mut shutdown: tokio::sync::mpsc::Receiver<()>) {
        let mut buf = [0u8; 2048];
        loop {
            tokio::select! {
                biased;

                _ = shutdown.recv() => {
                    log::info!("transport shutting down");
                    return;
                }

                result = self.socket.recv_from(&mut buf) => {
                    match result {
                        Ok((len, peer)) => {
                            let datagram = buf[..len].to_vec();
                            let server = self.clone();
                            tokio::spawn(async move {
                                server.handle_datagram(datagram, peer).await;
                            });
                        }
                        Err(e) => {
                            log::warn!("recv_from failed: {e}");
                        }
                    }
                }
            }
        }
    }

    /// Pipeline steps 2-3 (§4.7): length check and header/payload decode. Anything that fails
    /// here is simply dropped, per the wire-level invariant that malformed input never reaches a
    /// handler or produces an error response.
    async fn handle_datagram(&self, datagram: Vec<u8>, peer: SocketAddr) {
        if datagram.len() < MIN_DATAGRAM_LEN {
            log::debug!(
                "dropping datagram from {peer}: {} bytes < {MIN_DATAGRAM_LEN}",
                datagram.len()
            );
            return;
        }

        let raw = match RawMessage::unpack(&datagram) {
            Ok(raw) => raw,
            Err(e) => {
                log::debug!("dropping unparseable datagram from {peer}: {e}");
                return;
            }
        };

        let targets = self
            .devices
            .resolve_targets(raw.frame_addr.target, raw.frame.tagged);
        if targets.is_empty() {
            log::debug!("no device matches target {:#x} from {peer}", raw.frame_addr.target);
            return;
        }

        for device in targets {
            let server = self.clone();
            let raw = raw.clone();
            tokio::spawn(async move {
                server.handle_for_device(device, raw, peer).await;
            });
        }
    }

    /// Pipeline step 5 (§4.7): per-target scenario resolution, drop roll, ack/handler/transform
    /// sequencing. The handler call runs under the device's own lock so mutations to one device
    /// are serialized while different devices proceed independently (§5).
    async fn handle_for_device(&self, device: Arc<ManagedDevice>, raw: RawMessage, peer: SocketAddr) {
        let ctx = scenario_context(&device).await;
        let rules = self.scenarios.resolve(&ctx);
        let packet_type = raw.protocol_header.typ;
        let mut rng = rand::thread_rng();

        if scenario::roll_drop(&rules, packet_type, &mut rng) {
            log::debug!("scenario dropped packet type {packet_type} for {}", ctx.device);
            return;
        }

        // §7 distinguishes two failure modes, both of which terminate in a response rather than
        // reaching a handler: a wire type this emulator never decodes at all (§4.4 step 8,
        // honoring `send_unhandled`) and a structurally valid, known packet type the target
        // device's capabilities don't support (§7's "capability mismatch" -- Testable Property
        // #8 requires switch devices to answer *every* Light/MultiZone/Tile packet type with
        // `StateUnhandled` unconditionally, not gated by a scenario's `send_unhandled`).
        let msg = match Message::from_raw(&raw) {
            Ok(msg) => {
                let namespace = handlers::namespace_of(msg.get_num());
                let supported = {
                    let guard = device.state.lock().await;
                    handlers::supports(&guard, namespace)
                };
                if supported {
                    msg
                } else {
                    self.send_state_unhandled(&raw, peer, ctx.device, packet_type, &rules, &mut rng)
                        .await;
                    return;
                }
            }
            Err(_) => {
                if !rules.send_unhandled() {
                    log::debug!("dropping unhandled packet type {packet_type} for {}", ctx.device);
                    return;
                }
                self.send_state_unhandled(&raw, peer, ctx.device, packet_type, &rules, &mut rng)
                    .await;
                return;
            }
        };

        // Step 5c: an early ack is sent before the handler runs. The StateUnhandled case above
        // always returns before reaching here, so this ack is never redundant with step 5f's.
        if raw.frame_addr.ack_required {
            self.send_ack(&raw, peer, ctx.device).await;
        }

        let responses = {
            let mut guard = device.state.lock().await;
            let responses = handlers::dispatch(&mut guard, &msg);
            // Mutating handlers that return no response (e.g. SetUserPosition, CopyFrameBuffer)
            // still need their state change persisted (§4.3), so this is not also gated on
            // `!responses.is_empty()`.
            if !handlers::is_query(&msg) {
                self.persistence.save(ctx.device, persistence::snapshot(&guard));
            }
            responses
        };

        let responses = if raw.frame_addr.res_required || handlers::is_query(&msg) {
            responses
        } else {
            Vec::new()
        };

        self.send_responses(&raw, peer, ctx.device, responses, &rules, &mut rng, false)
            .await;
    }

    /// Builds and sends the one `StateUnhandled` response shared by both the decode-failure and
    /// capability-mismatch branches above.
    async fn send_state_unhandled(
        &self,
        raw: &RawMessage,
        peer: SocketAddr,
        device: DeviceId,
        packet_type: u16,
        rules: &MergedRules,
        rng: &mut ThreadRng,
    ) {
        let responses = vec![Message::StateUnhandled {
            unhandled_type: packet_type,
        }];
        self.send_responses(raw, peer, device, responses, rules, rng, true)
            .await;
    }

    async fn send_ack(&self, raw: &RawMessage, peer: SocketAddr, device: DeviceId) {
        let ack = Message::Acknowledgement {
            seq: raw.frame_addr.sequence,
        };
        if let Err(e) = self.send_one(raw, peer, device, &ack).await {
            log::warn!("failed to send ack to {peer}: {e}");
        }
    }

    /// Pipeline steps 5e-7: apply response delay and partial-response truncation, fold in the
    /// deferred ack for an unhandled request (step 5f), then send every resulting datagram.
    /// Every outgoing packet's `target` is the responding device's own id, per §4.1 -- never the
    /// original request's target, which is all-zero for a tagged (broadcast) request.
    async fn send_responses(
        &self,
        raw: &RawMessage,
        peer: SocketAddr,
        device: DeviceId,
        mut responses: Vec<Message>,
        rules: &MergedRules,
        rng: &mut ThreadRng,
        is_unhandled: bool,
    ) {
        let packet_type = raw.protocol_header.typ;

        let delay = rules.response_delay(packet_type);
        if delay > Duration::ZERO {
            tokio::time::sleep(delay).await;
        }

        if rules.forces_partial(packet_type) {
            responses = scenario::truncate_response_list(responses, rng);
        }

        if is_unhandled && raw.frame_addr.ack_required {
            responses.insert(
                0,
                Message::Acknowledgement {
                    seq: raw.frame_addr.sequence,
                },
            );
        }

        for response in &responses {
            self.send_transformed(raw, peer, device, response, rules, rng).await;
        }
    }

    /// Pipeline step 6-7: builds and packs one response header, applying `firmware_version`
    /// (step 7) and the per-payload malformed/invalid-field transforms (steps 5-6) before
    /// sending.
    async fn send_transformed(
        &self,
        raw: &RawMessage,
        peer: SocketAddr,
        device: DeviceId,
        response: &Message,
        rules: &MergedRules,
        rng: &mut ThreadRng,
    ) {
        let response = apply_firmware_override(response, rules);

        let options = BuildOptions {
            target: Some(device.as_target()),
            ack_required: false,
            res_required: false,
            sequence: raw.frame_addr.sequence,
            source: raw.frame.source,
        };

        let built = match RawMessage::build(&options, response) {
            Ok(built) => built,
            Err(e) => {
                log::warn!("failed to build response: {e}");
                return;
            }
        };

        let response_type = built.protocol_header.typ;
        let mut payload = match built.pack() {
            Ok(bytes) => bytes,
            Err(e) => {
                log::warn!("failed to pack response: {e}");
                return;
            }
        };

        // §4.4 steps 5-6 are sequential, independent transforms over the same payload body --
        // nothing keys them as mutually exclusive, so a scenario that sets both for one packet
        // type gets the field overwrite applied first, then truncation of whatever that produced.
        let header_len = RawMessage::header_size();
        let mut body_changed = false;
        let mut body = payload[header_len..].to_vec();
        if rules.forces_invalid_field_values(response_type) {
            body = scenario::overwrite_invalid_field_values(&body);
            body_changed = true;
        }
        if rules.forces_malformed(response_type) {
            body = scenario::truncate_malformed(&body, rng);
            body_changed = true;
        }
        if body_changed {
            payload = rebuild_with_body(&payload[..header_len], &body);
        }

        if let Err(e) = self.socket.send_to(&payload, peer).await {
            log::warn!("send_to {peer} failed: {e}");
        }
    }

    async fn send_one(
        &self,
        raw: &RawMessage,
        peer: SocketAddr,
        device: DeviceId,
        msg: &Message,
    ) -> std::io::Result<()> {
        let options = BuildOptions {
            target: Some(device.as_target()),
            ack_required: false,
            res_required: false,
            sequence: raw.frame_addr.sequence,
            source: raw.frame.source,
        };
        let built = RawMessage::build(&options, msg.clone())
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        let bytes = built
            .pack()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        self.socket.send_to(&bytes, peer).await?;
        Ok(())
    }
}

/// Rewrites a packed response's header-declared size to match a transformed (possibly shorter)
/// payload body, then concatenates the two. `header` is always exactly 36 bytes: the first two
/// little-endian bytes are `Frame::size`.
fn rebuild_with_body(header: &[u8], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(header.len() + body.len());
    out.extend_from_slice(header);
    let size = (header.len() + body.len()) as u16;
    out[0] = (size & 0xff) as u8;
    out[1] = (size >> 8) as u8;
    out.extend_from_slice(body);
    out
}

/// §4.4 step 7: `firmware_version`, when set anywhere in the merged hierarchy, overrides what
/// `GetHostFirmware`/`GetWifiFirmware` report regardless of the device's real firmware fields.
/// Applied here rather than threaded into the handler registry, since §4.2a keeps handlers as a
/// pure `DeviceState -> Message` match with no scenario dependency of their own.
fn apply_firmware_override(response: &Message, rules: &MergedRules) -> Message {
    let Some((major, minor, build)) = rules.firmware_version else {
        return response.clone();
    };
    match *response {
        Message::StateHostFirmware { reserved, .. } => Message::StateHostFirmware {
            build,
            reserved,
            version_minor: minor,
            version_major: major,
        },
        Message::StateWifiFirmware { reserved, .. } => Message::StateWifiFirmware {
            build,
            reserved,
            version_minor: minor,
            version_major: major,
        },
        _ => response.clone(),
    }
}

/// End-to-end tests driving the transport pipeline over a real loopback UDP socket, matching the
/// concrete scenarios in §8 of the design notes (E1, E4, E6).
#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceSpec;
    use crate::scenario::ScenarioRuleSet;
    use std::collections::HashMap;
    use tokio::net::UdpSocket as ClientSocket;
    use tokio::time::timeout;

    struct TestServer {
        addr: SocketAddr,
        devices: Arc<DeviceManager>,
        scenarios: Arc<ScenarioEngine>,
        shutdown_tx: tokio::sync::mpsc::Sender<()>,
        run_handle: tokio::task::JoinHandle<()>,
        _tempdir: tempfile::TempDir,
    }

    impl TestServer {
        async fn stop(self) {
            let _ = self.shutdown_tx.send(()).await;
            let _ = self.run_handle.await;
        }
    }

    async fn spawn_test_server() -> TestServer {
        let devices = Arc::new(DeviceManager::new());
        let scenarios = Arc::new(ScenarioEngine::new());
        let tempdir = tempfile::tempdir().unwrap();
        let persistence = persistence::spawn(tempdir.path().to_path_buf());

        let bind: SocketAddr = "127.0.0.1:0".parse().unwrap();
        let server = Server::bind(bind, Arc::clone(&devices), Arc::clone(&scenarios), persistence)
            .await
            .unwrap();
        let addr = server.local_addr().unwrap();

        let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
        let run_handle = tokio::spawn(server.run(shutdown_rx));

        TestServer {
            addr,
            devices,
            scenarios,
            shutdown_tx,
            run_handle,
            _tempdir: tempdir,
        }
    }

    fn device_id(low_byte: u8) -> DeviceId {
        DeviceId::from_bytes([0xd0, 0x73, 0xd5, 0x00, 0x00, low_byte])
    }

    async fn recv_message(client: &ClientSocket) -> Option<(RawMessage, Message)> {
        let mut buf = [0u8; 2048];
        let len = timeout(Duration::from_secs(2), client.recv(&mut buf))
            .await
            .ok()?
            .ok()?;
        let raw = RawMessage::unpack(&buf[..len]).ok()?;
        let msg = Message::from_raw(&raw).ok()?;
        Some((raw, msg))
    }

    async fn recv_message_timeout(client: &ClientSocket, wait: Duration) -> Option<(RawMessage, Message)> {
        let mut buf = [0u8; 2048];
        let result = timeout(wait, client.recv(&mut buf)).await.ok()?.ok()?;
        let raw = RawMessage::unpack(&buf[..result]).ok()?;
        let msg = Message::from_raw(&raw).ok()?;
        Some((raw, msg))
    }

    /// E1: a tagged `GetService` broadcast to a two-device server elicits one `StateService`
    /// response per device, each carrying that device's own id.
    #[tokio::test(flavor = "multi_thread")]
    async fn e1_discovery_broadcast_gets_one_response_per_device() {
        let server = spawn_test_server().await;
        let addr_for_devices: SocketAddr = "127.0.0.1:56700".parse().unwrap();
        server
            .devices
            .add(
                DeviceSpec {
                    vendor: 1,
                    product: 27,
                    id: Some(device_id(1)),
                    ..Default::default()
                },
                addr_for_devices,
            )
            .unwrap();
        server
            .devices
            .add(
                DeviceSpec {
                    vendor: 1,
                    product: 27,
                    id: Some(device_id(2)),
                    ..Default::default()
                },
                addr_for_devices,
            )
            .unwrap();

        let client = ClientSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server.addr).await.unwrap();

        let options = BuildOptions {
            target: None, // tagged broadcast
            ack_required: false,
            res_required: true,
            sequence: 7,
            source: 0xCAFE,
        };
        let built = RawMessage::build(&options, Message::GetService).unwrap();
        client.send(&built.pack().unwrap()).await.unwrap();

        let mut seen_ids = std::collections::HashSet::new();
        for _ in 0..2 {
            let (raw, msg) = recv_message(&client).await.expect("expected a response");
            assert!(matches!(msg, Message::StateService { service: lifx_core::Service::UDP, port: 56700 }));
            assert_eq!(raw.frame.source, 0xCAFE);
            assert_eq!(raw.frame_addr.sequence, 7);
            seen_ids.insert(raw.frame_addr.target);
        }
        assert_eq!(seen_ids.len(), 2);
        assert!(seen_ids.contains(&device_id(1).as_target()));
        assert!(seen_ids.contains(&device_id(2).as_target()));

        server.stop().await;
    }

    /// E4: a device-scope `drop_packets[102] = 1.0` suppresses both the ack and the response.
    #[tokio::test(flavor = "multi_thread")]
    async fn e4_drop_scenario_suppresses_ack_and_response() {
        let server = spawn_test_server().await;
        let id = device_id(3);
        server
            .devices
            .add(
                DeviceSpec {
                    vendor: 1,
                    product: 27,
                    id: Some(id),
                    ..Default::default()
                },
                "127.0.0.1:56700".parse().unwrap(),
            )
            .unwrap();

        let mut rules = ScenarioRuleSet::default();
        rules.drop_packets = Some(HashMap::from([(102, 1.0)]));
        server.scenarios.set_device(id, rules);

        let client = ClientSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server.addr).await.unwrap();

        let options = BuildOptions {
            target: Some(id.as_target()),
            ack_required: true,
            res_required: true,
            sequence: 1,
            source: 1,
        };
        let built = RawMessage::build(
            &options,
            Message::LightSetColor {
                reserved: 0,
                color: lifx_core::HSBK {
                    hue: 0,
                    saturation: 0,
                    brightness: 0,
                    kelvin: 3500,
                },
                duration: 0,
            },
        )
        .unwrap();
        client.send(&built.pack().unwrap()).await.unwrap();

        assert!(recv_message_timeout(&client, Duration::from_millis(300))
            .await
            .is_none());

        server.stop().await;
    }

    /// E6: a switch device answers every Light-namespace packet with `StateUnhandled` carrying
    /// the rejected packet type, but still answers a normal Device-namespace request afterward.
    #[tokio::test(flavor = "multi_thread")]
    async fn e6_switch_rejects_light_namespace_then_answers_get_label() {
        let server = spawn_test_server().await;
        let id = device_id(0x70);
        server
            .devices
            .add(
                DeviceSpec {
                    vendor: 1,
                    product: 70,
                    id: Some(id),
                    ..Default::default()
                },
                "127.0.0.1:56700".parse().unwrap(),
            )
            .unwrap();

        let client = ClientSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server.addr).await.unwrap();

        let options = BuildOptions {
            target: Some(id.as_target()),
            ack_required: false,
            res_required: true,
            sequence: 1,
            source: 1,
        };
        let built = RawMessage::build(
            &options,
            Message::LightSetColor {
                reserved: 0,
                color: lifx_core::HSBK {
                    hue: 0,
                    saturation: 0,
                    brightness: 0,
                    kelvin: 3500,
                },
                duration: 0,
            },
        )
        .unwrap();
        client.send(&built.pack().unwrap()).await.unwrap();

        let (_, msg) = recv_message(&client).await.expect("expected StateUnhandled");
        assert!(matches!(msg, Message::StateUnhandled { unhandled_type: 102 }));

        let built = RawMessage::build(&options, Message::GetLabel).unwrap();
        client.send(&built.pack().unwrap()).await.unwrap();
        let (_, msg) = recv_message(&client).await.expect("expected StateLabel");
        assert!(matches!(msg, Message::StateLabel { .. }));

        server.stop().await;
    }

    /// Testable Property #3: a non-dropped `ack_required=1` request gets exactly one
    /// `Acknowledgement` with matching `source`/`sequence` and the responding device's own id in
    /// `target`, ahead of the handler's own response.
    #[tokio::test(flavor = "multi_thread")]
    async fn ack_required_yields_matching_acknowledgement_before_the_response() {
        let server = spawn_test_server().await;
        let id = device_id(9);
        server
            .devices
            .add(
                DeviceSpec {
                    vendor: 1,
                    product: 27,
                    id: Some(id),
                    ..Default::default()
                },
                "127.0.0.1:56700".parse().unwrap(),
            )
            .unwrap();

        let client = ClientSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server.addr).await.unwrap();

        let options = BuildOptions {
            target: Some(id.as_target()),
            ack_required: true,
            res_required: true,
            sequence: 42,
            source: 0xBEEF,
        };
        let built = RawMessage::build(&options, Message::GetLabel).unwrap();
        client.send(&built.pack().unwrap()).await.unwrap();

        let (raw, msg) = recv_message(&client).await.expect("expected an Acknowledgement");
        assert!(matches!(msg, Message::Acknowledgement { seq: 42 }));
        assert_eq!(raw.frame.source, 0xBEEF);
        assert_eq!(raw.frame_addr.sequence, 42);
        assert_eq!(raw.frame_addr.target, id.as_target());

        let (_, msg) = recv_message(&client).await.expect("expected StateLabel");
        assert!(matches!(msg, Message::StateLabel { .. }));

        server.stop().await;
    }

    /// §4.4 steps 5-6: when a scenario sets both `malformed_packets` and `invalid_field_values`
    /// for the same response type, both transforms apply in sequence -- the received payload is
    /// shorter than an untouched `StateLabel` and every remaining body byte is 0xFF.
    #[tokio::test(flavor = "multi_thread")]
    async fn malformed_and_invalid_field_scenarios_both_apply_to_the_same_response() {
        let server = spawn_test_server().await;
        let plain_id = device_id(10);
        let scenario_id = device_id(11);
        let addr: SocketAddr = "127.0.0.1:56700".parse().unwrap();
        server
            .devices
            .add(
                DeviceSpec {
                    vendor: 1,
                    product: 27,
                    id: Some(plain_id),
                    ..Default::default()
                },
                addr,
            )
            .unwrap();
        server
            .devices
            .add(
                DeviceSpec {
                    vendor: 1,
                    product: 27,
                    id: Some(scenario_id),
                    ..Default::default()
                },
                addr,
            )
            .unwrap();

        const STATE_LABEL: u16 = 25;
        let mut rules = ScenarioRuleSet::default();
        rules.malformed_packets = Some(std::collections::HashSet::from([STATE_LABEL]));
        rules.invalid_field_values = Some(std::collections::HashSet::from([STATE_LABEL]));
        server.scenarios.set_device(scenario_id, rules);

        let client = ClientSocket::bind("127.0.0.1:0").await.unwrap();
        client.connect(server.addr).await.unwrap();

        let request_to = |id: DeviceId| BuildOptions {
            target: Some(id.as_target()),
            ack_required: false,
            res_required: true,
            sequence: 1,
            source: 1,
        };

        let built = RawMessage::build(&request_to(plain_id), Message::GetLabel).unwrap();
        client.send(&built.pack().unwrap()).await.unwrap();
        let mut buf = [0u8; 2048];
        let plain_len = timeout(Duration::from_secs(2), client.recv(&mut buf))
            .await
            .unwrap()
            .unwrap();

        let built = RawMessage::build(&request_to(scenario_id), Message::GetLabel).unwrap();
        client.send(&built.pack().unwrap()).await.unwrap();
        let mut buf2 = [0u8; 2048];
        let scenario_len = timeout(Duration::from_secs(2), client.recv(&mut buf2))
            .await
            .unwrap()
            .unwrap();

        let header_len = RawMessage::header_size();
        assert!(scenario_len < plain_len);
        assert!(buf2[header_len..scenario_len].iter().all(|&b| b == 0xFF));

        server.stop().await;
    }
}
