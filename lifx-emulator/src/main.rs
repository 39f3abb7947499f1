//! Binary entry point: wires the library's collaborators together with a minimal built-in
//! configuration and runs until a shutdown signal arrives. Parsing an on-disk config format, a
//! CLI, or an HTTP management plane is a collaborator's job (§6.3) — this binary only builds the
//! default [`StartupConfig`] and is a harness for exercising the core, not the product surface.

use std::sync::Arc;

use lifx_emulator::config::StartupConfig;
use lifx_emulator::device::DeviceSpec;
use lifx_emulator::manager::DeviceManager;
use lifx_emulator::persistence;
use lifx_emulator::scenario::ScenarioEngine;
use lifx_emulator::transport::Server;

#[tokio::main]
async fn main() {
    env_logger::init();

    let config = StartupConfig::default();
    let devices = Arc::new(DeviceManager::new());
    let scenarios = Arc::new(ScenarioEngine::new());

    if let Some(global) = config.initial_scenarios.global.clone() {
        scenarios.set_global(global);
    }

    let persistence_dir = config
        .persistence_dir
        .clone()
        .unwrap_or_else(|| std::path::PathBuf::from("./lifx-emulator-state"));
    let persistence_handle = persistence::spawn(persistence_dir.clone());

    restore_persisted_devices(&devices, &persistence_dir, config.bind);
    create_configured_devices(&devices, &config, config.bind);

    log::info!(
        "starting with {} device(s), persisting to {}",
        devices.len(),
        persistence_dir.display()
    );

    let server = match Server::bind(config.bind, devices, scenarios, persistence_handle.clone()).await {
        Ok(server) => server,
        Err(e) => {
            log::error!("failed to bind {}: {e}", config.bind);
            std::process::exit(1);
        }
    };

    let (shutdown_tx, shutdown_rx) = tokio::sync::mpsc::channel(1);
    let run_handle = tokio::spawn(server.run(shutdown_rx));

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("failed to listen for ctrl-c: {e}");
    }

    log::info!("shutdown signal received");
    let _ = shutdown_tx.send(()).await;
    let _ = run_handle.await;
    persistence_handle.shutdown().await;
    log::info!("shutdown complete");
}

/// Loads every device with a persisted file in `dir` before any device from `config.devices` is
/// created, so a config entry naming an id that also has a persisted snapshot is restored rather
/// than re-created from scratch.
fn restore_persisted_devices(devices: &DeviceManager, dir: &std::path::Path, addr: std::net::SocketAddr) {
    for id in persistence::list_persisted(dir) {
        let Some(persisted) = persistence::load(dir, id) else {
            continue;
        };
        let spec = DeviceSpec {
            vendor: persisted.vendor,
            product: persisted.product,
            id: Some(id),
            ..Default::default()
        };
        match lifx_emulator::device::DeviceState::create(spec) {
            Ok(mut state) => {
                persistence::restore_into(&mut state, &persisted);
                devices.restore(state, addr);
            }
            Err(e) => {
                log::warn!("could not restore persisted device {id}: {e}");
            }
        }
    }
}

fn create_configured_devices(devices: &DeviceManager, config: &StartupConfig, addr: std::net::SocketAddr) {
    for device_config in &config.devices {
        let id = match &device_config.id {
            Some(id_config) => match id_config.parse() {
                Ok(id) => Some(id),
                Err(e) => {
                    log::warn!("skipping device with invalid id: {e}");
                    continue;
                }
            },
            None => None,
        };
        if let Some(id) = id {
            if devices.get(id).is_some() {
                continue;
            }
        }

        let spec = DeviceSpec {
            vendor: device_config.vendor,
            product: device_config.product,
            id,
            label: device_config.label.clone(),
            firmware_major: device_config.firmware_major,
            firmware_minor: device_config.firmware_minor,
            zone_count: device_config.zone_count,
            tile_count: device_config.tile_count,
            ..Default::default()
        };
        if let Err(e) = devices.add(spec, addr) {
            log::warn!("could not create configured device: {e}");
        }
    }
}
