//! A LIFX LAN-protocol device emulator: a UDP server that answers requests as a configurable
//! set of virtual devices would, with a fault-injection layer for testing clients against
//! dropped/delayed/malformed/partial responses.
//!
//! This crate is the engine; parsing an on-disk config format or exposing a management API over
//! HTTP is a collaborator's job (§6 of the design notes) — see [`config::StartupConfig`] for the
//! shape this crate consumes.

pub mod config;
pub mod device;
pub mod error;
pub mod handlers;
pub mod ids;
pub mod manager;
pub mod persistence;
pub mod product;
pub mod scenario;
pub mod transport;

pub use device::{DeviceSpec, DeviceState};
pub use error::{EmulatorError, Result};
pub use ids::DeviceId;
pub use manager::DeviceManager;
pub use scenario::{ScenarioEngine, ScenarioRuleSet};
pub use transport::Server;
