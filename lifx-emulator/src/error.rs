use thiserror::Error;

use crate::ids::DeviceId;

/// Errors surfaced at the boundaries this crate owns: device/scenario management and
/// persistence. Per §7, none of these ever propagate into the wire-level request pipeline -
/// malformed or unsupported requests always resolve to a drop or a `StateUnhandled` response.
#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("unknown product: vendor={vendor} product={product}")]
    UnknownProduct { vendor: u32, product: u32 },

    #[error("device `{0}` already exists")]
    DuplicateDevice(DeviceId),

    #[error("no device with id `{0}`")]
    UnknownDevice(DeviceId),

    #[error("invalid scenario rule: {0}")]
    InvalidScenario(String),

    #[error("persistence error for device `{device}`")]
    Persistence {
        device: DeviceId,
        #[source]
        source: std::io::Error,
    },

    #[error("wire protocol error")]
    Wire(#[from] lifx_core::Error),
}

pub type Result<T> = std::result::Result<T, EmulatorError>;
