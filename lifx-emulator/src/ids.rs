//! Identifiers used throughout the emulator: device ids (the low 48 bits of the wire `target`
//! field) and the 16-byte location/group ids carried in [`lifx_core::LifxIdent`].

use std::fmt;
use std::str::FromStr;

use lifx_core::LifxIdent;

/// A device id: the 6-byte MAC-like address LIFX devices use to address themselves, represented
/// as a `u64` (the same shape `lifx_core::FrameAddress::target` uses, with the top 16 bits
/// always zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u64);

impl DeviceId {
    pub fn from_bytes(bytes: [u8; 6]) -> Self {
        let mut buf = [0u8; 8];
        buf[..6].copy_from_slice(&bytes);
        DeviceId(u64::from_le_bytes(buf))
    }

    pub fn to_bytes(self) -> [u8; 6] {
        let buf = self.0.to_le_bytes();
        [buf[0], buf[1], buf[2], buf[3], buf[4], buf[5]]
    }

    /// The value to place in [`lifx_core::FrameAddress::target`] when addressing this device.
    pub fn as_target(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.to_bytes() {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid device id `{0}`: expected 12 hex characters")]
pub struct ParseDeviceIdError(String);

impl FromStr for DeviceId {
    type Err = ParseDeviceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() != 12 || !s.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(ParseDeviceIdError(s.to_string()));
        }
        let mut bytes = [0u8; 6];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&s[i * 2..i * 2 + 2], 16)
                .map_err(|_| ParseDeviceIdError(s.to_string()))?;
        }
        Ok(DeviceId::from_bytes(bytes))
    }
}

/// A 16-byte location or group id, as carried in [`LifxIdent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ident(pub [u8; 16]);

impl Ident {
    pub fn new_random() -> Self {
        use rand::RngCore;
        let mut bytes = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut bytes);
        Ident(bytes)
    }

    pub fn as_lifx_ident(self) -> LifxIdent {
        LifxIdent(self.0)
    }
}

impl From<LifxIdent> for Ident {
    fn from(v: LifxIdent) -> Self {
        Ident(v.0)
    }
}

impl fmt::Display for Ident {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{:02x}", b)?;
        }
        Ok(())
    }
}
