//! The fault-injection scenario engine (§4.4): a 5-level hierarchy of rule sets
//! (device > type > location > group > global) merged field-by-field into the rules that apply
//! to a single device, with the result cached until a write invalidates it.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{EmulatorError, Result};
use crate::ids::{DeviceId, Ident};

/// The device "type" a scenario can target, used for the type-level scope. A device can match
/// more than one (e.g. a multizone strip is both `Multizone` and `Color`); [`TypeScope::priority`]
/// fixes which one wins when more than one type-scope rule set is defined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeScope {
    Matrix,
    ExtendedMultizone,
    Multizone,
    Hev,
    Infrared,
    Color,
}

impl TypeScope {
    /// Types a device matches, most to least specific. The first one with a defined type-scope
    /// rule set wins; this order is an Open Question resolution recorded in DESIGN.md.
    pub fn matching(caps: &crate::product::Capabilities) -> Vec<TypeScope> {
        let mut out = Vec::new();
        if caps.has_matrix {
            out.push(TypeScope::Matrix);
        }
        if caps.has_extended_multizone {
            out.push(TypeScope::ExtendedMultizone);
        }
        if caps.has_multizone {
            out.push(TypeScope::Multizone);
        }
        if caps.has_hev {
            out.push(TypeScope::Hev);
        }
        if caps.has_infrared {
            out.push(TypeScope::Infrared);
        }
        if caps.has_color {
            out.push(TypeScope::Color);
        }
        out
    }
}

/// One rule set as supplied by a caller (the management plane, per §6.2). Every field is
/// optional: a scope that doesn't mention a field has no opinion on it, and resolution falls
/// through to the next, less specific scope.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioRuleSet {
    /// Per-packet-type (by wire type number) probability of silently dropping a request.
    pub drop_packets: Option<HashMap<u16, f32>>,
    /// Per-packet-type added response latency.
    pub response_delays: Option<HashMap<u16, Duration>>,
    /// Packet types whose response payloads are truncated/corrupted before sending.
    pub malformed_packets: Option<HashSet<u16>>,
    /// Packet types whose response payloads are overwritten with all-0xFF bytes of the same
    /// length, regardless of what the handler produced.
    pub invalid_field_values: Option<HashSet<u16>>,
    /// Packet types whose multi-packet response lists are randomly truncated before sending.
    pub partial_responses: Option<HashSet<u16>>,
    /// Overrides the firmware version a device reports, independent of its real one.
    pub firmware_version: Option<(u16, u16, u64)>,
    /// Whether to reply `StateUnhandled` for a request type with no registered handler, instead
    /// of silently dropping it. Defaults to `true` when unset anywhere in the merged hierarchy.
    pub send_unhandled: Option<bool>,
}

impl ScenarioRuleSet {
    fn is_empty(&self) -> bool {
        self.drop_packets.is_none()
            && self.response_delays.is_none()
            && self.malformed_packets.is_none()
            && self.invalid_field_values.is_none()
            && self.partial_responses.is_none()
            && self.firmware_version.is_none()
            && self.send_unhandled.is_none()
    }
}

/// The fully-resolved rule set that applies to one device, after merging all five scopes.
/// Merge is field-level: for each field, the first scope (in device > type > location > group >
/// global order) that defines a value for that field wins outright — scopes are never merged
/// key-by-key within a single field.
#[derive(Debug, Clone)]
pub struct MergedRules {
    pub drop_packets: HashMap<u16, f32>,
    pub response_delays: HashMap<u16, Duration>,
    pub malformed_packets: HashSet<u16>,
    pub invalid_field_values: HashSet<u16>,
    pub partial_responses: HashSet<u16>,
    pub firmware_version: Option<(u16, u16, u64)>,
    pub send_unhandled: bool,
}

impl Default for MergedRules {
    fn default() -> Self {
        MergedRules {
            drop_packets: HashMap::new(),
            response_delays: HashMap::new(),
            malformed_packets: HashSet::new(),
            invalid_field_values: HashSet::new(),
            partial_responses: HashSet::new(),
            firmware_version: None,
            send_unhandled: true,
        }
    }
}

impl MergedRules {
    fn merge_from(&mut self, filled: &mut MergedFieldsSeen, rules: &ScenarioRuleSet) {
        if !filled.drop_packets {
            if let Some(v) = &rules.drop_packets {
                self.drop_packets = v.clone();
                filled.drop_packets = true;
            }
        }
        if !filled.response_delays {
            if let Some(v) = &rules.response_delays {
                self.response_delays = v.clone();
                filled.response_delays = true;
            }
        }
        if !filled.malformed_packets {
            if let Some(v) = &rules.malformed_packets {
                self.malformed_packets = v.clone();
                filled.malformed_packets = true;
            }
        }
        if !filled.invalid_field_values {
            if let Some(v) = &rules.invalid_field_values {
                self.invalid_field_values = v.clone();
                filled.invalid_field_values = true;
            }
        }
        if !filled.partial_responses {
            if let Some(v) = &rules.partial_responses {
                self.partial_responses = v.clone();
                filled.partial_responses = true;
            }
        }
        if !filled.firmware_version {
            if let Some(v) = rules.firmware_version {
                self.firmware_version = Some(v);
                filled.firmware_version = true;
            }
        }
        if !filled.send_unhandled {
            if let Some(v) = &rules.send_unhandled {
                self.send_unhandled = v.clone();
                filled.send_unhandled = true;
            }
        }
    }

    pub fn drop_probability(&self, packet_type: u16) -> f32 {
        self.drop_packets.get(&packet_type).copied().unwrap_or(0.0)
    }

    pub fn response_delay(&self, packet_type: u16) -> Duration {
        self.response_delays
            .get(&packet_type)
            .copied()
            .unwrap_or_default()
    }

    pub fn forces_malformed(&self, packet_type: u16) -> bool {
        self.malformed_packets.contains(&packet_type)
    }

    pub fn forces_partial(&self, packet_type: u16) -> bool {
        self.partial_responses.contains(&packet_type)
    }

    pub fn send_unhandled(&self) -> bool {
        self.send_unhandled
    }

    pub fn forces_invalid_field_values(&self, packet_type: u16) -> bool {
        self.invalid_field_values.contains(&packet_type)
    }
}

#[derive(Default)]
struct MergedFieldsSeen {
    drop_packets: bool,
    response_delays: bool,
    malformed_packets: bool,
    invalid_field_values: bool,
    partial_responses: bool,
    firmware_version: bool,
    send_unhandled: bool,
}

/// Identifies a target device by the dimensions a scenario rule can be scoped to.
#[derive(Debug, Clone, Copy)]
pub struct ScenarioContext {
    pub device: DeviceId,
    pub types: [Option<TypeScope>; 6],
    pub location: Option<Ident>,
    pub group: Option<Ident>,
}

/// Owns all five scopes and a cache of resolved [`MergedRules`] per device. Any write
/// invalidates the whole cache rather than tracking fine-grained dependencies, since scenario
/// changes are rare compared to packet throughput (§5).
pub struct ScenarioEngine {
    device: Mutex<HashMap<DeviceId, ScenarioRuleSet>>,
    by_type: Mutex<HashMap<TypeScope, ScenarioRuleSet>>,
    location: Mutex<HashMap<Ident, ScenarioRuleSet>>,
    group: Mutex<HashMap<Ident, ScenarioRuleSet>>,
    global: Mutex<ScenarioRuleSet>,
    cache: Mutex<HashMap<DeviceId, Arc<MergedRules>>>,
}

impl ScenarioEngine {
    pub fn new() -> Self {
        ScenarioEngine {
            device: Mutex::new(HashMap::new()),
            by_type: Mutex::new(HashMap::new()),
            location: Mutex::new(HashMap::new()),
            group: Mutex::new(HashMap::new()),
            global: Mutex::new(ScenarioRuleSet::default()),
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn set_global(&self, rules: ScenarioRuleSet) {
        *self.global.lock().unwrap() = rules;
        self.invalidate_all();
    }

    pub fn set_group(&self, group: Ident, rules: ScenarioRuleSet) {
        if rules.is_empty() {
            self.group.lock().unwrap().remove(&group);
        } else {
            self.group.lock().unwrap().insert(group, rules);
        }
        self.invalidate_all();
    }

    pub fn set_location(&self, location: Ident, rules: ScenarioRuleSet) {
        if rules.is_empty() {
            self.location.lock().unwrap().remove(&location);
        } else {
            self.location.lock().unwrap().insert(location, rules);
        }
        self.invalidate_all();
    }

    pub fn set_type(&self, typ: TypeScope, rules: ScenarioRuleSet) {
        if rules.is_empty() {
            self.by_type.lock().unwrap().remove(&typ);
        } else {
            self.by_type.lock().unwrap().insert(typ, rules);
        }
        self.invalidate_all();
    }

    pub fn set_device(&self, device: DeviceId, rules: ScenarioRuleSet) {
        if rules.is_empty() {
            self.device.lock().unwrap().remove(&device);
        } else {
            self.device.lock().unwrap().insert(device, rules);
        }
        self.invalidate(device);
    }

    pub fn clear_device(&self, device: DeviceId) {
        self.device.lock().unwrap().remove(&device);
        self.invalidate(device);
    }

    pub fn clear_all(&self) -> Result<()> {
        self.device.lock().unwrap().clear();
        self.by_type.lock().unwrap().clear();
        self.location.lock().unwrap().clear();
        self.group.lock().unwrap().clear();
        *self.global.lock().unwrap() = ScenarioRuleSet::default();
        self.invalidate_all();
        Ok(())
    }

    fn invalidate(&self, device: DeviceId) {
        self.cache.lock().unwrap().remove(&device);
    }

    fn invalidate_all(&self) {
        self.cache.lock().unwrap().clear();
    }

    /// Returns the merged rule set for `ctx.device`, computing and caching it on first access.
    pub fn resolve(&self, ctx: &ScenarioContext) -> Arc<MergedRules> {
        if let Some(cached) = self.cache.lock().unwrap().get(&ctx.device) {
            return Arc::clone(cached);
        }

        let mut merged = MergedRules::default();
        let mut seen = MergedFieldsSeen::default();

        if let Some(rules) = self.device.lock().unwrap().get(&ctx.device) {
            merged.merge_from(&mut seen, rules);
        }

        let by_type = self.by_type.lock().unwrap();
        for typ in ctx.types.iter().flatten() {
            if let Some(rules) = by_type.get(typ) {
                merged.merge_from(&mut seen, rules);
            }
        }
        drop(by_type);

        if let Some(location) = ctx.location {
            if let Some(rules) = self.location.lock().unwrap().get(&location) {
                merged.merge_from(&mut seen, rules);
            }
        }

        if let Some(group) = ctx.group {
            if let Some(rules) = self.group.lock().unwrap().get(&group) {
                merged.merge_from(&mut seen, rules);
            }
        }

        merged.merge_from(&mut seen, &self.global.lock().unwrap());

        let merged = Arc::new(merged);
        self.cache
            .lock()
            .unwrap()
            .insert(ctx.device, Arc::clone(&merged));
        merged
    }
}

impl Default for ScenarioEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Rolls `drop_packets[packet_type]` against a uniform sample, per §4.4 step 1.
pub fn roll_drop(rules: &MergedRules, packet_type: u16, rng: &mut impl Rng) -> bool {
    rng.gen::<f32>() < rules.drop_probability(packet_type)
}

/// Randomly truncates a response list to somewhere in `[0, len]` inclusive, for
/// `partial_responses` (§4.4 step 4). Applied to the whole list, before any per-payload transform.
pub fn truncate_response_list<T>(mut responses: Vec<T>, rng: &mut impl Rng) -> Vec<T> {
    let keep = rng.gen_range(0..=responses.len());
    responses.truncate(keep);
    responses
}

/// Truncates an encoded response payload to a random length strictly shorter than the original,
/// for `malformed_packets` (§4.4 step 5). The exact distribution is an open question in the
/// source spec; only "strictly shorter" is required.
pub fn truncate_malformed(payload: &[u8], rng: &mut impl Rng) -> Vec<u8> {
    if payload.is_empty() {
        return Vec::new();
    }
    let cut = rng.gen_range(0..payload.len());
    payload[..cut].to_vec()
}

/// Overwrites an encoded response payload with 0xFF bytes of the same length, for
/// `invalid_field_values` (§4.4 step 6).
pub fn overwrite_invalid_field_values(payload: &[u8]) -> Vec<u8> {
    vec![0xFF; payload.len()]
}

pub fn parse_type_scope(s: &str) -> Result<TypeScope> {
    match s {
        "matrix" => Ok(TypeScope::Matrix),
        "extended_multizone" => Ok(TypeScope::ExtendedMultizone),
        "multizone" => Ok(TypeScope::Multizone),
        "hev" => Ok(TypeScope::Hev),
        "infrared" => Ok(TypeScope::Infrared),
        "color" => Ok(TypeScope::Color),
        other => Err(EmulatorError::InvalidScenario(format!(
            "unknown device type scope `{other}`"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(device: DeviceId) -> ScenarioContext {
        ScenarioContext {
            device,
            types: [Some(TypeScope::Color), None, None, None, None, None],
            location: None,
            group: None,
        }
    }

    #[test]
    fn device_scope_overrides_global_field_wholesale() {
        let engine = ScenarioEngine::new();
        let device = DeviceId::from_bytes([1, 2, 3, 4, 5, 6]);

        let mut global = ScenarioRuleSet::default();
        global.drop_packets = Some(HashMap::from([(102, 1.0)]));
        engine.set_global(global);

        let mut per_device = ScenarioRuleSet::default();
        per_device.drop_packets = Some(HashMap::from([(102, 0.0)]));
        engine.set_device(device, per_device);

        let merged = engine.resolve(&ctx(device));
        assert_eq!(merged.drop_probability(102), 0.0);
    }

    #[test]
    fn unset_field_falls_through_to_global() {
        let engine = ScenarioEngine::new();
        let device = DeviceId::from_bytes([1, 2, 3, 4, 5, 6]);

        let mut global = ScenarioRuleSet::default();
        global.response_delays = Some(HashMap::from([(101, Duration::from_millis(50))]));
        engine.set_global(global);

        let mut per_device = ScenarioRuleSet::default();
        per_device.drop_packets = Some(HashMap::from([(102, 1.0)]));
        engine.set_device(device, per_device);

        let merged = engine.resolve(&ctx(device));
        assert_eq!(merged.response_delay(101), Duration::from_millis(50));
        assert_eq!(merged.drop_probability(102), 1.0);
    }

    #[test]
    fn cache_is_invalidated_on_write() {
        let engine = ScenarioEngine::new();
        let device = DeviceId::from_bytes([1, 2, 3, 4, 5, 6]);

        let mut rules = ScenarioRuleSet::default();
        rules.drop_packets = Some(HashMap::from([(102, 1.0)]));
        engine.set_device(device, rules);
        assert_eq!(engine.resolve(&ctx(device)).drop_probability(102), 1.0);

        engine.clear_device(device);
        assert_eq!(engine.resolve(&ctx(device)).drop_probability(102), 0.0);
    }

    #[test]
    fn type_scope_picks_most_specific_match() {
        let engine = ScenarioEngine::new();
        let device = DeviceId::from_bytes([1, 2, 3, 4, 5, 6]);

        let mut color_rules = ScenarioRuleSet::default();
        color_rules.drop_packets = Some(HashMap::from([(102, 0.2)]));
        engine.set_type(TypeScope::Color, color_rules);

        let mut matrix_rules = ScenarioRuleSet::default();
        matrix_rules.drop_packets = Some(HashMap::from([(102, 0.9)]));
        engine.set_type(TypeScope::Matrix, matrix_rules);

        let c = ScenarioContext {
            device,
            types: [Some(TypeScope::Matrix), Some(TypeScope::Color), None, None, None, None],
            location: None,
            group: None,
        };
        assert_eq!(engine.resolve(&c).drop_probability(102), 0.9);
    }
}
