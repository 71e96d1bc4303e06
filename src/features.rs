//! Feature gate registry.
//!
//! Gates are registered once at startup from compiled-in definitions, then a
//! single override map is validated and applied. After that the registry is
//! only read, so phases can share it by reference.

use std::collections::BTreeMap;

use tracing::debug;

use crate::error::KunError;

/// Enables the kubelet on control-plane nodes to talk to the local API server.
pub const CONTROL_PLANE_KUBELET_LOCAL_MODE: &str = "ControlPlaneKubeletLocalMode";
/// Joins new etcd members as learners before promoting them.
pub const ETCD_LEARNER_MODE: &str = "EtcdLearnerMode";
/// Runs control plane components as non-root users.
pub const ROOTLESS_CONTROL_PLANE: &str = "RootlessControlPlane";
/// Waits for every control plane component, not only the API server.
pub const WAIT_FOR_ALL_CONTROL_PLANE_COMPONENTS: &str = "WaitForAllControlPlaneComponents";
/// Upgrades addons before the control plane instead of after.
pub const UPGRADE_ADDONS_BEFORE_CONTROL_PLANE: &str = "UpgradeAddonsBeforeControlPlane";

/// Lifecycle stage of a feature gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Alpha,
    Beta,
    Ga,
    Deprecated,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alpha => write!(f, "ALPHA"),
            Self::Beta => write!(f, "BETA"),
            Self::Ga => write!(f, "GA"),
            Self::Deprecated => write!(f, "DEPRECATED"),
        }
    }
}

/// Definition of a single feature gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureGate {
    pub name: String,
    pub stage: Stage,
    pub default_enabled: bool,
    pub lock_to_default: bool,
}

impl FeatureGate {
    pub fn new(name: impl Into<String>, stage: Stage, default_enabled: bool) -> Self {
        Self {
            name: name.into(),
            stage,
            default_enabled,
            lock_to_default: false,
        }
    }

    /// Lock the gate to its default value.
    #[must_use]
    pub const fn locked(mut self) -> Self {
        self.lock_to_default = true;
        self
    }
}

/// Registry of known feature gates and the validated override map.
#[derive(Debug, Clone, Default)]
pub struct FeatureGateRegistry {
    gates: BTreeMap<String, FeatureGate>,
    overrides: BTreeMap<String, bool>,
}

impl FeatureGateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry populated with the compiled-in gates.
    pub fn with_defaults() -> Result<Self, KunError> {
        let mut registry = Self::new();
        for gate in default_gates() {
            registry.register(gate)?;
        }
        Ok(registry)
    }

    /// Add a gate definition. Registering the same name twice is an error.
    pub fn register(&mut self, gate: FeatureGate) -> Result<(), KunError> {
        if self.gates.contains_key(&gate.name) {
            return Err(KunError::DuplicateGate(gate.name));
        }
        self.gates.insert(gate.name.clone(), gate);
        Ok(())
    }

    /// Replace the override map.
    ///
    /// Every key is validated before anything is applied, so a rejected map
    /// leaves the previous overrides in place.
    pub fn set_overrides(&mut self, overrides: BTreeMap<String, bool>) -> Result<(), KunError> {
        for (name, value) in &overrides {
            let gate = self
                .gates
                .get(name)
                .ok_or_else(|| KunError::UnknownGate(name.clone()))?;
            if gate.lock_to_default && *value != gate.default_enabled {
                return Err(KunError::LockedGate {
                    name: name.clone(),
                    default: gate.default_enabled,
                });
            }
        }

        debug!("Applying {} feature gate override(s)", overrides.len());
        self.overrides = overrides;
        Ok(())
    }

    /// Effective value of a gate.
    pub fn is_enabled(&self, name: &str) -> Result<bool, KunError> {
        let gate = self
            .gates
            .get(name)
            .ok_or_else(|| KunError::UnknownGate(name.to_string()))?;
        if gate.lock_to_default {
            return Ok(gate.default_enabled);
        }
        Ok(self
            .overrides
            .get(name)
            .copied()
            .unwrap_or(gate.default_enabled))
    }

    /// Registered gates in name order.
    pub fn gates(&self) -> impl Iterator<Item = &FeatureGate> {
        self.gates.values()
    }

    /// Override value supplied for a gate, if any.
    pub fn override_for(&self, name: &str) -> Option<bool> {
        self.overrides.get(name).copied()
    }
}

/// Compiled-in gate definitions.
fn default_gates() -> Vec<FeatureGate> {
    vec![
        FeatureGate::new(CONTROL_PLANE_KUBELET_LOCAL_MODE, Stage::Beta, true),
        FeatureGate::new(ETCD_LEARNER_MODE, Stage::Ga, true).locked(),
        FeatureGate::new(ROOTLESS_CONTROL_PLANE, Stage::Alpha, false),
        FeatureGate::new(WAIT_FOR_ALL_CONTROL_PLANE_COMPONENTS, Stage::Beta, true),
        FeatureGate::new(UPGRADE_ADDONS_BEFORE_CONTROL_PLANE, Stage::Deprecated, false).locked(),
    ]
}

/// Parse a `--feature-gates` value such as `Foo=true,Bar=false`.
pub fn parse_feature_gates(input: &str) -> Result<BTreeMap<String, bool>, KunError> {
    let mut gates = BTreeMap::new();

    for entry in input.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        let Some((name, value)) = entry.split_once('=') else {
            return Err(KunError::InvalidFeatureGates(format!(
                "missing value in {entry:?}, expected NAME=true|false"
            )));
        };
        let name = name.trim();
        if name.is_empty() {
            return Err(KunError::InvalidFeatureGates(format!(
                "missing name in {entry:?}"
            )));
        }
        let value = value.trim().parse::<bool>().map_err(|_| {
            KunError::InvalidFeatureGates(format!("invalid value {value:?} for {name}"))
        })?;
        gates.insert(name.to_string(), value);
    }

    Ok(gates)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> FeatureGateRegistry {
        let mut r = FeatureGateRegistry::new();
        r.register(FeatureGate::new("Open", Stage::Beta, false)).unwrap();
        r.register(FeatureGate::new("Locked", Stage::Ga, true).locked())
            .unwrap();
        r
    }

    fn overrides(pairs: &[(&str, bool)]) -> BTreeMap<String, bool> {
        pairs.iter().map(|(k, v)| ((*k).to_string(), *v)).collect()
    }

    #[test]
    fn test_default_value_without_overrides() {
        let r = registry();
        assert!(!r.is_enabled("Open").unwrap());
        assert!(r.is_enabled("Locked").unwrap());
    }

    #[test]
    fn test_override_applies_to_unlocked_gate() {
        let mut r = registry();
        r.set_overrides(overrides(&[("Open", true)])).unwrap();
        assert!(r.is_enabled("Open").unwrap());
        assert_eq!(r.override_for("Open"), Some(true));
    }

    #[test]
    fn test_duplicate_registration_fails() {
        let mut r = registry();
        let err = r
            .register(FeatureGate::new("Open", Stage::Alpha, true))
            .unwrap_err();
        assert!(matches!(err, KunError::DuplicateGate(name) if name == "Open"));
    }

    #[test]
    fn test_unknown_gate_override_fails() {
        let mut r = registry();
        let err = r.set_overrides(overrides(&[("Nope", true)])).unwrap_err();
        assert!(matches!(err, KunError::UnknownGate(name) if name == "Nope"));
    }

    #[test]
    fn test_unknown_gate_query_fails() {
        let r = registry();
        assert!(matches!(
            r.is_enabled("Nope"),
            Err(KunError::UnknownGate(_))
        ));
    }

    #[test]
    fn test_locked_gate_rejects_differing_override() {
        let mut r = registry();
        let err = r.set_overrides(overrides(&[("Locked", false)])).unwrap_err();
        assert!(matches!(
            err,
            KunError::LockedGate { ref name, default: true } if name == "Locked"
        ));
        assert!(r.is_enabled("Locked").unwrap());
    }

    #[test]
    fn test_locked_gate_accepts_matching_override() {
        let mut r = registry();
        r.set_overrides(overrides(&[("Locked", true)])).unwrap();
        assert!(r.is_enabled("Locked").unwrap());
    }

    #[test]
    fn test_rejected_overrides_are_not_partially_applied() {
        let mut r = registry();
        let result = r.set_overrides(overrides(&[("Open", true), ("Nope", true)]));
        assert!(result.is_err());
        assert!(!r.is_enabled("Open").unwrap());
        assert_eq!(r.override_for("Open"), None);
    }

    #[test]
    fn test_set_overrides_replaces_previous_map() {
        let mut r = registry();
        r.set_overrides(overrides(&[("Open", true)])).unwrap();
        r.set_overrides(BTreeMap::new()).unwrap();
        assert!(!r.is_enabled("Open").unwrap());
    }

    #[test]
    fn test_locked_gate_ignores_any_override_value() {
        for default in [true, false] {
            let mut r = FeatureGateRegistry::new();
            r.register(FeatureGate::new("G", Stage::Ga, default).locked())
                .unwrap();
            for value in [true, false] {
                let _ = r.set_overrides(overrides(&[("G", value)]));
                assert_eq!(r.is_enabled("G").unwrap(), default);
            }
        }
    }

    #[test]
    fn test_with_defaults_registers_known_gates() {
        let r = FeatureGateRegistry::with_defaults().unwrap();
        assert!(r.is_enabled(CONTROL_PLANE_KUBELET_LOCAL_MODE).unwrap());
        assert!(r.is_enabled(ETCD_LEARNER_MODE).unwrap());
        let names: Vec<&str> = r.gates().map(|g| g.name.as_str()).collect();
        let mut sorted = names.clone();
        sorted.sort_unstable();
        assert_eq!(names, sorted);
    }

    #[test]
    fn test_parse_feature_gates() {
        let parsed = parse_feature_gates(" Foo=true, Bar = false ,").unwrap();
        assert_eq!(parsed, overrides(&[("Foo", true), ("Bar", false)]));
        assert!(parse_feature_gates("").unwrap().is_empty());
    }

    #[test]
    fn test_parse_feature_gates_rejects_malformed_entries() {
        assert!(matches!(
            parse_feature_gates("Foo"),
            Err(KunError::InvalidFeatureGates(_))
        ));
        assert!(matches!(
            parse_feature_gates("Foo=yes"),
            Err(KunError::InvalidFeatureGates(_))
        ));
        assert!(matches!(
            parse_feature_gates("=true"),
            Err(KunError::InvalidFeatureGates(_))
        ));
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Alpha.to_string(), "ALPHA");
        assert_eq!(Stage::Ga.to_string(), "GA");
        assert_eq!(Stage::Deprecated.to_string(), "DEPRECATED");
    }
}
