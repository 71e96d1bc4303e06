//! Run data shared by every phase of one invocation.

use clap::ValueEnum;
use serde::Deserialize;

use crate::config::NodeConfig;
use crate::error::KunError;
use crate::features::FeatureGateRegistry;

/// Role of the node being upgraded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum NodeRole {
    ControlPlane,
    Worker,
}

impl std::fmt::Display for NodeRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ControlPlane => write!(f, "control-plane"),
            Self::Worker => write!(f, "worker"),
        }
    }
}

/// Read-only view of the run that phase actions are given.
///
/// Every accessor is answered from state resolved before the run starts.
pub trait RunData {
    fn role(&self) -> NodeRole;

    fn dry_run(&self) -> bool;

    fn config(&self) -> &NodeConfig;

    /// Effective value of a feature gate.
    fn feature_enabled(&self, name: &str) -> Result<bool, KunError>;

    fn is_control_plane_node(&self) -> bool {
        self.role() == NodeRole::ControlPlane
    }
}

/// [`RunData`] for the `upgrade node` command.
#[derive(Debug)]
pub struct NodeRunContext {
    config: NodeConfig,
    dry_run: bool,
    features: FeatureGateRegistry,
}

impl NodeRunContext {
    /// The registry must already carry its validated overrides.
    pub const fn new(config: NodeConfig, dry_run: bool, features: FeatureGateRegistry) -> Self {
        Self {
            config,
            dry_run,
            features,
        }
    }

    pub const fn features(&self) -> &FeatureGateRegistry {
        &self.features
    }
}

impl RunData for NodeRunContext {
    fn role(&self) -> NodeRole {
        self.config.role
    }

    fn dry_run(&self) -> bool {
        self.dry_run
    }

    fn config(&self) -> &NodeConfig {
        &self.config
    }

    fn feature_enabled(&self, name: &str) -> Result<bool, KunError> {
        self.features.is_enabled(name)
    }
}
