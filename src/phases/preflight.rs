//! Preflight phase: validates the node before anything is changed.

use tracing::{info, warn};

use crate::context::RunData;
use crate::workflow::{PhaseContext, PhaseError, PhaseOutcome};

use super::{kubernetes_dir, target_version};

/// Oldest minor version this tool knows how to upgrade to.
pub const MIN_SUPPORTED_MINOR: u32 = 30;

pub fn run(ctx: &PhaseContext<'_, dyn RunData>) -> Result<PhaseOutcome, PhaseError> {
    info!("[preflight] Running pre-flight checks");

    let version = target_version(ctx)?;
    if version.major != 1 || version.minor < MIN_SUPPORTED_MINOR {
        return Err(PhaseError::new(format!(
            "target version {version} is not supported, minimum is v1.{MIN_SUPPORTED_MINOR}.0"
        )));
    }

    let dir = kubernetes_dir(ctx)?;
    if !dir.is_dir() {
        return Err(PhaseError::new(format!(
            "Kubernetes directory {} does not exist",
            dir.display()
        )));
    }

    if ctx.data.is_control_plane_node() && !dir.join("manifests").is_dir() {
        warn!(
            "[preflight] Control plane node without {}/manifests",
            dir.display()
        );
    }

    info!(
        "[preflight] Upgrading {} node to {}",
        ctx.data.role(),
        version
    );
    Ok(PhaseOutcome::Completed)
}
