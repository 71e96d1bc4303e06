//! Control-plane phase: moves the static pod manifests of this node to the
//! target version.

use std::path::Path;

use serde_yaml::Value;
use tracing::{debug, info};

use crate::context::RunData;
use crate::phases::{KubeVersion, flags};
use crate::workflow::{PhaseContext, PhaseError, PhaseOutcome};

use super::{dry_run, kubernetes_dir, target_version};

/// Static pods that always follow the Kubernetes version.
pub const COMPONENTS: &[&str] = &[
    "kube-apiserver",
    "kube-controller-manager",
    "kube-scheduler",
];

pub const ETCD: &str = "etcd";

/// etcd image tag shipped with each supported Kubernetes minor.
const ETCD_VERSIONS: &[(u32, &str)] = &[
    (31, "3.5.15-0"),
    (32, "3.5.16-0"),
    (33, "3.5.21-0"),
    (34, "3.6.4-0"),
];

pub fn run(ctx: &PhaseContext<'_, dyn RunData>) -> Result<PhaseOutcome, PhaseError> {
    if !ctx.data.is_control_plane_node() {
        info!("[upgrade] Skipping phase. Not a control plane node.");
        return Ok(PhaseOutcome::not_applicable("not a control plane node"));
    }

    let version = target_version(ctx)?;
    let manifests = kubernetes_dir(ctx)?.join("manifests");
    let dry_run = dry_run(ctx);
    let tag = version.to_string();

    for component in COMPONENTS {
        upgrade_manifest(&manifests, component, &tag, dry_run)?;
    }

    if ctx.flags.get_bool(flags::ETCD_UPGRADE) {
        let etcd_manifest = manifests.join(format!("{ETCD}.yaml"));
        if etcd_manifest.is_file() {
            let etcd_tag = etcd_version(version)?;
            upgrade_manifest(&manifests, ETCD, etcd_tag, dry_run)?;
        } else {
            debug!("[upgrade/etcd] No local etcd manifest, assuming external etcd");
        }
    } else {
        info!("[upgrade/etcd] Skipping etcd upgrade");
    }

    info!("[upgrade] The control plane instance for this node was successfully upgraded!");
    Ok(PhaseOutcome::Completed)
}

/// etcd tag for a Kubernetes version.
pub fn etcd_version(version: KubeVersion) -> Result<&'static str, PhaseError> {
    ETCD_VERSIONS
        .iter()
        .find(|(minor, _)| *minor == version.minor)
        .map(|(_, tag)| *tag)
        .ok_or_else(|| PhaseError::new(format!("no known etcd version for Kubernetes {version}")))
}

fn upgrade_manifest(
    manifests: &Path,
    component: &str,
    tag: &str,
    dry_run: bool,
) -> Result<(), PhaseError> {
    let path = manifests.join(format!("{component}.yaml"));
    let raw = std::fs::read_to_string(&path).map_err(|e| {
        PhaseError::wrap(format!("failed to read manifest {}", path.display()), e)
    })?;
    let mut manifest: Value = serde_yaml::from_str(&raw).map_err(|e| {
        PhaseError::wrap(format!("failed to parse manifest {}", path.display()), e)
    })?;

    let changed = retag_containers(&mut manifest, tag);
    if changed == 0 {
        debug!("[upgrade/{component}] Already at {tag}");
        return Ok(());
    }

    if dry_run {
        info!(
            "[dryrun] Would update {} container image(s) in {} to {tag}",
            changed,
            path.display()
        );
        return Ok(());
    }

    let rendered = serde_yaml::to_string(&manifest).map_err(|e| {
        PhaseError::wrap(format!("failed to render manifest {}", path.display()), e)
    })?;
    std::fs::write(&path, rendered).map_err(|e| {
        PhaseError::wrap(format!("failed to write manifest {}", path.display()), e).retryable()
    })?;
    info!("[upgrade/{component}] Upgraded static pod manifest to {tag}");
    Ok(())
}

/// Set the tag of every `spec.containers[*].image`, returning how many changed.
fn retag_containers(manifest: &mut Value, tag: &str) -> usize {
    let Some(containers) = manifest
        .get_mut("spec")
        .and_then(|spec| spec.get_mut("containers"))
        .and_then(Value::as_sequence_mut)
    else {
        return 0;
    };

    let mut changed = 0;
    for container in containers {
        let Some(image) = container.get_mut("image") else {
            continue;
        };
        let Some(current) = image.as_str() else {
            continue;
        };
        let next = retag(current, tag);
        if next != current {
            *image = Value::String(next);
            changed += 1;
        }
    }
    changed
}

/// Replace the tag (and any digest) of an image reference.
pub fn retag(image: &str, tag: &str) -> String {
    let name = image.split_once('@').map_or(image, |(name, _)| name);
    // A ':' after the last '/' is a tag, before it a registry port.
    let repository = match (name.rfind(':'), name.rfind('/')) {
        (Some(colon), Some(slash)) if colon > slash => &name[..colon],
        (Some(colon), None) => &name[..colon],
        _ => name,
    };
    format!("{repository}:{tag}")
}
