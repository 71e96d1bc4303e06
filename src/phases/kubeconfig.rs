//! Kubeconfig phase: keeps the kubelet of a control plane node talking to its
//! local API server.

use std::path::Path;

use anyhow::Context;
use serde_yaml::Value;
use tracing::{debug, info};

use crate::context::RunData;
use crate::features::CONTROL_PLANE_KUBELET_LOCAL_MODE;
use crate::workflow::{PhaseContext, PhaseError, PhaseOutcome};

use super::kubernetes_dir;

pub const KUBELET_KUBECONFIG: &str = "kubelet.conf";

pub fn run(ctx: &PhaseContext<'_, dyn RunData>) -> Result<PhaseOutcome, PhaseError> {
    if !ctx.data.is_control_plane_node() {
        info!("[upgrade] Skipping phase. Not a control plane node.");
        return Ok(PhaseOutcome::not_applicable("not a control plane node"));
    }

    let local_mode = ctx
        .data
        .feature_enabled(CONTROL_PLANE_KUBELET_LOCAL_MODE)
        .map_err(|e| PhaseError::wrap("failed to resolve feature gate", e))?;

    if local_mode {
        let path = kubernetes_dir(ctx)?.join(KUBELET_KUBECONFIG);
        let server = ctx.data.config().local_api_endpoint.url();
        update_kubelet_local_mode(&path, &server, super::dry_run(ctx))
            .map_err(|e| PhaseError::wrap("failed to update kubelet local mode", e))?;
    } else {
        debug!("[upgrade] {CONTROL_PLANE_KUBELET_LOCAL_MODE} is disabled, kubelet.conf unchanged");
    }

    info!("[upgrade] The kubeconfig for this node was successfully updated!");
    Ok(PhaseOutcome::Completed)
}

/// Point every cluster entry of a kubeconfig at `server`. Returns whether the
/// file needed a change.
pub fn update_kubelet_local_mode(path: &Path, server: &str, dry_run: bool) -> anyhow::Result<bool> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mut kubeconfig: Value = serde_yaml::from_str(&raw)
        .with_context(|| format!("failed to parse {}", path.display()))?;

    let clusters = kubeconfig
        .get_mut("clusters")
        .and_then(Value::as_sequence_mut)
        .filter(|clusters| !clusters.is_empty())
        .with_context(|| format!("{} has no clusters", path.display()))?;

    let mut changed = false;
    for entry in clusters {
        let cluster = entry
            .get_mut("cluster")
            .and_then(Value::as_mapping_mut)
            .with_context(|| format!("{} has a malformed cluster entry", path.display()))?;
        if cluster.get("server").and_then(Value::as_str) == Some(server) {
            continue;
        }
        cluster.insert("server".into(), server.into());
        changed = true;
    }

    if !changed {
        debug!("[upgrade] {} already points at {server}", path.display());
        return Ok(false);
    }

    if dry_run {
        info!("[dryrun] Would point {} at {server}", path.display());
        return Ok(true);
    }

    let rendered = serde_yaml::to_string(&kubeconfig)?;
    std::fs::write(path, rendered)
        .with_context(|| format!("failed to write {}", path.display()))?;
    info!("[upgrade] Updated {} to use {server}", path.display());
    Ok(true)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::context::NodeRole;
    use crate::phases::testing;

    const KUBELET_CONF: &str = r"apiVersion: v1
kind: Config
clusters:
- name: kubernetes
  cluster:
    certificate-authority-data: Zm9v
    server: https://10.0.0.100:6443
contexts:
- name: system:node:cp-1@kubernetes
  context:
    cluster: kubernetes
    user: system:node:cp-1
current-context: system:node:cp-1@kubernetes
";

    fn server_of(path: &Path) -> String {
        let value: Value = serde_yaml::from_str(&std::fs::read_to_string(path).unwrap()).unwrap();
        value["clusters"][0]["cluster"]["server"]
            .as_str()
            .unwrap()
            .to_string()
    }

    fn exec(data: &crate::context::NodeRunContext, dir: &Path) -> Result<PhaseOutcome, PhaseError> {
        let values = testing::flag_values(dir, data.dry_run());
        run(&PhaseContext {
            phase: "kubeconfig",
            data,
            flags: &values,
        })
    }

    fn write_conf(dir: &Path) -> std::path::PathBuf {
        let path = dir.join(KUBELET_KUBECONFIG);
        std::fs::write(&path, KUBELET_CONF).unwrap();
        path
    }

    #[test]
    fn test_points_kubelet_at_local_endpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_conf(dir.path());
        let data = testing::context(NodeRole::ControlPlane, dir.path(), false);

        assert_eq!(exec(&data, dir.path()).unwrap(), PhaseOutcome::Completed);
        assert_eq!(server_of(&path), "https://127.0.0.1:6443");
    }

    #[test]
    fn test_gate_disabled_leaves_kubeconfig() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_conf(dir.path());
        let data = testing::context_with_gates(
            NodeRole::ControlPlane,
            dir.path(),
            false,
            BTreeMap::from([(CONTROL_PLANE_KUBELET_LOCAL_MODE.to_string(), false)]),
        );

        assert_eq!(exec(&data, dir.path()).unwrap(), PhaseOutcome::Completed);
        assert_eq!(server_of(&path), "https://10.0.0.100:6443");
    }

    #[test]
    fn test_worker_is_not_applicable() {
        let dir = tempfile::tempdir().unwrap();
        let data = testing::context(NodeRole::Worker, dir.path(), false);
        assert_eq!(
            exec(&data, dir.path()).unwrap(),
            PhaseOutcome::not_applicable("not a control plane node")
        );
    }

    #[test]
    fn test_dry_run_does_not_write() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_conf(dir.path());
        let data = testing::context(NodeRole::ControlPlane, dir.path(), true);

        exec(&data, dir.path()).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), KUBELET_CONF);
    }

    #[test]
    fn test_missing_kubelet_conf_fails() {
        let dir = tempfile::tempdir().unwrap();
        let data = testing::context(NodeRole::ControlPlane, dir.path(), false);
        let err = exec(&data, dir.path()).unwrap_err();
        assert_eq!(err.message(), "failed to update kubelet local mode");

        // phase error -> "failed to read" context -> io::Error
        let mut chain = Vec::new();
        let mut cause = std::error::Error::source(&err);
        while let Some(e) = cause {
            chain.push(e.to_string());
            cause = e.source();
        }
        assert_eq!(chain.len(), 2, "{chain:?}");
        assert!(chain[0].starts_with("failed to read"));
        assert!(chain[1].contains("No such file"));
    }

    #[test]
    fn test_update_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_conf(dir.path());
        assert!(update_kubelet_local_mode(&path, "https://127.0.0.1:6443", false).unwrap());
        assert!(!update_kubelet_local_mode(&path, "https://127.0.0.1:6443", false).unwrap());
    }

    #[test]
    fn test_update_rejects_kubeconfig_without_clusters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(KUBELET_KUBECONFIG);
        std::fs::write(&path, "apiVersion: v1\nkind: Config\nclusters: []\n").unwrap();
        assert!(update_kubelet_local_mode(&path, "https://127.0.0.1:6443", false).is_err());
    }
}
