//! Addon phases. Renders the CoreDNS and kube-proxy manifests for the target
//! version into `<kubernetes-dir>/addons`.

use std::path::{Path, PathBuf};

use tracing::info;

use crate::context::RunData;
use crate::phases::{DEFAULT_IMAGE_REPOSITORY, flags};
use crate::workflow::{PhaseContext, PhaseError, PhaseOutcome};

use super::{dry_run, kubernetes_dir, target_version};

pub const COREDNS_VERSION: &str = "v1.11.3";

const COREDNS_TEMPLATE: &str = r"apiVersion: apps/v1
kind: Deployment
metadata:
  name: coredns
  namespace: kube-system
  labels:
    k8s-app: kube-dns
spec:
  replicas: 2
  selector:
    matchLabels:
      k8s-app: kube-dns
  template:
    metadata:
      labels:
        k8s-app: kube-dns
    spec:
      priorityClassName: system-cluster-critical
      serviceAccountName: coredns
      containers:
      - name: coredns
        image: {{IMAGE}}
        args: [ '-conf', '/etc/coredns/Corefile' ]
";

const KUBE_PROXY_TEMPLATE: &str = r"apiVersion: apps/v1
kind: DaemonSet
metadata:
  name: kube-proxy
  namespace: kube-system
  labels:
    k8s-app: kube-proxy
spec:
  selector:
    matchLabels:
      k8s-app: kube-proxy
  template:
    metadata:
      labels:
        k8s-app: kube-proxy
    spec:
      priorityClassName: system-node-critical
      serviceAccountName: kube-proxy
      hostNetwork: true
      containers:
      - name: kube-proxy
        image: {{IMAGE}}
        command:
        - /usr/local/bin/kube-proxy
        - --config=/var/lib/kube-proxy/config.conf
        - --hostname-override=$(NODE_NAME)
";

pub fn run_coredns(ctx: &PhaseContext<'_, dyn RunData>) -> Result<PhaseOutcome, PhaseError> {
    if !ctx.data.is_control_plane_node() {
        return Ok(PhaseOutcome::not_applicable("not a control plane node"));
    }
    let image = format!("{}/coredns/coredns:{COREDNS_VERSION}", image_repository(ctx));
    render_addon(ctx, "coredns", COREDNS_TEMPLATE, &image)
}

pub fn run_kube_proxy(ctx: &PhaseContext<'_, dyn RunData>) -> Result<PhaseOutcome, PhaseError> {
    if !ctx.data.is_control_plane_node() {
        return Ok(PhaseOutcome::not_applicable("not a control plane node"));
    }
    if ctx.data.config().kube_proxy_disabled {
        info!("[addons] kube-proxy is disabled, skipping");
        return Ok(PhaseOutcome::not_applicable("kube-proxy addon is disabled"));
    }
    let version = target_version(ctx)?;
    let image = format!("{}/kube-proxy:{version}", image_repository(ctx));
    render_addon(ctx, "kube-proxy", KUBE_PROXY_TEMPLATE, &image)
}

fn image_repository<'a>(ctx: &'a PhaseContext<'_, dyn RunData>) -> &'a str {
    ctx.flags
        .get(flags::IMAGE_REPOSITORY)
        .map_or(DEFAULT_IMAGE_REPOSITORY, |repo| repo.trim_end_matches('/'))
}

/// Path an addon manifest is rendered to.
pub fn addon_path(dir: &Path, name: &str) -> PathBuf {
    dir.join("addons").join(format!("{name}.yaml"))
}

fn render_addon(
    ctx: &PhaseContext<'_, dyn RunData>,
    name: &str,
    template: &str,
    image: &str,
) -> Result<PhaseOutcome, PhaseError> {
    let path = addon_path(&kubernetes_dir(ctx)?, name);
    let rendered = template.replace("{{IMAGE}}", image);

    if dry_run(ctx) {
        info!("[dryrun] Would write {} with image {image}", path.display());
        return Ok(PhaseOutcome::Completed);
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            PhaseError::wrap(format!("failed to create {}", parent.display()), e)
        })?;
    }
    std::fs::write(&path, rendered).map_err(|e| {
        PhaseError::wrap(format!("failed to write addon {}", path.display()), e).retryable()
    })?;
    info!("[addons] Applied essential addon: {name}");
    Ok(PhaseOutcome::Completed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NodeConfig;
    use crate::context::{NodeRole, NodeRunContext};
    use crate::features::FeatureGateRegistry;
    use crate::phases::testing;
    use crate::workflow::FlagSet;

    fn exec(
        action: fn(&PhaseContext<'_, dyn RunData>) -> Result<PhaseOutcome, PhaseError>,
        data: &NodeRunContext,
        values: &FlagSet,
    ) -> Result<PhaseOutcome, PhaseError> {
        action(&PhaseContext {
            phase: "addon",
            data,
            flags: values,
        })
    }

    #[test]
    fn test_coredns_rendered_with_repository() {
        let dir = tempfile::tempdir().unwrap();
        let data = testing::context(NodeRole::ControlPlane, dir.path(), false);
        let values =
            testing::flag_values(dir.path(), false).with(flags::IMAGE_REPOSITORY, "mirror.local/");

        assert_eq!(
            exec(run_coredns, &data, &values).unwrap(),
            PhaseOutcome::Completed
        );
        let written = std::fs::read_to_string(addon_path(dir.path(), "coredns")).unwrap();
        assert!(written.contains("image: mirror.local/coredns/coredns:v1.11.3"));
    }

    #[test]
    fn test_kube_proxy_uses_target_version() {
        let dir = tempfile::tempdir().unwrap();
        let data = testing::context(NodeRole::ControlPlane, dir.path(), false);
        let values = testing::flag_values(dir.path(), false);

        exec(run_kube_proxy, &data, &values).unwrap();
        let written = std::fs::read_to_string(addon_path(dir.path(), "kube-proxy")).unwrap();
        assert!(written.contains("image: registry.k8s.io/kube-proxy:v1.31.2"));
        assert!(!written.contains("{{IMAGE}}"));
    }

    #[test]
    fn test_kube_proxy_disabled() {
        let dir = tempfile::tempdir().unwrap();
        let config = NodeConfig {
            role: NodeRole::ControlPlane,
            kubernetes_dir: dir.path().to_path_buf(),
            kube_proxy_disabled: true,
            ..NodeConfig::default()
        };
        let data =
            NodeRunContext::new(config, false, FeatureGateRegistry::with_defaults().unwrap());
        let values = testing::flag_values(dir.path(), false);

        let outcome = exec(run_kube_proxy, &data, &values).unwrap();
        assert_eq!(
            outcome,
            PhaseOutcome::not_applicable("kube-proxy addon is disabled")
        );
        assert!(!addon_path(dir.path(), "kube-proxy").exists());
    }

    #[test]
    fn test_worker_skips_addons() {
        let dir = tempfile::tempdir().unwrap();
        let data = testing::context(NodeRole::Worker, dir.path(), false);
        let values = testing::flag_values(dir.path(), false);

        assert!(matches!(
            exec(run_coredns, &data, &values).unwrap(),
            PhaseOutcome::NotApplicable(_)
        ));
        assert!(!dir.path().join("addons").exists());
    }

    #[test]
    fn test_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let data = testing::context(NodeRole::ControlPlane, dir.path(), true);
        let values = testing::flag_values(dir.path(), true);

        exec(run_coredns, &data, &values).unwrap();
        exec(run_kube_proxy, &data, &values).unwrap();
        assert!(!dir.path().join("addons").exists());
    }
}
