//! Phases of `upgrade node`.
//!
//! Each phase decides for itself whether it applies to this node and honors
//! dry-run by logging the changes it would make.

pub mod addons;
pub mod control_plane;
pub mod kubeconfig;
pub mod preflight;

use std::path::PathBuf;

use crate::context::RunData;
use crate::error::KunError;
use crate::workflow::{Phase, PhaseContext, PhaseError, Workflow};

/// Flag names shared between the CLI and the phase tree.
pub mod flags {
    pub const DRY_RUN: &str = "dry-run";
    pub const KUBERNETES_DIR: &str = "kubernetes-dir";
    pub const TARGET_VERSION: &str = "target-version";
    pub const ETCD_UPGRADE: &str = "etcd-upgrade";
    pub const IMAGE_REPOSITORY: &str = "image-repository";

    /// Flags declared by the `upgrade node` command itself.
    pub const GLOBAL: &[&str] = &[DRY_RUN, KUBERNETES_DIR, TARGET_VERSION, ETCD_UPGRADE];
}

pub const DEFAULT_IMAGE_REPOSITORY: &str = "registry.k8s.io";

/// Phase tree of `upgrade node`.
pub fn new_upgrade_node_workflow() -> Result<Workflow<dyn RunData>, KunError> {
    let phases: Vec<Phase<dyn RunData>> = vec![
        Phase::new("preflight")
            .short("Run upgrade node pre-flight checks")
            .inherit_flags([flags::KUBERNETES_DIR, flags::TARGET_VERSION])
            .run(preflight::run),
        Phase::new("control-plane")
            .short("Upgrade the control plane instance deployed on this node, if any")
            .inherit_flags([
                flags::DRY_RUN,
                flags::KUBERNETES_DIR,
                flags::TARGET_VERSION,
                flags::ETCD_UPGRADE,
            ])
            .run(control_plane::run),
        Phase::new("addon")
            .short("Upgrade the default kubeadm addons")
            .local_flag(flags::IMAGE_REPOSITORY, DEFAULT_IMAGE_REPOSITORY)
            .child(
                Phase::new("coredns")
                    .short("Upgrade the CoreDNS addon")
                    .inherit_flags([
                        flags::DRY_RUN,
                        flags::KUBERNETES_DIR,
                        flags::IMAGE_REPOSITORY,
                    ])
                    .run(addons::run_coredns),
            )
            .child(
                Phase::new("kube-proxy")
                    .short("Upgrade the kube-proxy addon")
                    .inherit_flags([
                        flags::DRY_RUN,
                        flags::KUBERNETES_DIR,
                        flags::TARGET_VERSION,
                        flags::IMAGE_REPOSITORY,
                    ])
                    .run(addons::run_kube_proxy),
            ),
        Phase::new("kubeconfig")
            .short("Upgrade kubeconfig files for this node")
            .hidden()
            .inherit_flags([flags::DRY_RUN, flags::KUBERNETES_DIR])
            .run(kubeconfig::run),
    ];

    Workflow::new("node", flags::GLOBAL.iter().copied(), phases)
}

/// Parsed Kubernetes version (`v1.31.2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct KubeVersion {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl std::str::FromStr for KubeVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let raw = trimmed.strip_prefix('v').unwrap_or(trimmed);
        let parts: Vec<&str> = raw.split('.').collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(format!("invalid version {s:?}, expected vMAJOR.MINOR.PATCH"));
        }
        let num = |p: &str| {
            p.parse::<u32>()
                .map_err(|_| format!("invalid version {s:?}, {p:?} is not a number"))
        };
        Ok(Self {
            major: num(parts[0])?,
            minor: num(parts[1])?,
            patch: parts.get(2).map_or(Ok(0), |p| num(p))?,
        })
    }
}

impl std::fmt::Display for KubeVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

fn required_flag<'a>(
    ctx: &'a PhaseContext<'_, dyn RunData>,
    name: &str,
) -> Result<&'a str, PhaseError> {
    ctx.flags
        .get(name)
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| PhaseError::new(format!("phase {} requires --{name}", ctx.phase)))
}

/// Whether the phase must only describe its changes. Either the run data or
/// the inherited `--dry-run` flag turns it on.
fn dry_run(ctx: &PhaseContext<'_, dyn RunData>) -> bool {
    ctx.data.dry_run() || ctx.flags.get_bool(flags::DRY_RUN)
}

fn kubernetes_dir(ctx: &PhaseContext<'_, dyn RunData>) -> Result<PathBuf, PhaseError> {
    required_flag(ctx, flags::KUBERNETES_DIR).map(PathBuf::from)
}

fn target_version(ctx: &PhaseContext<'_, dyn RunData>) -> Result<KubeVersion, PhaseError> {
    required_flag(ctx, flags::TARGET_VERSION)?
        .parse()
        .map_err(PhaseError::new)
}
