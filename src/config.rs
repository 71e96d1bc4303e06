//! CLI configuration, node configuration file, and argument parsing.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Deserialize;
use tracing::debug;

use crate::context::NodeRole;
use crate::features::parse_feature_gates;
use crate::phases::flags;
use crate::workflow::{FlagSet, Selection};

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const COMMIT: &str = env!("BUILD_COMMIT");
pub const BUILD_DATE: &str = env!("BUILD_DATE");

pub const DEFAULT_KUBERNETES_DIR: &str = "/etc/kubernetes";
pub const DEFAULT_BIND_PORT: u16 = 6443;
pub const DEFAULT_ADVERTISE_ADDRESS: &str = "127.0.0.1";

/// Upgrade a Kubernetes node by running its upgrade phases in order.
#[derive(Parser, Debug, Clone)]
#[command(name = "kun")]
#[command(about = "Phase workflow engine for Kubernetes node upgrades")]
#[command(version = const_format::formatcp!(
    "{} (commit: {}, build date: {})",
    VERSION, COMMIT, BUILD_DATE
))]
pub struct Args {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Node configuration file (YAML)
    #[arg(long, env = "KUN_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// Print intended changes without writing anything
    #[arg(long, global = true, default_value = "false")]
    pub dry_run: bool,

    /// Kubernetes configuration directory
    #[arg(long, global = true)]
    pub kubernetes_dir: Option<PathBuf>,

    /// Target Kubernetes version (e.g., v1.31.2)
    #[arg(long, global = true)]
    pub target_version: Option<String>,

    /// Node role (detected from static pod manifests when omitted)
    #[arg(long, value_enum, global = true)]
    pub role: Option<NodeRole>,

    /// Feature gate overrides (format: NAME=true|false,...)
    #[arg(long, global = true)]
    pub feature_gates: Option<String>,

    /// Run only these phases (comma-separated paths, e.g. addon/coredns)
    #[arg(long, value_delimiter = ',', global = true)]
    pub phases: Vec<String>,

    /// Skip these phases and their sub-phases
    #[arg(long, value_delimiter = ',', global = true)]
    pub skip_phases: Vec<String>,

    /// Upgrade the local etcd member
    #[arg(long, global = true)]
    pub etcd_upgrade: Option<bool>,

    /// Container image repository for addons
    #[arg(long, global = true)]
    pub image_repository: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info", env = "KUN_LOG_LEVEL", global = true)]
    pub log_level: String,

    /// Log format (text, json)
    #[arg(long, default_value = "text", env = "KUN_LOG_FORMAT", global = true)]
    pub log_format: String,
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Run the upgrade node workflow (default)
    Run,
    /// List the phases of the upgrade node workflow
    Phases,
    /// List known feature gates and their effective values
    Features,
}

/// On-disk node configuration. Every field is optional; CLI flags win.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ConfigFile {
    pub role: Option<NodeRole>,
    pub target_version: Option<String>,
    pub kubernetes_dir: Option<PathBuf>,
    #[serde(rename = "localAPIEndpoint")]
    pub local_api_endpoint: Option<ApiEndpoint>,
    pub etcd_upgrade: Option<bool>,
    pub image_repository: Option<String>,
    #[serde(default)]
    pub feature_gates: BTreeMap<String, bool>,
    #[serde(default)]
    pub addons: AddonsConfig,
}

/// Address the local API server listens on.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiEndpoint {
    pub advertise_address: String,
    #[serde(default = "default_bind_port")]
    pub bind_port: u16,
}

impl Default for ApiEndpoint {
    fn default() -> Self {
        Self {
            advertise_address: DEFAULT_ADVERTISE_ADDRESS.to_string(),
            bind_port: DEFAULT_BIND_PORT,
        }
    }
}

impl ApiEndpoint {
    pub fn url(&self) -> String {
        format!("https://{}:{}", self.advertise_address, self.bind_port)
    }
}

const fn default_bind_port() -> u16 {
    DEFAULT_BIND_PORT
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddonsConfig {
    #[serde(default)]
    pub kube_proxy: AddonToggle,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AddonToggle {
    #[serde(default)]
    pub disabled: bool,
}

/// Effective node configuration handed to phases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    pub role: NodeRole,
    pub target_version: Option<String>,
    pub kubernetes_dir: PathBuf,
    pub local_api_endpoint: ApiEndpoint,
    pub etcd_upgrade: bool,
    pub kube_proxy_disabled: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            role: NodeRole::Worker,
            target_version: None,
            kubernetes_dir: PathBuf::from(DEFAULT_KUBERNETES_DIR),
            local_api_endpoint: ApiEndpoint::default(),
            etcd_upgrade: true,
            kube_proxy_disabled: false,
        }
    }
}

/// Application configuration derived from CLI args and the config file.
#[derive(Debug, Clone)]
pub struct Config {
    pub command: Command,
    pub node: NodeConfig,
    pub dry_run: bool,
    pub feature_gates: BTreeMap<String, bool>,
    pub selection: Selection,
    pub image_repository: Option<String>,
    pub log_level: String,
    pub log_format: String,
}

impl Config {
    /// Create config from CLI arguments, reading the config file if given.
    pub fn from_args(args: Args) -> Result<Self> {
        let file = match &args.config {
            Some(path) => load_config_file(path)?,
            None => ConfigFile::default(),
        };
        Self::merge(args, file)
    }

    /// Merge CLI arguments over file values.
    pub fn merge(args: Args, file: ConfigFile) -> Result<Self> {
        let kubernetes_dir = args
            .kubernetes_dir
            .or(file.kubernetes_dir)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_KUBERNETES_DIR));

        let role = args
            .role
            .or(file.role)
            .unwrap_or_else(|| detect_role(&kubernetes_dir));

        let mut feature_gates = file.feature_gates;
        if let Some(raw) = &args.feature_gates {
            feature_gates.extend(parse_feature_gates(raw)?);
        }

        let node = NodeConfig {
            role,
            target_version: args.target_version.or(file.target_version),
            kubernetes_dir,
            local_api_endpoint: file.local_api_endpoint.unwrap_or_default(),
            etcd_upgrade: args.etcd_upgrade.or(file.etcd_upgrade).unwrap_or(true),
            kube_proxy_disabled: file.addons.kube_proxy.disabled,
        };

        Ok(Self {
            command: args.command.unwrap_or(Command::Run),
            node,
            dry_run: args.dry_run,
            feature_gates,
            selection: Selection::new(&args.phases, &args.skip_phases),
            image_repository: args.image_repository.or(file.image_repository),
            log_level: args.log_level,
            log_format: args.log_format,
        })
    }

    /// Command-level flag values passed to the workflow.
    pub fn flag_values(&self) -> FlagSet {
        let mut values = FlagSet::new()
            .with(flags::DRY_RUN, self.dry_run.to_string())
            .with(
                flags::KUBERNETES_DIR,
                self.node.kubernetes_dir.display().to_string(),
            )
            .with(flags::ETCD_UPGRADE, self.node.etcd_upgrade.to_string());
        if let Some(version) = &self.node.target_version {
            values.insert(flags::TARGET_VERSION, version.clone());
        }
        if let Some(repo) = &self.image_repository {
            values.insert(flags::IMAGE_REPOSITORY, repo.clone());
        }
        values
    }
}

/// Read and parse a YAML node configuration file.
pub fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let file = serde_yaml::from_str(&raw)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    debug!("Loaded config file {}", path.display());
    Ok(file)
}

/// A node is a control-plane member when it runs a kube-apiserver static pod.
pub fn detect_role(kubernetes_dir: &Path) -> NodeRole {
    let manifest = kubernetes_dir.join("manifests").join("kube-apiserver.yaml");
    if manifest.is_file() {
        NodeRole::ControlPlane
    } else {
        NodeRole::Worker
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::parse_from(std::iter::once("kun").chain(args.iter().copied()))
    }

    #[test]
    fn test_version_carries_build_info() {
        assert!(!COMMIT.is_empty());
        assert!(!COMMIT.contains(char::is_whitespace));
        assert!(chrono::NaiveDate::parse_from_str(BUILD_DATE, "%Y-%m-%d").is_ok());

        let version = <Args as clap::CommandFactory>::command()
            .get_version()
            .map(str::to_string)
            .unwrap();
        assert_eq!(
            version,
            format!("{VERSION} (commit: {COMMIT}, build date: {BUILD_DATE})")
        );
    }

    #[test]
    fn test_default_command_is_run() {
        let config = Config::merge(parse(&["--role", "worker"]), ConfigFile::default()).unwrap();
        assert_eq!(config.command, Command::Run);
        assert!(!config.dry_run);
        assert!(config.selection.is_empty());
        assert_eq!(
            config.node.kubernetes_dir,
            PathBuf::from(DEFAULT_KUBERNETES_DIR)
        );
        assert!(config.node.etcd_upgrade);
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let args = parse(&["run", "--dry-run", "--skip-phases", "addon,kubeconfig"]);
        let config = Config::merge(args, ConfigFile::default()).unwrap();
        assert_eq!(config.command, Command::Run);
        assert!(config.dry_run);
        assert_eq!(config.selection.excluded(), ["addon", "kubeconfig"]);
    }

    #[test]
    fn test_cli_overrides_file() {
        let file: ConfigFile = serde_yaml::from_str(
            r"
role: worker
targetVersion: v1.30.4
kubernetesDir: /srv/kubernetes
etcdUpgrade: false
featureGates:
  ControlPlaneKubeletLocalMode: false
  RootlessControlPlane: true
",
        )
        .unwrap();
        let args = parse(&[
            "--role",
            "control-plane",
            "--target-version",
            "v1.31.2",
            "--feature-gates",
            "ControlPlaneKubeletLocalMode=true",
        ]);
        let config = Config::merge(args, file).unwrap();

        assert_eq!(config.node.role, NodeRole::ControlPlane);
        assert_eq!(config.node.target_version.as_deref(), Some("v1.31.2"));
        assert_eq!(config.node.kubernetes_dir, PathBuf::from("/srv/kubernetes"));
        assert!(!config.node.etcd_upgrade);
        assert_eq!(
            config.feature_gates.get("ControlPlaneKubeletLocalMode"),
            Some(&true)
        );
        assert_eq!(config.feature_gates.get("RootlessControlPlane"), Some(&true));
    }

    #[test]
    fn test_invalid_feature_gates_flag() {
        let args = parse(&["--role", "worker", "--feature-gates", "Broken"]);
        assert!(Config::merge(args, ConfigFile::default()).is_err());
    }

    #[test]
    fn test_config_file_endpoint_and_addons() {
        let file: ConfigFile = serde_yaml::from_str(
            r"
localAPIEndpoint:
  advertiseAddress: 10.0.0.12
addons:
  kubeProxy:
    disabled: true
",
        )
        .unwrap();
        let config = Config::merge(parse(&["--role", "worker"]), file).unwrap();
        assert_eq!(
            config.node.local_api_endpoint.url(),
            "https://10.0.0.12:6443"
        );
        assert!(config.node.kube_proxy_disabled);
    }

    #[test]
    fn test_config_file_rejects_unknown_fields() {
        let result: std::result::Result<ConfigFile, _> = serde_yaml::from_str("rol: worker\n");
        assert!(result.is_err());
    }

    #[test]
    fn test_load_config_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("kun.yaml");
        std::fs::write(&path, "role: control-plane\ntargetVersion: v1.31.0\n").unwrap();
        let file = load_config_file(&path).unwrap();
        assert_eq!(file.role, Some(NodeRole::ControlPlane));
        assert_eq!(file.target_version.as_deref(), Some("v1.31.0"));

        assert!(load_config_file(&dir.path().join("missing.yaml")).is_err());
    }

    #[test]
    fn test_detect_role() {
        let dir = tempfile::tempdir().unwrap();
        assert_eq!(detect_role(dir.path()), NodeRole::Worker);

        std::fs::create_dir_all(dir.path().join("manifests")).unwrap();
        std::fs::write(dir.path().join("manifests/kube-apiserver.yaml"), "").unwrap();
        assert_eq!(detect_role(dir.path()), NodeRole::ControlPlane);
    }

    #[test]
    fn test_flag_values() {
        let args = parse(&[
            "--role",
            "worker",
            "--dry-run",
            "--target-version",
            "v1.31.2",
            "--image-repository",
            "mirror.local",
        ]);
        let config = Config::merge(args, ConfigFile::default()).unwrap();
        let values = config.flag_values();
        assert!(values.get_bool(flags::DRY_RUN));
        assert_eq!(values.get(flags::TARGET_VERSION), Some("v1.31.2"));
        assert_eq!(values.get(flags::IMAGE_REPOSITORY), Some("mirror.local"));
        assert_eq!(values.get(flags::KUBERNETES_DIR), Some(DEFAULT_KUBERNETES_DIR));
    }
}
