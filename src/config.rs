use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InstallerConfig {
    pub telemetry_url: String,
    pub telemetry_timeout_secs: u64,
    pub startup_license_url: String,
    pub evaluation_license_url: String,
    pub chart: ChartConfig,
    pub cluster: ClusterConfig,
    pub registry: RegistryConfig,
    pub ingress: IngressConfig,
    pub timing: TimingConfig,
}

impl Default for InstallerConfig {
    fn default() -> Self {
        Self {
            telemetry_url:
                "https://magiclex--hopsworks-installation-hopsworks-installation.modal.run/"
                    .to_string(),
            telemetry_timeout_secs: 30,
            startup_license_url: "https://www.hopsworks.ai/startup-license".to_string(),
            evaluation_license_url: "https://www.hopsworks.ai/evaluation-license".to_string(),
            chart: ChartConfig::default(),
            cluster: ClusterConfig::default(),
            registry: RegistryConfig::default(),
            ingress: IngressConfig::default(),
            timing: TimingConfig::default(),
        }
    }
}

impl InstallerConfig {
    /// Load defaults, overlaid with the YAML file at `path` when given.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            None => Ok(Self::default()),
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config file {}", path.display()))?;
                Self::from_yaml(&raw)
                    .with_context(|| format!("invalid config file {}", path.display()))
            }
        }
    }

    pub fn from_yaml(raw: &str) -> Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    pub fn telemetry_timeout(&self) -> Duration {
        Duration::from_secs(self.telemetry_timeout_secs)
    }
}

/// Chart repository and release coordinates.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ChartConfig {
    pub repo_name: String,
    pub repo_url: String,
    #[serde(skip)]
    pub repo_username: Option<String>,
    #[serde(skip)]
    pub repo_password: Option<String>,
    pub chart_name: String,
    pub version: Option<String>,
    pub release_name: String,
    pub work_dir: PathBuf,
    /// Applied in order; later files override earlier ones.
    pub values_files: Vec<String>,
    pub patch_values_file: Option<String>,
    pub install_timeout_mins: u64,
    pub devel: bool,
    pub nonfatal_errors: Vec<String>,
}

impl Default for ChartConfig {
    fn default() -> Self {
        Self {
            repo_name: "hopsworks".to_string(),
            repo_url: "https://nexus.hops.works/repository/hopsworks-helm/".to_string(),
            repo_username: None,
            repo_password: None,
            chart_name: "hopsworks".to_string(),
            version: Some("4.0.0-rc1".to_string()),
            release_name: "hopsworks-release".to_string(),
            work_dir: PathBuf::from("."),
            values_files: vec![
                "values.services.yaml".to_string(),
                "values.yaml".to_string(),
                "values.dev.yaml".to_string(),
            ],
            patch_values_file: Some("values.dev.yaml".to_string()),
            install_timeout_mins: 60,
            devel: true,
            nonfatal_errors: vec!["invalid ingress class: IngressClass.networking.k8s.io".to_string()],
        }
    }
}

impl ChartConfig {
    pub fn chart_dir(&self) -> PathBuf {
        self.work_dir.join(&self.chart_name)
    }

    pub fn install_timeout(&self) -> Duration {
        Duration::from_secs(self.install_timeout_mins * 60)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    pub min_nodes: usize,
    /// Where the operator's kubeconfig is copied. `None` means `~/.kube/config`.
    pub kubeconfig_dest: Option<PathBuf>,
    pub default_namespace: String,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            min_nodes: 6,
            kubeconfig_dest: None,
            default_namespace: "hopsworks".to_string(),
        }
    }
}

impl ClusterConfig {
    pub fn kubeconfig_dest(&self) -> Result<PathBuf> {
        if let Some(dest) = &self.kubeconfig_dest {
            return Ok(dest.clone());
        }
        let home = dirs::home_dir().context("could not determine home directory")?;
        Ok(home.join(".kube").join("config"))
    }
}

/// Image-pull secret created in the installation namespace.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub enabled: bool,
    pub server: String,
    pub secret_name: String,
    #[serde(skip)]
    pub username: Option<String>,
    #[serde(skip)]
    pub password: Option<String>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            server: "docker.hops.works".to_string(),
            secret_name: "regcred".to_string(),
            username: None,
            password: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IngressConfig {
    pub repo_name: String,
    pub repo_url: String,
    pub chart_name: String,
    pub release_name: String,
    pub namespace: String,
    pub controller_label: String,
    pub admission_service: String,
    pub controller_service: String,
    pub resource_name: String,
    pub default_host: String,
    pub backend_service: String,
    pub backend_port: u16,
    pub manifest_path: PathBuf,
    pub hosts_file: PathBuf,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            repo_name: "ingress-nginx".to_string(),
            repo_url: "https://kubernetes.github.io/ingress-nginx".to_string(),
            chart_name: "ingress-nginx".to_string(),
            release_name: "ingress-nginx".to_string(),
            namespace: "ingress-nginx".to_string(),
            controller_label: "app.kubernetes.io/name=ingress-nginx".to_string(),
            admission_service: "ingress-nginx-controller-admission".to_string(),
            controller_service: "ingress-nginx-controller".to_string(),
            resource_name: "hopsworks-ingress".to_string(),
            default_host: "hopsworks.ai.local".to_string(),
            backend_service: "hopsworks".to_string(),
            backend_port: 8182,
            manifest_path: PathBuf::from("hopsworks-ingress.yaml"),
            hosts_file: PathBuf::from("/etc/hosts"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    pub pod_timeout_secs: u64,
    pub extra_wait_secs: u64,
    pub ingress_address_timeout_secs: u64,
    pub webhook_timeout_secs: u64,
    pub http_probe_timeout_secs: u64,
    pub poll_interval_secs: u64,
    pub readiness_threshold: f64,
    pub command_timeout_secs: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            pod_timeout_secs: 30 * 60,
            extra_wait_secs: 10 * 60,
            ingress_address_timeout_secs: 10 * 60,
            webhook_timeout_secs: 5 * 60,
            http_probe_timeout_secs: 10 * 60,
            poll_interval_secs: 10,
            readiness_threshold: 80.0,
            command_timeout_secs: 5 * 60,
        }
    }
}

impl TimingConfig {
    pub fn pod_timeout(&self) -> Duration {
        Duration::from_secs(self.pod_timeout_secs)
    }

    pub fn extra_wait(&self) -> Duration {
        Duration::from_secs(self.extra_wait_secs)
    }

    pub fn ingress_address_timeout(&self) -> Duration {
        Duration::from_secs(self.ingress_address_timeout_secs)
    }

    pub fn webhook_timeout(&self) -> Duration {
        Duration::from_secs(self.webhook_timeout_secs)
    }

    pub fn http_probe_timeout(&self) -> Duration {
        Duration::from_secs(self.http_probe_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}
