use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use serde_yaml::{Mapping, Value};
use tracing::{info, warn};

use crate::config::ChartConfig;
use crate::error::InstallError;
use crate::utils::{run_checked, CommandRunner, Invocation};

pub async fn add_repository(runner: &dyn CommandRunner, chart: &ChartConfig) -> Result<(), InstallError> {
    println!("{}", format!("📚 Adding {} Helm repository...", chart.repo_name).blue());
    let mut add = Invocation::helm(&["repo", "add", &chart.repo_name, &chart.repo_url, "--force-update"]);
    match (&chart.repo_username, &chart.repo_password) {
        (Some(user), Some(pass)) => {
            add = add.arg("--username").arg(user).arg("--password").secret(pass);
        }
        (None, None) => {}
        _ => {
            warn!("repository username and password must be given together; adding the repository without credentials");
            println!(
                "{}",
                "Only one of the repository username and password is set. Ignoring both.".yellow()
            );
        }
    }
    run_checked(runner, add, "helm repo add").await?;
    run_checked(runner, Invocation::helm(&["repo", "update"]), "helm repo update").await?;
    Ok(())
}

/// Pull and unpack the chart into a clean `<work_dir>/<chart>` directory.
pub async fn fetch_chart(runner: &dyn CommandRunner, chart: &ChartConfig) -> Result<(), InstallError> {
    let chart_dir = chart.chart_dir();
    if chart_dir.exists() {
        fs::remove_dir_all(&chart_dir).map_err(|e| {
            InstallError::step(format!("removing {}", chart_dir.display()), e.to_string())
        })?;
    }

    let reference = format!("{}/{}", chart.repo_name, chart.chart_name);
    let work_dir = chart.work_dir.display().to_string();
    let mut pull = Invocation::helm(&["pull", &reference]);
    if let Some(version) = &chart.version {
        pull = pull.arg("--version").arg(version);
    }
    if chart.devel {
        pull = pull.arg("--devel");
    }
    pull = pull.arg("--untar").arg("--untardir").arg(work_dir);

    println!(
        "{}",
        format!(
            "📦 Downloading chart {} {}...",
            reference,
            chart.version.as_deref().unwrap_or("(latest)")
        )
        .blue()
    );
    run_checked(runner, pull, "helm pull").await?;
    Ok(())
}

/// Set `hopsworks.debug: false` in a values file, keeping everything else.
pub fn disable_debug(values_file: &Path) -> Result<()> {
    let raw = fs::read_to_string(values_file)
        .with_context(|| format!("values file not found at {}", values_file.display()))?;
    let mut doc: Value = if raw.trim().is_empty() {
        Value::Mapping(Mapping::new())
    } else {
        serde_yaml::from_str(&raw)
            .with_context(|| format!("failed to parse {}", values_file.display()))?
    };

    let root = doc
        .as_mapping_mut()
        .context("values file is not a YAML mapping")?;
    if !root.get("hopsworks").is_some_and(Value::is_mapping) {
        root.insert(Value::from("hopsworks"), Value::Mapping(Mapping::new()));
    }
    if let Some(section) = root.get_mut("hopsworks").and_then(Value::as_mapping_mut) {
        section.insert(Value::from("debug"), Value::Bool(false));
    }

    fs::write(values_file, serde_yaml::to_string(&doc)?)
        .with_context(|| format!("failed to write {}", values_file.display()))?;
    Ok(())
}

pub fn install_command(chart: &ChartConfig, namespace: &str) -> Invocation {
    let chart_dir = chart.chart_dir();
    let mut install = Invocation::helm(&[
        "install",
        &chart.release_name,
        &chart_dir.display().to_string(),
        "--namespace",
        namespace,
    ]);
    for file in &chart.values_files {
        install = install
            .arg("--values")
            .arg(chart_dir.join(file).display().to_string());
    }
    install = install
        .arg("--timeout")
        .arg(format!("{}m", chart.install_timeout_mins))
        .arg("--wait");
    if chart.devel {
        install = install.arg("--devel");
    }
    // helm enforces its own timeout; give it a minute to report before we cut it off.
    install.timeout(chart.install_timeout() + Duration::from_secs(60))
}

pub fn is_nonfatal(stderr: &str, chart: &ChartConfig) -> bool {
    chart.nonfatal_errors.iter().any(|known| stderr.contains(known.as_str()))
}

/// Repository, pull, values patch and `helm install --wait`, in that order.
pub async fn install_chart(
    runner: &dyn CommandRunner,
    chart: &ChartConfig,
    namespace: &str,
) -> Result<(), InstallError> {
    println!("{}", "\n🚀 Installing Hopsworks...".blue());
    add_repository(runner, chart).await?;
    fetch_chart(runner, chart).await?;

    if let Some(file) = &chart.patch_values_file {
        let path = chart.chart_dir().join(file);
        match disable_debug(&path) {
            Ok(()) => println!("{}", format!("Updated {} for better performance", file).green()),
            Err(e) => {
                warn!(error = %format!("{:#}", e), "values patch skipped");
                println!(
                    "{}",
                    format!("Failed to modify {}: {:#}. Continuing with default settings.", file, e)
                        .yellow()
                );
            }
        }
    }

    let install = install_command(chart, namespace);
    info!(release = %chart.release_name, namespace, "installing chart");
    let out = runner.run(&install).await;
    if !out.success {
        if is_nonfatal(&out.stderr, chart) {
            println!(
                "{}",
                format!("Ignoring expected configuration message: {}", out.stderr.trim()).yellow()
            );
        } else {
            println!("{}", "✗ Failed to install Hopsworks".red());
            println!("{}", format!("Error: {}", out.stderr).red());
            return Err(InstallError::step("helm install", out.stderr));
        }
    }
    println!("{}", "✅ Hopsworks chart installed.".green());
    Ok(())
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::utils::testing::ScriptedRunner;
    use crate::utils::CommandOutput;

    fn chart_in(dir: &Path) -> ChartConfig {
        ChartConfig {
            work_dir: dir.to_path_buf(),
            ..ChartConfig::default()
        }
    }

    #[tokio::test]
    async fn steps_run_in_order_with_overlays() {
        let dir = TempDir::new().unwrap();
        let chart = chart_in(dir.path());
        let runner = ScriptedRunner::new();

        install_chart(&runner, &chart, "hops").await.unwrap();

        let calls = runner.calls();
        let root = dir.path().display().to_string();
        assert_eq!(calls.len(), 4);
        assert_eq!(
            calls[0],
            "helm repo add hopsworks https://nexus.hops.works/repository/hopsworks-helm/ --force-update"
        );
        assert_eq!(calls[1], "helm repo update");
        assert_eq!(
            calls[2],
            format!("helm pull hopsworks/hopsworks --version 4.0.0-rc1 --devel --untar --untardir {root}")
        );
        assert_eq!(
            calls[3],
            format!(
                "helm install hopsworks-release {root}/hopsworks --namespace hops \
                 --values {root}/hopsworks/values.services.yaml \
                 --values {root}/hopsworks/values.yaml \
                 --values {root}/hopsworks/values.dev.yaml \
                 --timeout 60m --wait --devel"
            )
        );
    }

    #[tokio::test]
    async fn credentials_are_passed_to_repo_add() {
        let dir = TempDir::new().unwrap();
        let mut chart = chart_in(dir.path());
        chart.repo_username = Some("deploy".to_string());
        chart.repo_password = Some("s3cret".to_string());
        let runner = ScriptedRunner::new();

        add_repository(&runner, &chart).await.unwrap();
        assert!(runner.calls()[0].ends_with("--force-update --username deploy --password s3cret"));
    }

    #[tokio::test]
    async fn username_without_password_adds_repo_anonymously() {
        let dir = TempDir::new().unwrap();
        let mut chart = chart_in(dir.path());
        chart.repo_username = Some("deploy".to_string());
        let runner = ScriptedRunner::new();

        add_repository(&runner, &chart).await.unwrap();
        let calls = runner.calls();
        assert!(calls[0].ends_with("--force-update"));
        assert!(!calls[0].contains("deploy"));
        assert_eq!(calls[1], "helm repo update");
    }

    #[tokio::test]
    async fn failed_pull_stops_before_install() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new().on(
            "helm pull",
            CommandOutput::failed("Error: chart \"hopsworks\" version \"9.9\" not found"),
        );

        let err = install_chart(&runner, &chart_in(dir.path()), "hops").await.unwrap_err();
        assert!(err.to_string().starts_with("helm pull failed: Error: chart"));
        assert!(!runner.called("helm install"));
    }

    #[tokio::test]
    async fn stale_chart_directory_is_removed() {
        let dir = TempDir::new().unwrap();
        let stale = dir.path().join("hopsworks");
        fs::create_dir_all(stale.join("templates")).unwrap();
        fs::write(stale.join("Chart.yaml"), "name: old").unwrap();

        fetch_chart(&ScriptedRunner::new(), &chart_in(dir.path())).await.unwrap();
        assert!(!stale.exists());
    }

    #[tokio::test]
    async fn known_nonfatal_install_error_is_tolerated() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new().on(
            "helm install",
            CommandOutput::failed(
                "Error: admission webhook denied: invalid ingress class: IngressClass.networking.k8s.io \"nginx\" not found",
            ),
        );
        install_chart(&runner, &chart_in(dir.path()), "hops").await.unwrap();
    }

    #[tokio::test]
    async fn other_install_errors_are_fatal() {
        let dir = TempDir::new().unwrap();
        let runner = ScriptedRunner::new()
            .on("helm install", CommandOutput::failed("Error: INSTALLATION FAILED: timed out"));
        let err = install_chart(&runner, &chart_in(dir.path()), "hops").await.unwrap_err();
        assert!(matches!(err, InstallError::StepFailed { ref step, .. } if step == "helm install"));
    }

    #[test]
    fn install_runner_timeout_exceeds_helm_timeout() {
        let inv = install_command(&ChartConfig::default(), "hops");
        assert_eq!(inv.timeout, Some(Duration::from_secs(61 * 60)));
    }

    #[test]
    fn debug_flag_is_turned_off_and_siblings_kept() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("values.dev.yaml");
        fs::write(&path, "hopsworks:\n  debug: true\n  replicas: 2\nglobal:\n  x: 1\n").unwrap();

        disable_debug(&path).unwrap();

        let doc: Value = serde_yaml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["hopsworks"]["debug"], Value::Bool(false));
        assert_eq!(doc["hopsworks"]["replicas"], Value::from(2));
        assert_eq!(doc["global"]["x"], Value::from(1));
    }

    #[test]
    fn debug_section_is_created_when_absent() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("values.dev.yaml");
        fs::write(&path, "global: {}\n").unwrap();

        disable_debug(&path).unwrap();
        let doc: Value = serde_yaml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["hopsworks"]["debug"], Value::Bool(false));
    }

    #[test]
    fn missing_values_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(disable_debug(&dir.path().join("nope.yaml")).is_err());
    }
}
