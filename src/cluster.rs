use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use colored::Colorize;
use tracing::{info, warn};

use crate::config::{ClusterConfig, RegistryConfig};
use crate::error::InstallError;
use crate::prompt::Prompter;
use crate::resources::{Node, ResourceList};
use crate::utils::{run_checked, CommandRunner, Invocation};

/// What the installer knows about the target cluster once credentials work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterContext {
    pub kubeconfig: PathBuf,
    pub context: String,
    pub cluster_name: String,
    pub nodes: Vec<String>,
}

pub async fn check_required_tools(runner: &dyn CommandRunner) -> Result<(), InstallError> {
    println!("{}", "🔍 Checking system requirements...".blue());
    let requirements = [
        ("helm", Invocation::helm(&["version"])),
        ("kubectl", Invocation::kubectl(&["version", "--client"])),
    ];
    for (tool, invocation) in requirements {
        let out = runner.run(&invocation).await;
        if !out.success {
            println!("{}", format!("✗ {} is not installed or not configured properly", tool).red());
            return Err(InstallError::MissingTool {
                tool: tool.to_string(),
                stderr: out.stderr,
            });
        }
    }
    println!("{}", "✅ All system requirements are met.".green());
    Ok(())
}

pub fn expand_home(raw: &str) -> PathBuf {
    let raw = raw.trim();
    if raw == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Copy `source` to `dest` and restrict it to the owner.
///
/// Copying a file onto itself is skipped; a failed chmod is only a warning.
pub fn install_kubeconfig(source: &Path, dest: &Path) -> std::io::Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    let same_file = match (fs::canonicalize(source), fs::canonicalize(dest)) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    };
    if !same_file {
        fs::copy(source, dest)?;
        println!("{}", format!("Copied kubeconfig to {}", dest.display()).green());
    }

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        match fs::set_permissions(dest, fs::Permissions::from_mode(0o600)) {
            Ok(()) => println!("{}", "Updated kubeconfig file permissions to 600.".green()),
            Err(e) => {
                warn!(error = %e, "failed to restrict kubeconfig permissions");
                println!(
                    "{}",
                    format!("Failed to update kubeconfig file permissions: {}", e).yellow()
                );
                println!("{}", format!("Please manually run: chmod 600 {}", dest.display()).yellow());
            }
        }
    }
    Ok(())
}

fn invalid(path: &Path, reason: impl Into<String>) -> InstallError {
    InstallError::InvalidKubeconfig {
        path: path.to_path_buf(),
        reason: reason.into(),
    }
}

/// Confirm the kubeconfig reaches a cluster and collect its context and nodes.
pub async fn verify_cluster(
    runner: &dyn CommandRunner,
    kubeconfig: &Path,
) -> Result<ClusterContext, InstallError> {
    let out = runner
        .run(&Invocation::kubectl(&["config", "current-context"]))
        .await;
    if !out.success {
        return Err(invalid(kubeconfig, format!("failed to get current context: {}", out.stderr)));
    }
    let context = out.stdout.trim().to_string();
    println!("{}", format!("Current context: {}", context).green());

    let out = runner
        .run(&Invocation::kubectl(&[
            "config",
            "view",
            "--minify",
            "-o",
            "jsonpath={.clusters[0].name}",
        ]))
        .await;
    if !out.success {
        return Err(invalid(kubeconfig, format!("failed to get cluster name: {}", out.stderr)));
    }
    let cluster_name = out.stdout.trim().to_string();
    println!("{}", format!("Cluster name: {}", cluster_name).green());

    let out = runner
        .run(&Invocation::kubectl(&["get", "nodes", "-o", "json"]))
        .await;
    if !out.success {
        return Err(invalid(kubeconfig, format!("failed to get nodes: {}", out.stderr)));
    }
    let nodes: ResourceList<Node> = serde_json::from_str(&out.stdout)
        .map_err(|e| invalid(kubeconfig, format!("failed to parse nodes JSON output: {}", e)))?;
    let nodes: Vec<String> = nodes.items.into_iter().map(|n| n.metadata.name).collect();

    println!("{}", "Nodes in the cluster:".green());
    for node in &nodes {
        println!("{}", format!("  - {}", node).cyan());
    }
    info!(context = %context, cluster = %cluster_name, nodes = nodes.len(), "connected to cluster");

    Ok(ClusterContext {
        kubeconfig: kubeconfig.to_path_buf(),
        context,
        cluster_name,
        nodes,
    })
}

/// Ask for a kubeconfig, install it at the default location and verify it.
pub async fn setup_credentials(
    runner: &mut dyn CommandRunner,
    prompter: &mut Prompter,
    config: &ClusterConfig,
) -> Result<ClusterContext> {
    println!("{}", "\n🔑 Setting up kubeconfig...".blue());
    let dest = config.kubeconfig_dest()?;

    let source = loop {
        let source = expand_home(&prompter.ask("Enter the path to your kubeconfig file:", &[])?);
        if source.is_file() {
            break source;
        }
        println!(
            "{}",
            format!(
                "The file {} does not exist. Check the path and try again.",
                source.display()
            )
            .red()
        );
        if !prompter.confirm("Do you want to try again?")? {
            return Err(invalid(&source, "file does not exist").into());
        }
    };

    install_kubeconfig(&source, &dest)
        .map_err(|e| invalid(&source, format!("failed to copy to {}: {}", dest.display(), e)))?;
    runner.use_kubeconfig(&dest);

    let context = verify_cluster(&*runner, &dest).await?;
    println!("{}", "✅ Kubeconfig setup successful. Connected to the cluster.".green());
    Ok(context)
}

pub fn check_node_count(context: &ClusterContext, min_nodes: usize) -> Result<(), InstallError> {
    let found = context.nodes.len();
    println!("{}", format!("Number of nodes in the cluster: {}", found).green());
    if found < min_nodes {
        return Err(InstallError::InsufficientNodes {
            found,
            required: min_nodes,
        });
    }
    Ok(())
}

pub async fn namespace_exists(runner: &dyn CommandRunner, namespace: &str) -> bool {
    runner
        .run(&Invocation::kubectl(&["get", "namespace", namespace]))
        .await
        .success
}

pub async fn delete_namespace(runner: &dyn CommandRunner, namespace: &str) -> Result<(), InstallError> {
    run_checked(
        runner,
        Invocation::kubectl(&["delete", "namespace", namespace]),
        &format!("deleting namespace {}", namespace),
    )
    .await?;
    Ok(())
}

pub async fn create_namespace(runner: &dyn CommandRunner, namespace: &str) -> Result<(), InstallError> {
    run_checked(
        runner,
        Invocation::kubectl(&["create", "namespace", namespace]),
        &format!("creating namespace {}", namespace),
    )
    .await?;
    Ok(())
}

pub async fn create_registry_secret(
    runner: &dyn CommandRunner,
    namespace: &str,
    registry: &RegistryConfig,
    username: &str,
    password: &str,
) -> Result<(), InstallError> {
    println!("{}", "🔐 Setting up Docker registry credentials...".blue());
    run_checked(
        runner,
        Invocation::kubectl(&[
            "create",
            "secret",
            "docker-registry",
            &registry.secret_name,
            &format!("--namespace={}", namespace),
            &format!("--docker-server={}", registry.server),
            &format!("--docker-username={}", username),
        ])
        .secret(format!("--docker-password={}", password)),
        &format!("creating registry secret {}", registry.secret_name),
    )
    .await?;
    println!(
        "{}",
        format!("✅ Docker registry secret '{}' created.", registry.secret_name).green()
    );
    Ok(())
}
