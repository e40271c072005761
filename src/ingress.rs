use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use colored::Colorize;
use tracing::{info, warn};

use crate::config::{IngressConfig, InstallerConfig};
use crate::error::InstallError;
use crate::prompt::Prompter;
use crate::readiness::{poll_until, wait_for_webhook};
use crate::resources::{LoadBalanced, Pod, ResourceList};
use crate::utils::{apply_manifest, run_checked, CommandRunner, Invocation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngressDescriptor {
    pub name: String,
    pub host: String,
    pub address: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostsUpdate {
    Written,
    WrittenWithSudo,
    Manual,
}

/// Namespace of the first pod carrying the controller label, in any namespace.
/// A failed query is treated as "not installed".
pub async fn find_controller(runner: &dyn CommandRunner, ingress: &IngressConfig) -> Option<String> {
    println!("{}", "\n🔍 Checking for an existing ingress controller...".blue());
    let out = runner
        .run(&Invocation::kubectl(&[
            "get",
            "pods",
            "--all-namespaces",
            "-l",
            &ingress.controller_label,
            "-o",
            "json",
        ]))
        .await;
    if !out.success {
        println!(
            "{}",
            "Failed to check ingress controller. Proceeding to install one.".yellow()
        );
        return None;
    }
    let pods = match serde_json::from_str::<ResourceList<Pod>>(&out.stdout) {
        Ok(pods) => pods,
        Err(e) => {
            warn!(error = %e, "failed to parse controller pod listing");
            return None;
        }
    };
    match pods.items.into_iter().next() {
        Some(pod) => {
            let namespace = pod.metadata.namespace.unwrap_or_else(|| ingress.namespace.clone());
            println!(
                "{}",
                format!("✅ Ingress controller is already installed in namespace {}.", namespace).green()
            );
            Some(namespace)
        }
        None => {
            println!("{}", "No ingress controller found.".yellow());
            None
        }
    }
}

pub async fn install_controller(runner: &dyn CommandRunner, ingress: &IngressConfig) -> Result<(), InstallError> {
    println!("{}", "\n🌐 Installing ingress-nginx controller...".blue());
    run_checked(
        runner,
        Invocation::helm(&["repo", "add", &ingress.repo_name, &ingress.repo_url]),
        "helm repo add",
    )
    .await?;
    run_checked(runner, Invocation::helm(&["repo", "update"]), "helm repo update").await?;

    let chart = format!("{}/{}", ingress.repo_name, ingress.chart_name);
    run_checked(
        runner,
        Invocation::helm(&[
            "install",
            &ingress.release_name,
            &chart,
            "--namespace",
            &ingress.namespace,
            "--create-namespace",
            "--set",
            "controller.service.type=LoadBalancer",
        ]),
        "installing ingress controller",
    )
    .await?;
    println!("{}", "✅ Ingress controller installed successfully.".green());
    Ok(())
}

pub fn render_manifest(ingress: &IngressConfig, namespace: &str, host: &str) -> String {
    format!(
        r#"apiVersion: networking.k8s.io/v1
kind: Ingress
metadata:
  name: {name}
  namespace: {namespace}
  annotations:
    nginx.ingress.kubernetes.io/rewrite-target: /
spec:
  ingressClassName: nginx
  rules:
  - host: {host}
    http:
      paths:
      - path: /
        pathType: Prefix
        backend:
          service:
            name: {service}
            port:
              number: {port}
"#,
        name = ingress.resource_name,
        namespace = namespace,
        host = host,
        service = ingress.backend_service,
        port = ingress.backend_port,
    )
}

/// The ingress's own status wins; the controller service is the fallback.
pub fn resolve_address(ingress: Option<&LoadBalanced>, service: Option<&LoadBalanced>) -> Option<String> {
    ingress
        .and_then(LoadBalanced::address)
        .or_else(|| service.and_then(LoadBalanced::address))
}

async fn fetch_load_balanced(
    runner: &dyn CommandRunner,
    kind: &str,
    name: &str,
    namespace: &str,
) -> Option<LoadBalanced> {
    let out = runner
        .run(&Invocation::kubectl(&["get", kind, name, "-n", namespace, "-o", "json"]))
        .await;
    if !out.success {
        return None;
    }
    serde_json::from_str(&out.stdout).ok()
}

pub async fn current_address(
    runner: &dyn CommandRunner,
    ingress: &IngressConfig,
    namespace: &str,
) -> Option<String> {
    let resource = fetch_load_balanced(runner, "ingress", &ingress.resource_name, namespace).await;
    if let Some(address) = resolve_address(resource.as_ref(), None) {
        return Some(address);
    }
    let service =
        fetch_load_balanced(runner, "service", &ingress.controller_service, &ingress.namespace).await;
    resolve_address(None, service.as_ref())
}

pub async fn wait_for_address(
    runner: &dyn CommandRunner,
    ingress: &IngressConfig,
    namespace: &str,
    timeout: Duration,
    interval: Duration,
) -> Option<String> {
    println!("{}", "\n⏳ Waiting for ingress address to be assigned...".yellow());
    let address = poll_until(timeout, interval, "ingress address", move || async move {
        current_address(runner, ingress, namespace).await
    })
    .await;
    match &address {
        Some(address) => println!("{}", format!("✅ Ingress address found: {}", address).green()),
        None => println!("{}", "Timed out waiting for ingress address to be assigned.".red()),
    }
    address
}

pub fn hosts_entry(address: &str, host: &str) -> String {
    format!("{} {}", address, host)
}

pub fn append_hosts_entry(hosts_file: &Path, entry: &str) -> io::Result<()> {
    let mut file = OpenOptions::new().append(true).open(hosts_file)?;
    writeln!(file, "\n{}", entry)
}

fn manual_hosts_instruction(hosts_file: &Path, entry: &str) {
    println!(
        "{}",
        format!("Please manually add the following entry to your {} file:", hosts_file.display())
            .yellow()
    );
    println!("{}", entry.green());
}

/// Offer to append `<address> <host>` to the hosts file. Never fatal.
pub async fn offer_hosts_update(
    runner: &dyn CommandRunner,
    prompter: &mut Prompter,
    hosts_file: &Path,
    address: &str,
    host: &str,
) -> Result<HostsUpdate> {
    let entry = hosts_entry(address, host);
    println!(
        "{}",
        format!("\nTo access Hopsworks UI, you may need to update your {} file.", hosts_file.display())
            .yellow()
    );
    println!("{}", entry.green());

    if !prompter.confirm(&format!(
        "Would you like the script to attempt to update your {} file?",
        hosts_file.display()
    ))? {
        manual_hosts_instruction(hosts_file, &entry);
        return Ok(HostsUpdate::Manual);
    }

    match append_hosts_entry(hosts_file, &entry) {
        Ok(()) => {
            println!("{}", format!("✅ Successfully updated {}.", hosts_file.display()).green());
            Ok(HostsUpdate::Written)
        }
        Err(e) => recover_hosts_update(runner, prompter, hosts_file, &entry, e).await,
    }
}

/// Entry and path travel as positional parameters, never inside the script.
const SUDO_APPEND: &str = r#"printf '\n%s\n' "$1" | sudo tee -a "$2" >/dev/null"#;

pub fn sudo_append(hosts_file: &Path, entry: &str) -> Invocation {
    let path = hosts_file.display().to_string();
    Invocation::new("sh", &["-c", SUDO_APPEND, "sh", entry, &path])
}

async fn recover_hosts_update(
    runner: &dyn CommandRunner,
    prompter: &mut Prompter,
    hosts_file: &Path,
    entry: &str,
    error: io::Error,
) -> Result<HostsUpdate> {
    if error.kind() != io::ErrorKind::PermissionDenied {
        warn!(error = %error, "hosts file update failed");
        println!("{}", format!("Failed to update {}: {}", hosts_file.display(), error).red());
        manual_hosts_instruction(hosts_file, entry);
        return Ok(HostsUpdate::Manual);
    }

    println!(
        "{}",
        format!("Permission denied when trying to update {}.", hosts_file.display()).yellow()
    );
    if !prompter.confirm(&format!(
        "Do you want to try updating {} using sudo?",
        hosts_file.display()
    ))? {
        manual_hosts_instruction(hosts_file, entry);
        return Ok(HostsUpdate::Manual);
    }
    let out = runner.run(&sudo_append(hosts_file, entry)).await;
    if out.success {
        println!("{}", format!("✅ Successfully updated {} using sudo.", hosts_file.display()).green());
        Ok(HostsUpdate::WrittenWithSudo)
    } else {
        println!(
            "{}",
            format!("Failed to update {} even with sudo: {}", hosts_file.display(), out.stderr.trim())
                .red()
        );
        manual_hosts_instruction(hosts_file, entry);
        Ok(HostsUpdate::Manual)
    }
}

/// Controller, webhook gate, ingress resource, address and hosts entry.
pub async fn setup_ingress(
    runner: &dyn CommandRunner,
    prompter: &mut Prompter,
    config: &InstallerConfig,
    namespace: &str,
) -> Result<IngressDescriptor> {
    let ingress = &config.ingress;
    let timing = &config.timing;
    println!("{}", "\n🌐 Setting up ingress for Hopsworks...".blue());

    let controller_namespace = match find_controller(runner, ingress).await {
        Some(namespace) => namespace,
        None => {
            install_controller(runner, ingress).await?;
            ingress.namespace.clone()
        }
    };

    if !wait_for_webhook(
        runner,
        &ingress.admission_service,
        &controller_namespace,
        timing.webhook_timeout(),
        timing.poll_interval(),
    )
    .await
    {
        return Err(InstallError::step(
            "waiting for the ingress admission webhook",
            format!(
                "{} in {} has no endpoints after {} seconds",
                ingress.admission_service, controller_namespace, timing.webhook_timeout_secs
            ),
        )
        .into());
    }

    let host = prompter.ask_or_default("Enter the hostname for Hopsworks", &ingress.default_host)?;
    let manifest = render_manifest(ingress, namespace, &host);
    fs::write(&ingress.manifest_path, manifest)
        .with_context(|| format!("failed to write {}", ingress.manifest_path.display()))?;
    apply_manifest(runner, &ingress.manifest_path).await?;
    println!("{}", "✅ Ingress resource created successfully.".green());
    info!(host = %host, namespace, "ingress applied");

    let mut address = wait_for_address(
        runner,
        ingress,
        namespace,
        timing.ingress_address_timeout(),
        timing.poll_interval(),
    )
    .await;
    if address.is_none() {
        let manual = prompter.ask(
            "Enter the ingress IP address or hostname manually (leave empty to skip):",
            &[],
        )?;
        address = Some(manual).filter(|a| !a.is_empty());
    }

    match &address {
        Some(address) => {
            offer_hosts_update(runner, prompter, &ingress.hosts_file, address, &host).await?;
        }
        None => println!(
            "{}",
            "No ingress address available; add the hosts entry yourself once it is assigned.".yellow()
        ),
    }

    Ok(IngressDescriptor {
        name: ingress.resource_name.clone(),
        host,
        address,
    })
}
