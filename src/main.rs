// main.rs
use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod chart;
mod cluster;
mod config;
mod diagnostics;
mod error;
mod ingress;
mod installer;
mod prompt;
mod readiness;
mod resources;
mod telemetry;
mod utils;

use config::InstallerConfig;
use installer::{InstallOptions, Installer, Outcome};
use prompt::Prompter;
use telemetry::HttpTelemetry;
use utils::ShellRunner;

#[derive(Parser)]
#[command(name = "hops-installer")]
#[command(about = "Install Hopsworks on an existing Kubernetes cluster", long_about = None)]
struct Cli {
    /// YAML file overriding the built-in defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Echo every kubectl/helm command and its output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(flatten)]
    credentials: Credentials,

    #[command(subcommand)]
    command: Commands,
}

/// Never read from the config file.
#[derive(Args)]
struct Credentials {
    /// Chart repository username
    #[arg(long, env = "HOPS_REPO_USERNAME", global = true, hide_env_values = true)]
    repo_username: Option<String>,

    /// Chart repository password
    #[arg(long, env = "HOPS_REPO_PASSWORD", global = true, hide_env_values = true)]
    repo_password: Option<String>,

    /// Image registry username (prompted when unset)
    #[arg(long, env = "HOPS_REGISTRY_USERNAME", global = true, hide_env_values = true)]
    registry_username: Option<String>,

    /// Image registry password (prompted when unset)
    #[arg(long, env = "HOPS_REGISTRY_PASSWORD", global = true, hide_env_values = true)]
    registry_password: Option<String>,
}

impl Credentials {
    fn apply(self, config: &mut InstallerConfig) {
        config.chart.repo_username = self.repo_username;
        config.chart.repo_password = self.repo_password;
        config.registry.username = self.registry_username;
        config.registry.password = self.registry_password;
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run the guided installation
    Install {
        /// Do not collect or send contact details
        #[arg(long)]
        no_user_data: bool,

        /// Skip the license agreement step
        #[arg(long)]
        skip_license: bool,

        /// Jump straight to the ingress setup of an existing installation
        #[arg(long)]
        ingress_only: bool,

        /// Default offered at the namespace prompt
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Dump the registry secret, volumes, claims and helm releases
    Diagnose {
        /// Installation namespace
        #[arg(short, long)]
        namespace: Option<String>,
    },

    /// Uninstall the release, delete the namespace and all persistent volumes
    Cleanup {
        /// Installation namespace
        #[arg(short, long)]
        namespace: Option<String>,
    },
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(std::io::stderr),
        )
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = InstallerConfig::load(cli.config.as_deref())?;
    cli.credentials.apply(&mut config);

    let mut runner = ShellRunner::new(cli.verbose, Some(config.timing.command_timeout()));
    let mut prompter = Prompter::stdio();

    match cli.command {
        Commands::Install {
            no_user_data,
            skip_license,
            ingress_only,
            namespace,
        } => {
            let telemetry =
                HttpTelemetry::new(config.telemetry_url.clone(), config.telemetry_timeout())?;
            let options = InstallOptions {
                send_user_data: !no_user_data,
                skip_license,
                ingress_only,
                namespace,
            };
            let outcome = Installer::new(&mut runner, &mut prompter, &telemetry, &config)
                .run(&options)
                .await?;
            match outcome {
                Outcome::Completed(summary) => info!(
                    namespace = %summary.namespace,
                    installation_id = %summary.installation_id,
                    pods_ready = summary.pods_ready,
                    "installation finished"
                ),
                Outcome::Cancelled => info!("installation cancelled by operator"),
                Outcome::CleanedUp => info!("installation cleaned up by operator"),
            }
        }
        Commands::Diagnose { namespace } => {
            let namespace = namespace.unwrap_or_else(|| config.cluster.default_namespace.clone());
            let report = diagnostics::diagnose(&runner, &config, &namespace).await;
            info!(failed = report.failures().count(), "diagnostics finished");
        }
        Commands::Cleanup { namespace } => {
            let namespace = namespace.unwrap_or_else(|| config.cluster.default_namespace.clone());
            if let Some(report) =
                diagnostics::cleanup(&runner, &mut prompter, &config, &namespace).await?
            {
                info!(removed = report.removed.len(), "cleanup finished");
                if !report.is_clean() {
                    bail!("cleanup left {} resource(s) behind", report.failed.len());
                }
            }
        }
    }

    Ok(())
}
