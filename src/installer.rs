use anyhow::Result;
use colored::Colorize;
use tracing::info;

use crate::chart;
use crate::cluster::{self, ClusterContext};
use crate::config::InstallerConfig;
use crate::diagnostics;
use crate::error::InstallError;
use crate::ingress::{self, IngressDescriptor};
use crate::prompt::Prompter;
use crate::readiness::{probe_http, wait_for_pods};
use crate::telemetry::{
    self, Contact, InstallationRequest, LicenseChoice, TelemetrySink, SKIPPED_INSTALLATION_ID,
    UNKNOWN_INSTALLATION_ID,
};
use crate::utils::CommandRunner;

const LOGO: &str = r#"
██╗  ██╗ ██████╗ ██████╗ ███████╗██╗    ██╗ ██████╗ ██████╗ ██╗  ██╗███████╗
██║  ██║██╔═══██╗██╔══██╗██╔════╝██║    ██║██╔═══██╗██╔══██╗██║ ██╔╝██╔════╝
███████║██║   ██║██████╔╝███████╗██║ █╗ ██║██║   ██║██████╔╝█████╔╝ ███████╗
██╔══██║██║   ██║██╔═══╝ ╚════██║██║███╗██║██║   ██║██╔══██╗██╔═██╗ ╚════██║
██║  ██║╚██████╔╝██║     ███████║╚███╔███╔╝╚██████╔╝██║  ██║██║  ██╗███████║
╚═╝  ╚═╝ ╚═════╝ ╚═╝     ╚══════╝ ╚══╝╚══╝  ╚═════╝ ╚═╝  ╚═╝╚═╝  ╚═╝╚══════╝
"#;

#[derive(Debug, Clone, Default)]
pub struct InstallOptions {
    pub send_user_data: bool,
    pub skip_license: bool,
    pub ingress_only: bool,
    /// Offered as the namespace prompt's default.
    pub namespace: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Summary {
    pub namespace: String,
    pub installation_id: String,
    pub ingress: IngressDescriptor,
    pub pods_ready: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Completed(Summary),
    /// The operator kept an existing namespace; nothing was changed.
    Cancelled,
    /// Pods never became ready and the operator tore the installation down.
    CleanedUp,
}

enum Readiness {
    Ready,
    NotReady,
    CleanedUp,
}

pub struct Installer<'a> {
    runner: &'a mut dyn CommandRunner,
    prompter: &'a mut Prompter,
    telemetry: &'a dyn TelemetrySink,
    config: &'a InstallerConfig,
}

impl<'a> Installer<'a> {
    pub fn new(
        runner: &'a mut dyn CommandRunner,
        prompter: &'a mut Prompter,
        telemetry: &'a dyn TelemetrySink,
        config: &'a InstallerConfig,
    ) -> Self {
        Self {
            runner,
            prompter,
            telemetry,
            config,
        }
    }

    pub async fn run(&mut self, options: &InstallOptions) -> Result<Outcome> {
        println!("{}", LOGO.blue());
        println!("{}", "Welcome to the Hopsworks Installation Script!".green());
        cluster::check_required_tools(&*self.runner).await?;

        if options.ingress_only {
            return self.run_ingress_only(options).await;
        }

        let installation_id = self.collect_installation_id(options).await?;

        let context = self.connect().await?;
        info!(
            context = %context.context,
            cluster = %context.cluster_name,
            kubeconfig = %context.kubeconfig.display(),
            "cluster verified"
        );
        cluster::check_node_count(&context, self.config.cluster.min_nodes)?;

        let namespace = self.choose_namespace(options)?;
        if !self.prepare_namespace(&namespace).await? {
            return Ok(Outcome::Cancelled);
        }
        self.setup_registry_secret(&namespace).await?;
        chart::install_chart(&*self.runner, &self.config.chart, &namespace).await?;

        let ingress = ingress::setup_ingress(&*self.runner, self.prompter, self.config, &namespace).await?;

        let pods_ready = match self.wait_for_installation(&namespace).await? {
            Readiness::Ready => true,
            Readiness::NotReady => false,
            Readiness::CleanedUp => return Ok(Outcome::CleanedUp),
        };
        if pods_ready {
            self.probe_ingress(&ingress).await;
        }

        let summary = Summary {
            namespace,
            installation_id,
            ingress,
            pods_ready,
        };
        self.finish(&summary).await?;
        Ok(Outcome::Completed(summary))
    }

    async fn run_ingress_only(&mut self, options: &InstallOptions) -> Result<Outcome> {
        println!("{}", "Skipping installation and jumping to ingress setup.".yellow());
        self.connect().await?;
        let namespace = self.choose_namespace(options)?;
        let ingress = ingress::setup_ingress(&*self.runner, self.prompter, self.config, &namespace).await?;
        self.probe_ingress(&ingress).await;

        let summary = Summary {
            namespace,
            installation_id: SKIPPED_INSTALLATION_ID.to_string(),
            ingress,
            pods_ready: false,
        };
        self.finish(&summary).await?;
        Ok(Outcome::Completed(summary))
    }

    fn choose_license(&mut self) -> Result<LicenseChoice> {
        println!("{}", "\n📜 Please choose a license agreement:".blue());
        println!("1. Startup Software License");
        println!("2. Evaluation Agreement");
        let license = match self.prompter.ask("Enter 1 or 2:", &["1", "2"])?.as_str() {
            "1" => LicenseChoice::Startup,
            _ => LicenseChoice::Evaluation,
        };

        println!(
            "{}",
            format!("\nPlease review the {} License Agreement at:", license.label()).blue()
        );
        println!("{}", license.url(self.config).blue());
        if !self.prompter.confirm("Do you agree to the terms and conditions?")? {
            println!("{}", "You must agree to the terms and conditions to proceed.".red());
            return Err(InstallError::LicenseDeclined.into());
        }
        Ok(license)
    }

    fn collect_contact(&mut self) -> Result<Contact> {
        println!("{}", "\nPlease provide the following information:".blue());
        Ok(Contact {
            name: self.prompter.ask("Your name:", &[])?,
            email: self.prompter.ask("Your email address:", &[])?,
            company: self.prompter.ask("Your company name:", &[])?,
        })
    }

    async fn collect_installation_id(&mut self, options: &InstallOptions) -> Result<String> {
        let license = if options.skip_license {
            println!("{}", "Skipping license agreement step.".yellow());
            None
        } else {
            Some(self.choose_license()?)
        };

        if !options.send_user_data {
            println!("{}", "Skipping user data collection and sending as requested.".yellow());
            return Ok(SKIPPED_INSTALLATION_ID.to_string());
        }

        let contact = self.collect_contact()?;
        let request = InstallationRequest::new(contact, license);
        let id = telemetry::report(self.telemetry, &request).await;
        if id != UNKNOWN_INSTALLATION_ID {
            println!("{}", format!("Installation ID: {}", id).green());
            println!("{}", "Please keep this ID for your records and support purposes.".yellow());
        }
        Ok(id)
    }

    async fn connect(&mut self) -> Result<ClusterContext> {
        cluster::setup_credentials(&mut *self.runner, self.prompter, &self.config.cluster).await
    }

    fn choose_namespace(&mut self, options: &InstallOptions) -> Result<String> {
        let default = options
            .namespace
            .as_deref()
            .unwrap_or(&self.config.cluster.default_namespace);
        self.prompter
            .ask_or_default("Enter the namespace for Hopsworks installation", default)
    }

    /// `false` when the namespace exists and the operator wants to keep it.
    async fn prepare_namespace(&mut self, namespace: &str) -> Result<bool> {
        let runner = &*self.runner;
        if cluster::namespace_exists(runner, namespace).await {
            println!("{}", format!("The namespace '{}' already exists.", namespace).yellow());
            if !self.prompter.confirm(&format!(
                "Do you want to delete the existing '{}' namespace and all its resources?",
                namespace
            ))? {
                println!("{}", "Installation cancelled.".yellow());
                return Ok(false);
            }
            println!("{}", format!("Deleting namespace '{}'...", namespace).blue());
            cluster::delete_namespace(runner, namespace).await?;
            println!("{}", format!("Namespace '{}' deleted successfully.", namespace).green());
        }
        cluster::create_namespace(runner, namespace).await?;
        info!(namespace, "namespace ready");
        Ok(true)
    }

    async fn setup_registry_secret(&mut self, namespace: &str) -> Result<()> {
        let registry = &self.config.registry;
        if !registry.enabled {
            return Ok(());
        }
        let username = match &registry.username {
            Some(username) => username.clone(),
            None => self.prompter.ask("Enter your Nexus username:", &[])?,
        };
        let password = match &registry.password {
            Some(password) => password.clone(),
            None => self.prompter.secret("Enter your Nexus password")?,
        };
        cluster::create_registry_secret(&*self.runner, namespace, registry, &username, &password)
            .await?;
        Ok(())
    }

    async fn wait_for_installation(&mut self, namespace: &str) -> Result<Readiness> {
        let timing = &self.config.timing;
        let runner = &*self.runner;
        let waited = wait_for_pods(
            runner,
            namespace,
            timing.readiness_threshold,
            timing.pod_timeout(),
            timing.poll_interval(),
        )
        .await;
        if waited.is_some() {
            return Ok(Readiness::Ready);
        }

        println!("{}", "Installation is taking longer than expected.".yellow());
        loop {
            let choice = self.prompter.ask(
                "Do you want to (w)ait more, run (d)iagnostics, or (c)lean up? (w/d/c):",
                &["w", "d", "c"],
            )?;
            match choice.to_ascii_lowercase().as_str() {
                "w" => {
                    let waited = wait_for_pods(
                        runner,
                        namespace,
                        timing.readiness_threshold,
                        timing.extra_wait(),
                        timing.poll_interval(),
                    )
                    .await;
                    if waited.is_some() {
                        return Ok(Readiness::Ready);
                    }
                }
                "d" => {
                    diagnostics::diagnose(runner, self.config, namespace).await;
                }
                _ => {
                    if diagnostics::cleanup(runner, self.prompter, self.config, namespace)
                        .await?
                        .is_some()
                    {
                        return Ok(Readiness::CleanedUp);
                    }
                    return Ok(Readiness::NotReady);
                }
            }
        }
    }

    async fn probe_ingress(&self, ingress: &IngressDescriptor) {
        if ingress.address.is_none() {
            return;
        }
        let timing = &self.config.timing;
        if probe_http(&ingress.host, timing.http_probe_timeout(), timing.poll_interval()).await {
            println!("{}", format!("✅ https://{} is responding.", ingress.host).green());
        } else {
            println!(
                "{}",
                format!(
                    "https://{} did not respond yet. It may take a few more minutes.",
                    ingress.host
                )
                .yellow()
            );
        }
    }

    async fn finish(&mut self, summary: &Summary) -> Result<()> {
        println!("{}", "\n🎉 Installation completed!".green());
        if !summary.pods_ready {
            println!(
                "{}",
                "Some pods were not ready yet. Check them with kubectl before using Hopsworks.".yellow()
            );
        }
        println!(
            "{}",
            format!("Hopsworks UI: https://{}", summary.ingress.host).cyan()
        );
        if let Some(address) = &summary.ingress.address {
            println!(
                "{}",
                format!("Ingress {}: {} -> {}", summary.ingress.name, summary.ingress.host, address).cyan()
            );
        }
        println!("{}", format!("Installation ID: {}", summary.installation_id).cyan());
        println!("{}", "If you need any assistance, please contact our support team.".blue());

        // The install is done; closed input here just means "no".
        let diagnose = match self.prompter.confirm("Would you like to run diagnostics?") {
            Ok(answer) => answer,
            Err(e) if matches!(e.downcast_ref::<InstallError>(), Some(InstallError::InputClosed)) => false,
            Err(e) => return Err(e),
        };
        if diagnose {
            diagnostics::diagnose(&*self.runner, self.config, &summary.namespace).await;
        }
        Ok(())
    }
}
