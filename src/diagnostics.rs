use anyhow::Result;
use colored::Colorize;
use tracing::warn;

use crate::config::InstallerConfig;
use crate::prompt::Prompter;
use crate::utils::{CommandOutput, CommandRunner, Invocation};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Section {
    pub title: String,
    pub success: bool,
    pub body: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiagnosticsReport {
    pub sections: Vec<Section>,
}

impl DiagnosticsReport {
    fn record(&mut self, title: impl Into<String>, out: CommandOutput) {
        let section = Section {
            title: title.into(),
            success: out.success,
            body: if out.success { out.stdout } else { out.stderr },
        };
        if section.success {
            println!("{}", format!("{}:", section.title).blue());
            println!("{}", section.body);
        } else {
            println!("{}", format!("{}: failed. Error: {}", section.title, section.body.trim()).red());
        }
        self.sections.push(section);
    }

    pub fn failures(&self) -> impl Iterator<Item = &Section> {
        self.sections.iter().filter(|s| !s.success)
    }
}

/// Dump the registry secret, volumes, claims and helm releases. Never fails.
pub async fn diagnose(
    runner: &dyn CommandRunner,
    config: &InstallerConfig,
    namespace: &str,
) -> DiagnosticsReport {
    println!("{}", "\n🩺 Running installation diagnostics...".blue());
    let mut report = DiagnosticsReport::default();

    let secret = &config.registry.secret_name;
    let out = runner
        .run(&Invocation::kubectl(&["get", "secret", secret, "-n", namespace, "-o", "yaml"]))
        .await;
    report.record(format!("Secret '{}'", secret), out);

    let queries = [
        ("Persistent Volumes", Invocation::kubectl(&["get", "pv"])),
        (
            "Persistent Volume Claims",
            Invocation::kubectl(&["get", "pvc", "--all-namespaces"]),
        ),
        ("Helm Releases", Invocation::helm(&["list", "--all-namespaces"])),
    ];
    for (title, invocation) in queries {
        let out = runner.run(&invocation).await;
        report.record(title, out);
    }

    println!("{}", "✅ Diagnostics completed.".green());
    report
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    pub failed: Vec<(String, String)>,
}

impl CleanupReport {
    fn attempt(&mut self, what: String, out: CommandOutput) {
        if out.success {
            println!("{}", format!("✅ Removed {}.", what).green());
            self.removed.push(what);
        } else {
            warn!(resource = %what, stderr = %out.stderr.trim(), "cleanup step failed");
            println!("{}", format!("✗ Failed to remove {}. Error: {}", what, out.stderr.trim()).red());
            self.failed.push((what, out.stderr));
        }
    }

    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Uninstall the release, delete the namespace and every persistent volume.
///
/// Returns `None` when the operator declines. Each deletion is attempted even
/// if an earlier one failed.
pub async fn cleanup(
    runner: &dyn CommandRunner,
    prompter: &mut Prompter,
    config: &InstallerConfig,
    namespace: &str,
) -> Result<Option<CleanupReport>> {
    let release = &config.chart.release_name;
    if !prompter.confirm(&format!(
        "Do you want to clean up the installation ({} release, namespace {} and all persistent volumes)?",
        release, namespace
    ))? {
        println!(
            "{}",
            "Skipping cleanup. You can manually clean up later if needed.".yellow()
        );
        return Ok(None);
    }

    println!("{}", "\n🧹 Cleaning up installation...".yellow());
    let mut report = CleanupReport::default();

    let out = runner
        .run(&Invocation::helm(&["uninstall", release, "--namespace", namespace]))
        .await;
    report.attempt(format!("helm release {}", release), out);

    let out = runner
        .run(&Invocation::kubectl(&["delete", "namespace", namespace]))
        .await;
    report.attempt(format!("namespace {}", namespace), out);

    let listing = runner.run(&Invocation::kubectl(&["get", "pv", "-o", "name"])).await;
    if listing.success {
        for pv in listing.stdout.lines().map(str::trim).filter(|l| !l.is_empty()) {
            let out = runner.run(&Invocation::kubectl(&["delete", pv])).await;
            report.attempt(pv.to_string(), out);
        }
    } else {
        report.attempt("persistent volume listing".to_string(), listing);
    }

    if report.is_clean() {
        println!("{}", "✅ Cleanup completed.".green());
    } else {
        println!(
            "{}",
            format!("Cleanup finished with {} failure(s).", report.failed.len()).yellow()
        );
    }
    Ok(Some(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::testing::scripted;
    use crate::utils::testing::ScriptedRunner;

    #[tokio::test]
    async fn diagnostics_dump_everything_and_keep_going() {
        let runner = ScriptedRunner::new()
            .on("kubectl get secret regcred", CommandOutput::failed("Error from server (NotFound)"))
            .on("kubectl get pv", CommandOutput::ok("NAME  CAPACITY\npv-1  10Gi\n"))
            .on("helm list", CommandOutput::ok("hopsworks-release  hops  deployed\n"));

        let report = diagnose(&runner, &InstallerConfig::default(), "hops").await;

        assert_eq!(
            runner.calls(),
            vec![
                "kubectl get secret regcred -n hops -o yaml",
                "kubectl get pv",
                "kubectl get pvc --all-namespaces",
                "helm list --all-namespaces",
            ]
        );
        assert_eq!(report.sections.len(), 4);
        let failures: Vec<&str> = report.failures().map(|s| s.title.as_str()).collect();
        assert_eq!(failures, vec!["Secret 'regcred'"]);
        assert!(report.sections[3].body.contains("hopsworks-release"));
    }

    #[tokio::test]
    async fn declined_cleanup_runs_nothing() {
        let runner = ScriptedRunner::new();
        let (mut prompter, _) = scripted(&["no"]);

        let report = cleanup(&runner, &mut prompter, &InstallerConfig::default(), "hops")
            .await
            .unwrap();
        assert_eq!(report, None);
        assert!(runner.calls().is_empty());
    }

    #[tokio::test]
    async fn one_failed_deletion_does_not_stop_the_rest() {
        let runner = ScriptedRunner::new()
            .on("helm uninstall", CommandOutput::failed("Error: release: not found"))
            .on(
                "kubectl get pv -o name",
                CommandOutput::ok("persistentvolume/pv-a\npersistentvolume/pv-b\n\n"),
            )
            .on(
                "kubectl delete persistentvolume/pv-a",
                CommandOutput::failed("pv-a is protected"),
            );
        let (mut prompter, _) = scripted(&["yes"]);

        let report = cleanup(&runner, &mut prompter, &InstallerConfig::default(), "hops")
            .await
            .unwrap()
            .unwrap();

        assert_eq!(
            runner.calls(),
            vec![
                "helm uninstall hopsworks-release --namespace hops",
                "kubectl delete namespace hops",
                "kubectl get pv -o name",
                "kubectl delete persistentvolume/pv-a",
                "kubectl delete persistentvolume/pv-b",
            ]
        );
        assert_eq!(report.removed, vec!["namespace hops", "persistentvolume/pv-b"]);
        let failed: Vec<&str> = report.failed.iter().map(|(what, _)| what.as_str()).collect();
        assert_eq!(failed, vec!["helm release hopsworks-release", "persistentvolume/pv-a"]);
        assert!(!report.is_clean());
    }

    #[tokio::test]
    async fn failed_volume_listing_is_reported() {
        let runner = ScriptedRunner::new()
            .on("kubectl get pv", CommandOutput::failed("forbidden"));
        let (mut prompter, _) = scripted(&["yes"]);

        let report = cleanup(&runner, &mut prompter, &InstallerConfig::default(), "hops")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(report.removed.len(), 2);
        assert_eq!(report.failed[0].0, "persistent volume listing");
        assert!(!runner.called("kubectl delete persistentvolume"));
    }
}
