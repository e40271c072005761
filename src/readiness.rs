//! Bounded wait loops.
//!
//! Every wait here is a fixed-interval poll with a hard time budget. None of
//! them fail the run on their own: they return `None`/`false` on timeout and
//! the caller decides what that means.

use std::future::Future;
use std::time::Duration;

use colored::Colorize;
use tokio::time::{sleep, Instant};
use tracing::{debug, warn};

use crate::resources::{Endpoints, Pod, ResourceList};
use crate::utils::{CommandRunner, Invocation};

/// Call `check` until it yields a value or `timeout` has elapsed.
///
/// The first check runs immediately. Sleeps are clipped to the remaining
/// budget, so the loop never overruns `timeout` by more than the duration of
/// the final check.
pub async fn poll_until<T, F, Fut>(
    timeout: Duration,
    interval: Duration,
    description: &str,
    mut check: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let start = Instant::now();
    loop {
        if let Some(value) = check().await {
            return Some(value);
        }
        let elapsed = start.elapsed();
        if elapsed >= timeout {
            debug!("gave up waiting for {} after {:?}", description, elapsed);
            return None;
        }
        debug!("waiting for {}...", description);
        sleep(interval.min(timeout - elapsed)).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PodReadiness {
    pub ready: usize,
    pub total: usize,
}

impl PodReadiness {
    pub fn from_pods(pods: &[Pod]) -> Self {
        Self {
            ready: pods.iter().filter(|p| p.is_ready()).count(),
            total: pods.len(),
        }
    }

    /// `100 * ready / total`, or `None` while no pods exist yet.
    pub fn percent(&self) -> Option<f64> {
        if self.total == 0 {
            None
        } else {
            Some(100.0 * self.ready as f64 / self.total as f64)
        }
    }

    pub fn meets(&self, threshold: f64) -> bool {
        self.percent().is_some_and(|p| p >= threshold)
    }
}

pub fn parse_pod_readiness(json: &str) -> Result<PodReadiness, serde_json::Error> {
    let pods: ResourceList<Pod> = serde_json::from_str(json)?;
    Ok(PodReadiness::from_pods(&pods.items))
}

async fn current_pod_readiness(runner: &dyn CommandRunner, namespace: &str) -> Option<PodReadiness> {
    let out = runner
        .run(&Invocation::kubectl(&["get", "pods", "-n", namespace, "-o", "json"]))
        .await;
    if !out.success {
        debug!(stderr = %out.stderr.trim(), "pod listing failed");
        return None;
    }
    match parse_pod_readiness(&out.stdout) {
        Ok(readiness) => Some(readiness),
        Err(e) => {
            warn!(error = %e, "failed to parse pod status JSON");
            None
        }
    }
}

/// Wait until at least `threshold` percent of the namespace's pods are
/// Running or Succeeded.
pub async fn wait_for_pods(
    runner: &dyn CommandRunner,
    namespace: &str,
    threshold: f64,
    timeout: Duration,
    interval: Duration,
) -> Option<PodReadiness> {
    println!(
        "{}",
        format!("⏳ Waiting for pods in namespace '{}' to be ready...", namespace).yellow()
    );
    let result = poll_until(timeout, interval, "pod readiness", move || async move {
        let readiness = current_pod_readiness(runner, namespace).await?;
        match readiness.percent() {
            None => {
                println!("{}", "No pods found. Waiting...".yellow());
                None
            }
            Some(percent) => {
                println!(
                    "{}",
                    format!(
                        "Pods readiness: {:.2}% ({}/{})",
                        percent, readiness.ready, readiness.total
                    )
                    .green()
                );
                readiness.meets(threshold).then_some(readiness)
            }
        }
    })
    .await;

    match result {
        Some(_) => println!("{}", "✅ Sufficient pods are ready!".green()),
        None => println!(
            "{}",
            format!("Timed out waiting for pods to be ready in namespace '{}'", namespace).red()
        ),
    }
    result
}

/// The admission webhook must have endpoints before an Ingress is applied,
/// otherwise the API server rejects it.
pub async fn wait_for_webhook(
    runner: &dyn CommandRunner,
    service: &str,
    namespace: &str,
    timeout: Duration,
    interval: Duration,
) -> bool {
    println!(
        "{}",
        "⏳ Waiting for the ingress admission webhook to be ready...".blue()
    );
    let ready = poll_until(timeout, interval, "admission webhook endpoints", move || async move {
        let out = runner
            .run(&Invocation::kubectl(&[
                "get",
                "endpoints",
                service,
                "-n",
                namespace,
                "-o",
                "json",
            ]))
            .await;
        if !out.success {
            return None;
        }
        let endpoints: Endpoints = serde_json::from_str(&out.stdout).ok()?;
        endpoints.has_addresses().then_some(())
    })
    .await
    .is_some();

    if ready {
        println!("{}", "✅ Ingress admission webhook is ready.".green());
    }
    ready
}

/// Wait for `https://<host>` to answer with anything below 500.
pub async fn probe_http(host: &str, timeout: Duration, interval: Duration) -> bool {
    let client = match reqwest::Client::builder()
        .danger_accept_invalid_certs(true)
        .timeout(Duration::from_secs(10))
        .build()
    {
        Ok(client) => client,
        Err(e) => {
            warn!(error = %e, "failed to build HTTP client for ingress probe");
            return false;
        }
    };
    let url = format!("https://{}", host);
    println!("{}", format!("⏳ Waiting for {} to respond...", url).yellow());

    let client = &client;
    let url = url.as_str();
    poll_until(timeout, interval, "ingress HTTP response", move || async move {
        match client.get(url).send().await {
            Ok(response) if response.status().as_u16() < 500 => Some(()),
            Ok(response) => {
                debug!(status = %response.status(), "ingress not serving yet");
                None
            }
            Err(e) => {
                debug!(error = %e, "ingress not reachable yet");
                None
            }
        }
    })
    .await
    .is_some()
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::utils::testing::ScriptedRunner;
    use crate::utils::CommandOutput;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    fn pods(phases: &[&str]) -> String {
        let items: Vec<String> = phases
            .iter()
            .enumerate()
            .map(|(i, p)| format!(r#"{{"metadata":{{"name":"p{}"}},"status":{{"phase":"{}"}}}}"#, i, p))
            .collect();
        format!(r#"{{"items":[{}]}}"#, items.join(","))
    }

    #[test]
    fn readiness_percent_is_ready_over_total() {
        let r = parse_pod_readiness(&pods(&["Running", "Succeeded", "Pending", "Failed"])).unwrap();
        assert_eq!(r, PodReadiness { ready: 2, total: 4 });
        assert_eq!(r.percent(), Some(50.0));

        let r = PodReadiness { ready: 4, total: 5 };
        assert_eq!(r.percent(), Some(80.0));
        assert!(r.meets(80.0));
        assert!(!r.meets(80.1));
    }

    #[test]
    fn no_pods_is_not_ready() {
        let r = parse_pod_readiness(r#"{"items":[]}"#).unwrap();
        assert_eq!(r.percent(), None);
        assert!(!r.meets(0.0));
    }

    #[tokio::test(start_paused = true)]
    async fn poll_returns_immediately_on_success() {
        let start = Instant::now();
        let v = poll_until(secs(60), secs(10), "x", || async { Some(7) }).await;
        assert_eq!(v, Some(7));
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn poll_gives_up_within_timeout_plus_one_interval() {
        let checks = Cell::new(0);
        let start = Instant::now();
        let v: Option<()> = poll_until(secs(25), secs(10), "x", || {
            checks.set(checks.get() + 1);
            async { None }
        })
        .await;

        assert_eq!(v, None);
        assert!(start.elapsed() >= secs(25));
        assert!(start.elapsed() <= secs(25) + secs(10));
        // t = 0, 10, 20, 25
        assert_eq!(checks.get(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn pods_become_ready_after_some_polls() {
        let runner = ScriptedRunner::new().on_sequence(
            "kubectl get pods -n hopsworks",
            vec![
                CommandOutput::failed("the server is currently unable to handle the request"),
                CommandOutput::ok(pods(&[])),
                CommandOutput::ok(pods(&["Pending", "Running", "Pending"])),
                CommandOutput::ok(pods(&["Running", "Running", "Succeeded", "Running", "Pending"])),
            ],
        );

        let result =
            wait_for_pods(&runner, "hopsworks", 80.0, secs(1800), secs(10)).await;

        assert_eq!(result, Some(PodReadiness { ready: 4, total: 5 }));
        assert_eq!(runner.count("kubectl get pods"), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn pods_that_never_get_ready_time_out() {
        let runner = ScriptedRunner::new()
            .on("kubectl get pods", CommandOutput::ok(pods(&["Pending", "Running"])));
        let start = Instant::now();

        let result = wait_for_pods(&runner, "hopsworks", 80.0, secs(60), secs(10)).await;

        assert_eq!(result, None);
        assert!(start.elapsed() <= secs(70));
    }

    #[tokio::test(start_paused = true)]
    async fn webhook_waits_for_subsets() {
        let runner = ScriptedRunner::new().on_sequence(
            "kubectl get endpoints ingress-nginx-controller-admission -n ingress-nginx",
            vec![
                CommandOutput::failed("Error from server (NotFound)"),
                CommandOutput::ok(r#"{"subsets":null}"#),
                CommandOutput::ok(r#"{"subsets":[{"addresses":[{"ip":"10.1.2.3"}]}]}"#),
            ],
        );

        assert!(
            wait_for_webhook(&runner, "ingress-nginx-controller-admission", "ingress-nginx", secs(300), secs(10))
                .await
        );
        assert_eq!(runner.count("kubectl get endpoints"), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn webhook_timeout_reports_not_ready() {
        let runner = ScriptedRunner::new()
            .on("kubectl get endpoints", CommandOutput::ok(r#"{"subsets":[]}"#));

        assert!(!wait_for_webhook(&runner, "admission", "ingress-nginx", secs(30), secs(10)).await);
    }
}
