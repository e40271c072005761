use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use colored::Colorize;
#[cfg(test)]
use mockall::automock;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::config::InstallerConfig;

/// Used when the record could not be delivered.
pub const UNKNOWN_INSTALLATION_ID: &str = "unknown";
/// Used when the operator opted out of sending data.
pub const SKIPPED_INSTALLATION_ID: &str = "debug_mode";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LicenseChoice {
    Startup,
    Evaluation,
}

impl LicenseChoice {
    pub fn label(self) -> &'static str {
        match self {
            LicenseChoice::Startup => "Startup",
            LicenseChoice::Evaluation => "Evaluation",
        }
    }

    pub fn url(self, config: &InstallerConfig) -> &str {
        match self {
            LicenseChoice::Startup => &config.startup_license_url,
            LicenseChoice::Evaluation => &config.evaluation_license_url,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Contact {
    pub name: String,
    pub email: String,
    pub company: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct InstallationRequest {
    pub name: String,
    pub email: String,
    pub company: String,
    pub license_type: Option<String>,
    pub agreed_to_license: bool,
    pub installation_id: String,
    pub action: String,
    pub installation_date: String,
}

impl InstallationRequest {
    pub fn new(contact: Contact, license: Option<LicenseChoice>) -> Self {
        Self {
            name: contact.name,
            email: contact.email,
            company: contact.company,
            license_type: license.map(|l| l.label().to_string()),
            agreed_to_license: license.is_some(),
            installation_id: Uuid::new_v4().to_string(),
            action: "install_hopsworks".to_string(),
            installation_date: chrono::Local::now()
                .naive_local()
                .format("%Y-%m-%dT%H:%M:%S%.6f")
                .to_string(),
        }
    }
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn submit(&self, request: &InstallationRequest) -> Result<()>;
}

pub struct HttpTelemetry {
    client: reqwest::Client,
    url: String,
}

impl HttpTelemetry {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build telemetry HTTP client")?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }
}

#[async_trait]
impl TelemetrySink for HttpTelemetry {
    async fn submit(&self, request: &InstallationRequest) -> Result<()> {
        self.client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("failed to reach {}", self.url))?
            .error_for_status()
            .context("telemetry endpoint rejected the record")?;
        Ok(())
    }
}

/// Submit the record and return the installation id the run should use.
pub async fn report(sink: &dyn TelemetrySink, request: &InstallationRequest) -> String {
    println!("{}", "\n📨 Sending user data...".blue());
    match sink.submit(request).await {
        Ok(()) => {
            println!("{}", "✅ User data sent successfully.".green());
            request.installation_id.clone()
        }
        Err(e) => {
            warn!(error = %format!("{:#}", e), "telemetry submission failed");
            println!("{}", format!("⚠️  Failed to send user data: {:#}", e).red());
            println!(
                "{}",
                "Failed to process user information. Continuing with installation.".yellow()
            );
            UNKNOWN_INSTALLATION_ID.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> InstallationRequest {
        InstallationRequest::new(
            Contact {
                name: "Ada".to_string(),
                email: "ada@example.com".to_string(),
                company: "Analytical".to_string(),
            },
            Some(LicenseChoice::Evaluation),
        )
    }

    #[tokio::test]
    async fn delivered_record_keeps_generated_id() {
        let req = request();
        let mut sink = MockTelemetrySink::new();
        let expected = req.installation_id.clone();
        sink.expect_submit()
            .withf(move |r| r.installation_id == expected)
            .times(1)
            .returning(|_| Ok(()));

        assert_eq!(report(&sink, &req).await, req.installation_id);
    }

    #[tokio::test]
    async fn failed_delivery_falls_back_to_placeholder() {
        let mut sink = MockTelemetrySink::new();
        sink.expect_submit()
            .returning(|_| Err(anyhow::anyhow!("connection reset")));

        assert_eq!(report(&sink, &request()).await, UNKNOWN_INSTALLATION_ID);
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_an_error() {
        let sink = HttpTelemetry::new("http://127.0.0.1:1/", Duration::from_secs(2)).unwrap();
        assert!(sink.submit(&request()).await.is_err());
    }

    #[test]
    fn payload_uses_wire_field_names() {
        let req = request();
        let json = serde_json::to_value(&req).unwrap();

        assert_eq!(json["license_type"], "Evaluation");
        assert_eq!(json["agreed_to_license"], true);
        assert_eq!(json["action"], "install_hopsworks");
        assert_eq!(json["installation_id"].as_str().unwrap().len(), 36);
        assert!(json["installation_date"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn skipped_license_is_not_an_agreement() {
        let req = InstallationRequest::new(Contact::default(), None);
        assert_eq!(req.license_type, None);
        assert!(!req.agreed_to_license);
    }
}
