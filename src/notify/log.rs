use async_trait::async_trait;
use tracing::{info, warn};

use super::{Alert, AlertSink};
use crate::types::{RunType, Severity};

/// Writes alerts to the log
pub struct LogSink;

#[async_trait]
impl AlertSink for LogSink {
    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()> {
        let kind = match alert.run_type {
            RunType::Daily => "alert",
            RunType::Weekly => "digest",
        };
        info!(
            customer_id = %alert.customer.id,
            email = %alert.customer.email,
            run_id = %alert.run_id,
            critical = alert.counts.critical,
            warning = alert.counts.warning,
            info = alert.counts.info,
            "{} for {}",
            kind,
            alert.customer.name
        );

        for finding in &alert.findings {
            match finding.severity {
                Severity::Critical | Severity::Warning => warn!(
                    customer_id = %finding.customer_id,
                    severity = %finding.severity,
                    category = %finding.category,
                    url = %finding.url,
                    "{}",
                    finding.title
                ),
                Severity::Info => info!(
                    customer_id = %finding.customer_id,
                    severity = %finding.severity,
                    category = %finding.category,
                    url = %finding.url,
                    "{}",
                    finding.title
                ),
            }
        }
        Ok(())
    }
}
