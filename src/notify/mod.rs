//! Alert delivery
//!
//! Rendering and sending email is someone else's job. The pipeline hands an
//! [`AlertSink`] the findings of one customer's run together with their
//! severity counts.

mod log;

pub use log::LogSink;

use async_trait::async_trait;

use crate::types::{Customer, Finding, RunId, RunType, SeverityCounts};

/// Findings of one customer's run, ready for delivery
#[derive(Debug, Clone)]
pub struct Alert {
    pub customer: Customer,
    pub run_id: RunId,
    pub run_type: RunType,
    /// Most severe first
    pub findings: Vec<Finding>,
    pub counts: SeverityCounts,
}

impl Alert {
    pub fn new(customer: Customer, run_id: &str, run_type: RunType, mut findings: Vec<Finding>) -> Self {
        findings.sort_by(|a, b| b.severity.cmp(&a.severity).then_with(|| a.id.cmp(&b.id)));
        let counts = SeverityCounts::from_findings(&findings);
        Self {
            customer,
            run_id: run_id.to_string(),
            run_type,
            findings,
            counts,
        }
    }
}

/// Receiver of alerts
#[async_trait]
pub trait AlertSink: Send + Sync {
    async fn deliver(&self, alert: &Alert) -> anyhow::Result<()>;
}

/// Discards every alert
pub struct NoopSink;

#[async_trait]
impl AlertSink for NoopSink {
    async fn deliver(&self, _alert: &Alert) -> anyhow::Result<()> {
        Ok(())
    }
}
