use anyhow::Result;
use sitewatch::config::Config;
use sitewatch::store::Store;
use sitewatch::util::{first_line, truncate_str};

use super::open_store;

pub fn list_findings(config: &Config, customer_id: Option<&str>, limit: usize, format: &str) -> Result<()> {
    let store = open_store(config)?;
    let findings = store.list_findings(customer_id, limit)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&findings)?);
        }
        _ => {
            if findings.is_empty() {
                println!("No findings.");
                return Ok(());
            }
            for finding in &findings {
                println!(
                    "{}  {:<8} {:<13} {}",
                    finding.created_at.format("%Y-%m-%d %H:%M"),
                    finding.severity.as_str(),
                    finding.category.as_str(),
                    finding.title
                );
                println!("    {}", finding.url);
                let detail = first_line(&finding.details);
                if !detail.is_empty() {
                    println!("    {}", truncate_str(detail, 100));
                }
            }
        }
    }
    Ok(())
}
