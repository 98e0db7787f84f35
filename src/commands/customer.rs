use anyhow::{Context, Result};
use sitewatch::config::Config;
use sitewatch::monitor::normalize_url;
use sitewatch::store::Store;
use sitewatch::types::NewCustomer;
use tracing::info;

use super::open_store;

pub fn add_customer(
    config: &Config,
    name: String,
    base_url: String,
    email: String,
    sitemap_url: Option<String>,
    crawl_limit: Option<usize>,
) -> Result<()> {
    let root = normalize_url("", &base_url);
    if root.is_empty() {
        anyhow::bail!("Invalid base URL: {}", base_url);
    }

    let store = open_store(config)?;
    let customer = store
        .create_customer(&NewCustomer {
            name,
            email,
            base_url: root,
            sitemap_url,
            crawl_limit,
        })
        .context("Failed to create customer")?;
    info!(customer_id = %customer.id, "customer created");

    println!("Created customer {} ({})", customer.id, customer.base_url);
    Ok(())
}

pub fn list_customers(config: &Config, include_inactive: bool) -> Result<()> {
    let store = open_store(config)?;
    let customers = store.list_customers(!include_inactive)?;
    if customers.is_empty() {
        println!("No customers.");
        return Ok(());
    }

    for customer in customers {
        println!(
            "{}  {:<24} {}{}",
            customer.id,
            customer.name,
            customer.base_url,
            if customer.active { "" } else { "  (inactive)" }
        );
    }
    Ok(())
}

pub fn set_active(config: &Config, customer_id: &str, active: bool) -> Result<()> {
    let store = open_store(config)?;
    store.set_customer_active(customer_id, active)?;
    println!(
        "Customer {} {}",
        customer_id,
        if active { "activated" } else { "deactivated" }
    );
    Ok(())
}

pub fn add_target(config: &Config, customer_id: &str, url: &str, label: Option<&str>) -> Result<()> {
    let store = open_store(config)?;
    let customer = store
        .get_customer(customer_id)?
        .with_context(|| format!("Unknown customer: {}", customer_id))?;

    let normalized = normalize_url(&customer.base_url, url);
    if normalized.is_empty() {
        anyhow::bail!("Invalid key page URL: {}", url);
    }
    let target = store.add_target(customer_id, &normalized, label)?;
    println!("Added key page {} for {}", target.url, customer.name);
    Ok(())
}

pub fn list_targets(config: &Config, customer_id: &str) -> Result<()> {
    let store = open_store(config)?;
    let targets = store.list_targets(customer_id)?;
    if targets.is_empty() {
        println!("No key pages; daily runs check the site root.");
        return Ok(());
    }
    for target in targets {
        match target.label {
            Some(label) => println!("{}  ({})", target.url, label),
            None => println!("{}", target.url),
        }
    }
    Ok(())
}
