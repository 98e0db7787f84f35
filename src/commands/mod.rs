pub mod customer;
pub mod findings;
pub mod init;
pub mod run;

use anyhow::{Context, Result};
use sitewatch::config::Config;
use sitewatch::store::SqliteStore;

/// Open the configured store, creating it on first use
pub fn open_store(config: &Config) -> Result<SqliteStore> {
    SqliteStore::open(&config.store.path)
        .with_context(|| format!("Failed to open store '{}'", config.store.path.display()))
}
