//! Sitewatch: scheduled monitoring of customer websites

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use sitewatch::config::{init_logging, Config};
use sitewatch::types::RunType;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "sitewatch")]
#[command(about = "Scheduled site monitoring with baseline diffs and deduplicated alerts")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, global = true, default_value = "sitewatch.toml")]
    config: PathBuf,

    /// Verbosity level
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Output directory
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Manage monitored customers
    Customer {
        #[command(subcommand)]
        action: CustomerAction,
    },

    /// Manage key pages checked on every daily run
    Target {
        #[command(subcommand)]
        action: TargetAction,
    },

    /// Execute a monitoring run over every active customer
    Run {
        #[arg(value_enum)]
        run_type: CliRunType,

        /// Print the run summary as JSON
        #[arg(long)]
        json: bool,
    },

    /// List recent findings
    Findings {
        /// Only this customer's findings
        #[arg(long)]
        customer: Option<String>,

        /// Maximum findings to show
        #[arg(short, long, default_value = "50")]
        limit: usize,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[derive(Subcommand)]
enum CustomerAction {
    /// Register a customer
    Add {
        /// Display name
        name: String,

        /// Site root, e.g. https://example.com/
        base_url: String,

        /// Alert recipient
        #[arg(long, default_value = "")]
        email: String,

        /// Explicit sitemap location
        #[arg(long)]
        sitemap: Option<String>,

        /// Weekly crawl limit for this customer
        #[arg(long)]
        crawl_limit: Option<usize>,
    },

    /// List customers
    List {
        /// Include inactive customers
        #[arg(long)]
        all: bool,
    },

    /// Exclude a customer from runs
    Deactivate { customer_id: String },

    /// Include a customer in runs again
    Activate { customer_id: String },
}

#[derive(Subcommand)]
enum TargetAction {
    /// Add a key page
    Add {
        customer_id: String,
        url: String,

        #[arg(long)]
        label: Option<String>,
    },

    /// List a customer's key pages
    List { customer_id: String },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
enum CliRunType {
    Daily,
    Weekly,
}

impl From<CliRunType> for RunType {
    fn from(value: CliRunType) -> Self {
        match value {
            CliRunType::Daily => RunType::Daily,
            CliRunType::Weekly => RunType::Weekly,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { path } = &cli.command {
        return commands::init::init_config(path);
    }

    let config = Config::load_or_default(&cli.config)?;
    init_logging(&config.logging, cli.verbose)?;

    match cli.command {
        Commands::Init { .. } => Ok(()),
        Commands::Customer { action } => match action {
            CustomerAction::Add {
                name,
                base_url,
                email,
                sitemap,
                crawl_limit,
            } => commands::customer::add_customer(&config, name, base_url, email, sitemap, crawl_limit),
            CustomerAction::List { all } => commands::customer::list_customers(&config, all),
            CustomerAction::Deactivate { customer_id } => {
                commands::customer::set_active(&config, &customer_id, false)
            }
            CustomerAction::Activate { customer_id } => {
                commands::customer::set_active(&config, &customer_id, true)
            }
        },
        Commands::Target { action } => match action {
            TargetAction::Add {
                customer_id,
                url,
                label,
            } => commands::customer::add_target(&config, &customer_id, &url, label.as_deref()),
            TargetAction::List { customer_id } => commands::customer::list_targets(&config, &customer_id),
        },
        Commands::Run { run_type, json } => commands::run::run_monitor(config, run_type.into(), json).await,
        Commands::Findings {
            customer,
            limit,
            format,
        } => commands::findings::list_findings(&config, customer.as_deref(), limit, &format),
    }
}
