//! # PestFlow — Campaign Distribution Daemon
//!
//! Drives scheduled campaign sends for the PestFlow CRM.
//!
//! Usage:
//!   pestflow run                         # Start the distribution loop
//!   pestflow clone <CAMPAIGN_ID>         # Duplicate a campaign
//!   pestflow status <CAMPAIGN_ID>        # Print a campaign snapshot

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use pestflow_campaigns::{
    clone_campaign, spawn_distributor, CampaignDb, CloneOptions, DistributionEngine,
};
use pestflow_core::types::CampaignMessage;
use pestflow_core::PestFlowConfig;

#[derive(Parser)]
#[command(
    name = "pestflow",
    version,
    about = "🐜 PestFlow — Campaign Distribution Daemon"
)]
struct Cli {
    /// Config file path (default: ~/.pestflow/config.toml)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the distribution loop
    Run,
    /// Duplicate a campaign's configuration under a fresh identity
    Clone {
        /// Source campaign id
        campaign_id: String,
        /// Name for the clone (default: "<source> (Copy)")
        #[arg(long)]
        name: Option<String>,
        /// Campaign code for the clone (default: derived from the name)
        #[arg(long)]
        code: Option<String>,
        /// Copy list assignments and members as fresh pending rows
        #[arg(long)]
        with_lists: bool,
        /// Copy the landing page content
        #[arg(long)]
        with_landing_page: bool,
    },
    /// Print a campaign's run-state snapshot
    Status {
        /// Campaign id
        campaign_id: String,
    },
}

/// Log-only transport for running without a configured provider. Every send
/// "succeeds" with a synthetic delivery id.
struct LogTransport;

#[async_trait]
impl pestflow_core::traits::Transport for LogTransport {
    fn name(&self) -> &str {
        "log"
    }

    async fn send(&self, message: &CampaignMessage) -> pestflow_core::Result<String> {
        info!(
            customer_id = %message.customer_id,
            url = %message.landing_url,
            "would deliver campaign message"
        );
        Ok(format!("log-{}", uuid::Uuid::new_v4()))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "pestflow=debug,pestflow_campaigns=debug"
    } else {
        "pestflow=info,pestflow_campaigns=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .init();

    let config = match &cli.config {
        Some(path) => PestFlowConfig::load_from(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => PestFlowConfig::load().context("loading config")?,
    };
    let db = CampaignDb::open(&config.db_path()).context("opening campaign database")?;

    match cli.command {
        Command::Run => {
            let engine = Arc::new(DistributionEngine::new(
                db.clone(),
                Arc::new(LogTransport),
                Arc::new(db.settings()),
                config.distributor.clone(),
            ));
            info!("🐜 PestFlow distributor starting");
            spawn_distributor(engine, config.distributor.check_interval_secs).await;
            Ok(())
        }
        Command::Clone {
            campaign_id,
            name,
            code,
            with_lists,
            with_landing_page,
        } => {
            let options = CloneOptions {
                name,
                code,
                copy_contact_lists: with_lists,
                copy_landing_page: with_landing_page,
            };
            let outcome = clone_campaign(&db, &campaign_id, &options)?;
            println!(
                "Cloned {} -> {} ({}, code {})",
                campaign_id, outcome.campaign.id, outcome.campaign.name, outcome.campaign.code
            );
            for warning in &outcome.warnings {
                println!("warning: {warning}");
            }
            Ok(())
        }
        Command::Status { campaign_id } => {
            let campaign = db.get_campaign(&campaign_id)?;
            let counts = db.lifecycle().count_by_status(&campaign_id)?;
            println!("{} ({})", campaign.name, campaign.code);
            println!("  status:    {}", campaign.status);
            println!(
                "  progress:  {}/{} ({} ok, {} failed)",
                campaign.processed_contacts,
                campaign.total_contacts,
                campaign.successful_contacts,
                campaign.failed_contacts
            );
            println!(
                "  today:     {}/{} sent, batch #{}",
                campaign.contacts_sent_today, campaign.daily_limit, campaign.current_batch
            );
            let mut statuses: Vec<_> = counts.iter().collect();
            statuses.sort_by_key(|(s, _)| s.as_str());
            for (status, count) in statuses {
                println!("  {status}: {count}");
            }
            Ok(())
        }
    }
}
