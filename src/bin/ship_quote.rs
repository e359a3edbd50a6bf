//! `ship-quote` command line.
//!
//! ```text
//! ship-quote --config ship-quote.toml check-config
//! ship-quote --config ship-quote.toml quote --input shipment.json
//! ship-quote --config ship-quote.toml purchase --provider veeqo --rate-id r_1 \
//!     --allocation-id a_9 --service-type standard
//! ```

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use ship_quote::application::context::RequestContext;
use ship_quote::config::AppConfig;
use ship_quote::domain::entities::{PurchaseChoice, ShipmentInput};
use ship_quote::domain::value_objects::{CorrelationId, ProviderId};
use ship_quote::telemetry::init_tracing;
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "ship-quote", version, about = "Multi-carrier shipping rate aggregation")]
struct Cli {
    /// Configuration file (TOML, YAML or JSON).
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Correlation id for every provider call; generated when omitted.
    #[arg(long, global = true)]
    correlation_id: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Validate configuration and print it with secrets redacted.
    CheckConfig,
    /// Quote a shipment across all eligible providers.
    Quote {
        /// JSON file holding the shipment.
        #[arg(short, long)]
        input: PathBuf,
        /// Print per-provider outcomes alongside the quotes.
        #[arg(long)]
        report: bool,
    },
    /// Buy a label for a previously quoted rate.
    Purchase {
        /// Provider that issued the rate.
        #[arg(long)]
        provider: String,
        /// Rate id from the quote.
        #[arg(long)]
        rate_id: String,
        #[arg(long)]
        shipment_id: Option<String>,
        /// Warehouse allocation, required by some providers.
        #[arg(long)]
        allocation_id: Option<String>,
        #[arg(long)]
        service_type: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_tracing(&config.logging).context("initializing logging")?;

    let request = RequestContext::new(cli.correlation_id.map(CorrelationId::new));

    match cli.command {
        Command::CheckConfig => {
            let mut redacted = config.clone();
            for provider in &mut redacted.providers {
                if provider.api_key.is_some() {
                    provider.api_key = Some("<redacted>".to_string());
                }
            }
            println!("{}", serde_json::to_string_pretty(&redacted)?);
        }
        Command::Quote { input, report } => {
            let raw = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let shipment: ShipmentInput =
                serde_json::from_str(&raw).with_context(|| format!("parsing {}", input.display()))?;

            let engine = config.build_engine().await?;
            let result = engine.collect_quotes(&shipment, &request).await?;
            if report {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&result.quotes)?);
            }
        }
        Command::Purchase {
            provider,
            rate_id,
            shipment_id,
            allocation_id,
            service_type,
        } => {
            let mut choice = PurchaseChoice::new(ProviderId::new(provider), rate_id);
            choice.shipment_id = shipment_id;
            choice.allocation_id = allocation_id;
            choice.service_type = service_type;

            let engine = config.build_engine().await?;
            let label = engine.purchase(&choice, &request).await?;
            println!("{}", serde_json::to_string_pretty(&label)?);
        }
    }
    Ok(())
}
