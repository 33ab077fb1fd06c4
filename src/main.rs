use billing_engine::application::orchestrator::Orchestrator;
use billing_engine::config::EngineConfig;
use billing_engine::error::Result as BillingResult;
use billing_engine::infrastructure::in_memory::InMemoryStore;
#[cfg(feature = "storage-rocksdb")]
use billing_engine::infrastructure::rocksdb::RocksDbStore;
use billing_engine::infrastructure::sandbox_gateway::{DEFAULT_BASE_URL, SandboxGateway};
use billing_engine::interfaces::csv::checkout_reader::{CheckoutReader, CheckoutRecord};
use billing_engine::interfaces::csv::subscription_writer::SubscriptionWriter;
use billing_engine::interfaces::seed::CatalogSeed;
use clap::Parser;
use miette::{IntoDiagnostic, Result};
use rust_decimal::Decimal;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Checkout records CSV file (user, plan, discount, status, fraud)
    input: PathBuf,

    /// JSON catalog of plans and discounts to seed before replaying checkouts.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    #[arg(long, env = "BILLING_TAX_PERCENT", default_value = "12")]
    tax_percent: Decimal,

    #[arg(long, env = "BILLING_FEE_PERCENT", default_value = "2")]
    fee_percent: Decimal,

    #[arg(long, env = "BILLING_GATEWAY_TIMEOUT_SECS", default_value_t = 5)]
    gateway_timeout_secs: u64,

    #[arg(
        long,
        env = "GATEWAY_SERVER_KEY",
        default_value = "sandbox-server-key",
        hide_env_values = true
    )]
    server_key: String,

    #[arg(long, env = "GATEWAY_BASE_URL", default_value = DEFAULT_BASE_URL)]
    gateway_base_url: String,
}

impl Cli {
    fn config(&self) -> EngineConfig {
        EngineConfig {
            tax_percent: self.tax_percent,
            fee_percent: self.fee_percent,
            gateway_timeout: Duration::from_secs(self.gateway_timeout_secs),
        }
    }
}

fn orchestrator(cli: &Cli, gateway: &SandboxGateway) -> BillingResult<Orchestrator> {
    let gateway = Arc::new(gateway.clone());
    match &cli.db_path {
        #[cfg(feature = "storage-rocksdb")]
        Some(db_path) => {
            let store = RocksDbStore::open(db_path)?;
            Orchestrator::with_store(store, gateway, cli.config())
        }
        #[cfg(not(feature = "storage-rocksdb"))]
        Some(_) => {
            warn!(
                "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to in-memory storage."
            );
            Orchestrator::with_store(InMemoryStore::new(), gateway, cli.config())
        }
        None => Orchestrator::with_store(InMemoryStore::new(), gateway, cli.config()),
    }
}

/// Runs one checkout and, when the record carries a settlement, delivers the gateway's
/// signed notification for it.
async fn replay(
    orchestrator: &Orchestrator,
    gateway: &SandboxGateway,
    record: &CheckoutRecord,
) -> BillingResult<()> {
    let session = orchestrator
        .checkout(record.user, record.plan, record.discount.as_deref())
        .await?;
    if let Some(status) = record.settlement()? {
        let fraud_status = record.fraud.as_deref().unwrap_or("accept");
        let notification = gateway
            .settle(&session.transaction_id.to_string(), status, fraud_status)
            .await?;
        orchestrator
            .handle_webhook(&serde_json::to_vec(&notification)?)
            .await?;
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "billing_engine=info".into()))
        .with(
            fmt::layer()
                .with_writer(io::stderr)
                .with_ansi(io::stderr().is_terminal()),
        )
        .init();

    let cli = Cli::parse();
    let gateway = SandboxGateway::new(&cli.server_key).with_base_url(&cli.gateway_base_url);
    let orchestrator = orchestrator(&cli, &gateway).into_diagnostic()?;

    if let Some(path) = &cli.catalog {
        let bytes = std::fs::read(path).into_diagnostic()?;
        CatalogSeed::from_slice(&bytes)
            .into_diagnostic()?
            .apply(orchestrator.catalog())
            .await
            .into_diagnostic()?;
    }

    let file = File::open(&cli.input).into_diagnostic()?;
    let mut users = BTreeSet::new();
    for record in CheckoutReader::new(file).records() {
        match record {
            Ok(record) => {
                users.insert(record.user);
                if let Err(e) = replay(&orchestrator, &gateway, &record).await {
                    warn!(
                        user_id = record.user,
                        plan_id = record.plan,
                        error = %e,
                        "checkout failed"
                    );
                }
            }
            Err(e) => warn!(error = %e, "skipping record"),
        }
    }

    let mut subscriptions = Vec::new();
    for user in users {
        subscriptions.extend(orchestrator.subscriptions(user).await.into_diagnostic()?);
    }

    let stdout = io::stdout();
    let mut writer = SubscriptionWriter::new(stdout.lock());
    writer
        .write_subscriptions(&subscriptions)
        .into_diagnostic()?;

    Ok(())
}
