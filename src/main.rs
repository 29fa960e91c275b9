use cardpay_ledger::application::gateway::{AllowList, Gateway, GuardedGateway};
use cardpay_ledger::application::ledger::LedgerService;
use cardpay_ledger::config::{
    DEFAULT_CASH_OUT_ACCOUNT, DEFAULT_ESCROW_ACCOUNT, DEFAULT_PROCESSOR, DEFAULT_REVOCATION_LIMIT,
    LedgerConfig,
};
use cardpay_ledger::domain::payment::AccountId;
use cardpay_ledger::infrastructure::in_memory::{InMemoryPaymentStore, InMemoryTokenLedger};
#[cfg(feature = "storage-rocksdb")]
use cardpay_ledger::infrastructure::rocksdb::RocksDBStore;
use cardpay_ledger::interfaces::csv::operation_reader::{Command, OperationReader};
use cardpay_ledger::interfaces::csv::payment_writer::PaymentWriter;
use cardpay_ledger::interfaces::event_log::EventLogWriter;
use clap::Parser;
use log::{error, warn};
use miette::{IntoDiagnostic, Result};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Input operations CSV file
    input: PathBuf,

    /// Path to persistent database (optional). If provided, uses RocksDB.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Callers allowed to submit operations
    #[arg(
        long = "processor",
        env = "LEDGER_PROCESSORS",
        value_delimiter = ',',
        default_value = DEFAULT_PROCESSOR
    )]
    processors: Vec<String>,

    #[arg(long, default_value = DEFAULT_ESCROW_ACCOUNT)]
    escrow_account: String,

    #[arg(long, default_value = DEFAULT_CASH_OUT_ACCOUNT)]
    cash_out_account: String,

    /// Revocations after which a payment id can no longer be made again
    #[arg(long, default_value_t = DEFAULT_REVOCATION_LIMIT)]
    revocation_limit: u8,

    /// Write final token balances to this CSV file
    #[arg(long)]
    balances: Option<PathBuf>,

    /// Write the event log to this file as JSON lines
    #[arg(long)]
    events: Option<PathBuf>,
}

impl Cli {
    fn config(&self) -> LedgerConfig {
        LedgerConfig {
            escrow_account: AccountId::new(&self.escrow_account),
            cash_out_account: AccountId::new(&self.cash_out_account),
            revocation_limit: self.revocation_limit,
            processors: self.processors.iter().map(AccountId::new).collect(),
            ..LedgerConfig::default()
        }
    }
}

fn in_memory_ledger(config: LedgerConfig) -> LedgerService {
    LedgerService::new(
        config,
        Box::new(InMemoryPaymentStore::new()),
        Box::new(InMemoryTokenLedger::new()),
    )
}

#[cfg(feature = "storage-rocksdb")]
fn open_ledger(config: LedgerConfig, db_path: Option<&Path>) -> Result<LedgerService> {
    match db_path {
        Some(path) => {
            let store = RocksDBStore::open(path).into_diagnostic()?;
            Ok(LedgerService::with_settlement_store(config, store))
        }
        None => Ok(in_memory_ledger(config)),
    }
}

#[cfg(not(feature = "storage-rocksdb"))]
fn open_ledger(config: LedgerConfig, db_path: Option<&Path>) -> Result<LedgerService> {
    if db_path.is_some() {
        warn!(
            "Persistent storage requested via --db-path, but 'storage-rocksdb' feature is not enabled. Falling back to In-Memory storage."
        );
    }
    Ok(in_memory_ledger(config))
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let cli = Cli::parse();

    let config = cli.config();
    let allow_list = AllowList::new(config.processors.clone());
    let ledger = open_ledger(config, cli.db_path.as_deref())?;
    let gateway = GuardedGateway::new(ledger, allow_list);

    // Process operations
    let file = File::open(&cli.input).into_diagnostic()?;
    let reader = OperationReader::new(file);
    for command in reader.commands() {
        match command {
            Ok(Command::Fund { account, amount }) => {
                if let Err(e) = gateway.inner().fund(&account, amount).await {
                    warn!("Error funding {}: {}", account, e);
                }
            }
            Ok(Command::Execute { caller, operation }) => {
                let name = operation.name();
                if let Err(e) = gateway.execute(&caller, operation).await {
                    warn!("Error processing operation {}: {}", name, e);
                }
            }
            Err(e) => {
                error!("Error reading operation: {}", e);
            }
        }
    }

    let ledger = gateway.inner();
    let payments = ledger.payments().await.into_diagnostic()?;
    let stdout = io::stdout();
    let mut writer = PaymentWriter::new(stdout.lock());
    writer.write_payments(&payments).into_diagnostic()?;

    if let Some(path) = &cli.balances {
        let balances = ledger.balances().await.into_diagnostic()?;
        let file = File::create(path).into_diagnostic()?;
        PaymentWriter::new(file)
            .write_balances(&balances)
            .into_diagnostic()?;
    }

    if let Some(path) = &cli.events {
        let events = ledger.events(None).await.into_diagnostic()?;
        let file = File::create(path).into_diagnostic()?;
        EventLogWriter::new(io::BufWriter::new(file))
            .write_events(&events)
            .into_diagnostic()?;
    }

    Ok(())
}
