use std::{error::Error, path::PathBuf};

use clap::{Args, Parser, Subcommand};
use engine::{
    Engine, LedgerEntry, MerchantBalance,
    money::{format_vnd, parse_amount},
};
use migration::MigratorTrait;
use rust_decimal::Decimal;
use sea_orm::{Database, DatabaseConnection};
use uuid::Uuid;

mod settings;

#[derive(Parser, Debug)]
#[command(name = "paygate_admin")]
#[command(about = "Operator utilities for the payment gateway ledger (onboarding, audits)")]
struct Cli {
    /// Settings file; defaults to `paygate.toml` when present.
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Database connection string, overriding the `[database]` settings.
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply pending schema migrations.
    Migrate,
    Merchant(Merchant),
    Account(Account),
    Ledger(Ledger),
    /// Check that every transaction group in the ledger balances.
    Audit,
    /// Compare a merchant's balance with its ledger accounts.
    Reconcile(MerchantArgs),
}

#[derive(Args, Debug)]
struct Merchant {
    #[command(subcommand)]
    command: MerchantCommand,
}

#[derive(Subcommand, Debug)]
enum MerchantCommand {
    /// Create the zeroed balance of a new merchant.
    Create(MerchantArgs),
    Show(MerchantArgs),
    /// Tell whether `amount` could be reserved for a payout right now.
    Headroom(HeadroomArgs),
}

#[derive(Args, Debug)]
struct MerchantArgs {
    #[arg(long)]
    id: String,
}

#[derive(Args, Debug)]
struct HeadroomArgs {
    #[arg(long)]
    id: String,
    /// Amount in VND, `_` grouping allowed (e.g. `2_300_000`).
    #[arg(long, value_parser = parse_amount_arg)]
    amount: Decimal,
}

#[derive(Args, Debug)]
struct Account {
    #[command(subcommand)]
    command: AccountCommand,
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    /// Ledger position of an account, per currency.
    Balance {
        name: String,
        /// Also list the latest entries posted to the account.
        #[arg(long, default_value_t = 0)]
        entries: u64,
    },
}

#[derive(Args, Debug)]
struct Ledger {
    #[command(subcommand)]
    command: LedgerCommand,
}

#[derive(Subcommand, Debug)]
enum LedgerCommand {
    /// Entries of one transaction group.
    Group { id: Uuid },
    /// Entries recorded for a business reference, e.g. `payout 42`.
    Reference {
        reference_type: String,
        reference_id: String,
    },
    /// Latest entries of a merchant.
    Merchant {
        id: String,
        #[arg(long, default_value_t = 20)]
        limit: u64,
        #[arg(long, default_value_t = 0)]
        offset: u64,
    },
}

fn parse_amount_arg(raw: &str) -> Result<Decimal, String> {
    parse_amount(raw).map_err(|err| err.to_string())
}

async fn connect_db(database_url: &str) -> Result<DatabaseConnection, Box<dyn Error + Send + Sync>> {
    let db = Database::connect(database_url).await?;
    migration::Migrator::up(&db, None).await?;
    Ok(db)
}

fn print_balance(balance: &MerchantBalance) {
    println!("merchant:        {}", balance.merchant_id);
    println!("available:       {}", format_vnd(balance.available_vnd));
    println!("  reserved:      {}", format_vnd(balance.reserved_vnd));
    println!("pending:         {}", format_vnd(balance.pending_vnd));
    println!("total:           {}", format_vnd(balance.total_vnd));
    println!("received:        {}", format_vnd(balance.total_received_vnd));
    println!("paid out:        {}", format_vnd(balance.total_paid_out_vnd));
    println!("fees:            {}", format_vnd(balance.total_fees_vnd));
    println!(
        "payments/payouts: {}/{}",
        balance.total_payments_count, balance.total_payouts_count
    );
    println!("version:         {}", balance.version);
}

fn print_entries(entries: &[LedgerEntry]) -> Result<(), Box<dyn Error + Send + Sync>> {
    if entries.is_empty() {
        println!("no entries");
        return Ok(());
    }
    println!("{}", serde_json::to_string_pretty(entries)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error + Send + Sync>> {
    let cli = Cli::parse();
    let settings = settings::Settings::new(cli.config.as_deref())?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(format!(
            "paygate_admin={level},engine={level},migration={level}",
            level = settings.app.level
        ))
        .init();

    let database_url = cli
        .database_url
        .clone()
        .unwrap_or_else(|| settings.database.url());
    let db = connect_db(&database_url).await?;
    let engine = Engine::builder()
        .database(db)
        .accounts(settings.accounts)
        .build()
        .await?;

    match cli.command {
        Command::Migrate => {
            tracing::info!("schema is up to date");
        }
        Command::Merchant(Merchant { command }) => match command {
            MerchantCommand::Create(args) => {
                let balance = engine.create_merchant_balance(&args.id).await?;
                println!("created balance for merchant: {}", balance.merchant_id);
            }
            MerchantCommand::Show(args) => {
                print_balance(&engine.merchant_balance(&args.id).await?);
            }
            MerchantCommand::Headroom(args) => {
                let balance = engine.merchant_balance(&args.id).await?;
                let headroom = balance.unreserved_vnd();
                if headroom >= args.amount {
                    println!("ok: {} of {} unreserved", format_vnd(args.amount), format_vnd(headroom));
                } else {
                    println!(
                        "insufficient: {} requested, {} unreserved",
                        format_vnd(args.amount),
                        format_vnd(headroom)
                    );
                    std::process::exit(1);
                }
            }
        },
        Command::Account(Account {
            command: AccountCommand::Balance { name, entries },
        }) => {
            let balances = engine.account_balances_by_currency(&name).await?;
            if balances.is_empty() {
                println!("{name}: 0");
            }
            for (currency, amount) in &balances {
                println!("{name}: {amount} {currency}");
            }
            if entries > 0 {
                print_entries(&engine.account_entries(&name, entries, 0).await?)?;
            }
        }
        Command::Ledger(Ledger { command }) => {
            let entries = match command {
                LedgerCommand::Group { id } => engine.transaction_group(id).await?,
                LedgerCommand::Reference {
                    reference_type,
                    reference_id,
                } => {
                    engine
                        .entries_by_reference(&reference_type, &reference_id)
                        .await?
                }
                LedgerCommand::Merchant { id, limit, offset } => {
                    engine.merchant_entries(&id, limit, offset).await?
                }
            };
            print_entries(&entries)?;
        }
        Command::Audit => {
            let unbalanced = engine.validate_integrity().await?;
            if unbalanced.is_empty() {
                println!("ledger balanced");
            } else {
                for group in &unbalanced {
                    println!(
                        "{} ({}): debits {} != credits {}",
                        group.transaction_group_id, group.currency, group.debits, group.credits
                    );
                }
                std::process::exit(1);
            }
        }
        Command::Reconcile(args) => {
            let reconciliation = engine.reconcile_merchant(&args.id).await?;
            println!(
                "available: balance {} / ledger {}",
                format_vnd(reconciliation.balance.available_vnd),
                format_vnd(reconciliation.ledger_available_vnd)
            );
            println!(
                "pending:   balance {} / ledger {}",
                format_vnd(reconciliation.balance.pending_vnd),
                format_vnd(reconciliation.ledger_pending_vnd)
            );
            if !reconciliation.is_consistent() {
                println!("merchant {} is out of sync with the ledger", args.id);
                std::process::exit(1);
            }
            println!("consistent");
        }
    }

    Ok(())
}
