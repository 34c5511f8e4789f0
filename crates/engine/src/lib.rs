//! Accounting core of the payment gateway.
//!
//! - [`ledger`]: the append-only, double-entry ledger store.
//! - [`balances`]: the per-merchant balance aggregate and its compare-and-swap
//!   mutations.
//! - [`accounts`]: read-only positions derived from the ledger.
//! - [`Engine`]: the coordinator that writes ledger groups and balance changes in
//!   one unit of work. Payment, payout and treasury services go through it.
//!
//! Component functions take any `sea_orm` connection. Handed a
//! [`DatabaseTransaction`](sea_orm::DatabaseTransaction) they run inside it, so
//! the caller's commit or rollback decides the fate of every statement.

pub use currency::Currency;
pub use error::{BalanceError, EngineError, LedgerError};
pub use ledger_entries::{EntryType, LedgerEntry, NewLedgerEntry};
pub use merchant_balances::{Bucket, MerchantBalance};
pub use ops::{AccountNames, Engine, EngineBuilder, Posting};

pub mod accounts;
pub mod balances;
mod currency;
mod error;
pub mod ledger;
mod ledger_entries;
mod merchant_balances;
pub mod money;
mod ops;

type ResultEngine<T> = Result<T, EngineError>;

/// Run a block inside a DB transaction, committing on success and rolling back on error.
///
/// Returning early (or dropping the future) drops the transaction, which rolls it back.
macro_rules! with_tx {
    ($conn:expr, |$tx:ident| $body:expr) => {{
        let $tx = $conn.begin().await?;
        let result = $body;
        match result {
            Ok(value) => {
                $tx.commit().await?;
                Ok(value)
            }
            Err(err) => Err(err),
        }
    }};
}

pub(crate) use with_tx;

/// Current time truncated to microseconds, the precision every backend round-trips.
pub(crate) fn now() -> chrono::DateTime<chrono::Utc> {
    use chrono::SubsecRound;
    chrono::Utc::now().trunc_subsecs(6)
}
