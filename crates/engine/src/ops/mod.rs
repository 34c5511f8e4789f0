use rust_decimal::Decimal;
use sea_orm::{DatabaseConnection, DatabaseTransaction, TransactionTrait};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
    Currency, EngineError, LedgerEntry, MerchantBalance, NewLedgerEntry, ResultEngine, balances,
    ledger, with_tx,
};

mod payments;
mod payouts;
mod queries;

/// Every merchant-facing amount is settled in VND.
const SETTLEMENT_CURRENCY: Currency = Currency::Vnd;

const PAYMENT_REFERENCE: &str = "payment";
const PAYMENT_SETTLEMENT_REFERENCE: &str = "payment_settlement";
const PAYOUT_REFERENCE: &str = "payout";

/// Names of the house accounts the coordinator books against.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AccountNames {
    /// Where incoming crypto payments land.
    pub crypto_pool: String,
    /// Where fiat payouts are paid from.
    pub payout_pool: String,
    pub fee_revenue: String,
}

impl Default for AccountNames {
    fn default() -> Self {
        Self {
            crypto_pool: "crypto_pool".to_string(),
            payout_pool: "payout_pool".to_string(),
            fee_revenue: "revenue:fees".to_string(),
        }
    }
}

/// What a coordinator operation wrote: the ledger group and the resulting balance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Posting {
    pub transaction_group_id: Uuid,
    pub entries: Vec<LedgerEntry>,
    pub balance: MerchantBalance,
}

impl Posting {
    fn new(entries: Vec<LedgerEntry>, balance: MerchantBalance) -> Self {
        Self {
            transaction_group_id: entries
                .first()
                .map(|entry| entry.transaction_group_id)
                .unwrap_or_default(),
            entries,
            balance,
        }
    }
}

/// The balance mutation a ledger group is booked together with.
enum BalanceChange {
    RecordPayment(Decimal),
    IncrementPending(Decimal),
    ConvertPendingToAvailable { amount: Decimal, fee: Decimal },
    DeductBalance { amount: Decimal, fee: Decimal },
}

/// The transaction coordinator.
///
/// Each write operation appends one ledger group and applies one balance
/// mutation inside a single DB transaction: either both are committed or
/// neither is. The engine itself holds no locks; exclusion comes from the
/// database.
#[derive(Debug, Clone)]
pub struct Engine {
    database: DatabaseConnection,
    accounts: AccountNames,
}

impl Engine {
    /// Return a builder for `Engine`. Help to build the struct.
    pub fn builder() -> EngineBuilder {
        EngineBuilder::default()
    }

    pub fn database(&self) -> &DatabaseConnection {
        &self.database
    }

    pub fn accounts(&self) -> &AccountNames {
        &self.accounts
    }

    /// Appends `entries` and applies `change` to the merchant balance in one unit
    /// of work. Either both are committed or neither is.
    async fn post(
        &self,
        merchant_id: &str,
        reference_type: &str,
        reference_id: &str,
        entries: Vec<NewLedgerEntry>,
        change: BalanceChange,
    ) -> ResultEngine<Posting> {
        with_tx!(self.database, |db_tx| {
            balances::get_for_update(&db_tx, merchant_id).await?;
            self.ensure_unrecorded(&db_tx, reference_type, reference_id)
                .await?;
            let entries = ledger::append_group(&db_tx, entries).await?;
            let balance = match change {
                BalanceChange::RecordPayment(amount) => {
                    balances::record_payment(&db_tx, merchant_id, amount).await?
                }
                BalanceChange::IncrementPending(amount) => {
                    balances::increment_pending(&db_tx, merchant_id, amount).await?
                }
                BalanceChange::ConvertPendingToAvailable { amount, fee } => {
                    balances::convert_pending_to_available(&db_tx, merchant_id, amount, fee)
                        .await?
                }
                BalanceChange::DeductBalance { amount, fee } => {
                    balances::deduct_balance(&db_tx, merchant_id, amount, fee).await?
                }
            };
            Ok(Posting::new(entries, balance))
        })
    }

    /// Fails if a group was already recorded for this business reference.
    async fn ensure_unrecorded(
        &self,
        db_tx: &DatabaseTransaction,
        reference_type: &str,
        reference_id: &str,
    ) -> ResultEngine<()> {
        if !ledger::get_by_reference(db_tx, reference_type, reference_id)
            .await?
            .is_empty()
        {
            return Err(EngineError::AlreadyRecorded {
                reference_type: reference_type.to_string(),
                reference_id: reference_id.to_string(),
            });
        }
        Ok(())
    }
}

/// The builder for `Engine`
#[derive(Default)]
pub struct EngineBuilder {
    database: DatabaseConnection,
    accounts: AccountNames,
}

impl EngineBuilder {
    /// Pass the required database
    pub fn database(mut self, db: DatabaseConnection) -> EngineBuilder {
        self.database = db;
        self
    }

    /// Override the house account names.
    pub fn accounts(mut self, accounts: AccountNames) -> EngineBuilder {
        self.accounts = accounts;
        self
    }

    /// Construct `Engine`
    pub async fn build(self) -> ResultEngine<Engine> {
        let names = [
            &self.accounts.crypto_pool,
            &self.accounts.payout_pool,
            &self.accounts.fee_revenue,
        ];
        if names.iter().any(|name| name.trim().is_empty()) {
            return Err(crate::LedgerError::Validation(
                "house account names must not be empty".to_string(),
            )
            .into());
        }
        Ok(Engine {
            database: self.database,
            accounts: self.accounts,
        })
    }
}
