//! Positions derived from the ledger.
//!
//! An account's balance is the sum of what its debit entries post minus the sum
//! of what its credit entries post. It is computed from the immutable ledger
//! only, so it can be used to cross-check the mutable merchant balances.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use sea_orm::{Condition, ConnectionTrait, QueryFilter, QuerySelect, prelude::*};
use serde::{Deserialize, Serialize};

use crate::{
    Currency, EntryType, LedgerError, MerchantBalance, ledger_entries, money::from_stored,
};

/// Account holding a merchant's available funds.
pub fn merchant_balance_account(merchant_id: &str) -> String {
    format!("merchant_balance:{merchant_id}")
}

/// Account holding a merchant's funds awaiting settlement.
pub fn merchant_pending_account(merchant_id: &str) -> String {
    format!("merchant_pending:{merchant_id}")
}

/// Net position of `account` in every currency it has entries in.
pub async fn account_balances_by_currency<C: ConnectionTrait>(
    conn: &C,
    account: &str,
) -> Result<BTreeMap<Currency, Decimal>, LedgerError> {
    let rows: Vec<(String, String, String)> = ledger_entries::Entity::find()
        .select_only()
        .column(ledger_entries::Column::EntryType)
        .column(ledger_entries::Column::Currency)
        .column(ledger_entries::Column::Amount)
        .filter(
            Condition::any()
                .add(
                    Condition::all()
                        .add(ledger_entries::Column::EntryType.eq(EntryType::Debit.as_str()))
                        .add(ledger_entries::Column::DebitAccount.eq(account)),
                )
                .add(
                    Condition::all()
                        .add(ledger_entries::Column::EntryType.eq(EntryType::Credit.as_str()))
                        .add(ledger_entries::Column::CreditAccount.eq(account)),
                ),
        )
        .into_tuple()
        .all(conn)
        .await?;

    let mut balances: BTreeMap<Currency, Decimal> = BTreeMap::new();
    for (entry_type, currency, amount) in rows {
        let amount = from_stored(&amount, "ledger_entries.amount")?;
        let position = balances
            .entry(Currency::try_from(currency.as_str())?)
            .or_default();
        match EntryType::try_from(entry_type.as_str())? {
            EntryType::Debit => *position += amount,
            EntryType::Credit => *position -= amount,
        }
    }
    Ok(balances)
}

/// Net position of a single-currency account; zero when it has no entries.
///
/// Accounts with entries in several currencies are rejected rather than summed
/// across currencies; use [`account_balances_by_currency`] for those.
///
/// An entry counts only toward the account on its own side: a debit toward its
/// debit account, a credit toward its credit account. A lone
/// [`ledger::append_single`](crate::ledger::append_single) entry therefore
/// leaves the counterparty account at zero until the matching half is appended.
pub async fn account_balance<C: ConnectionTrait>(
    conn: &C,
    account: &str,
) -> Result<Decimal, LedgerError> {
    let balances = account_balances_by_currency(conn, account).await?;
    if balances.len() > 1 {
        let currencies: Vec<&str> = balances.keys().map(|c| c.code()).collect();
        return Err(LedgerError::Validation(format!(
            "account {account} holds several currencies: {}",
            currencies.join(", ")
        )));
    }
    Ok(balances.into_values().next().unwrap_or(Decimal::ZERO))
}

/// Ledger-derived positions of a merchant set against its balance aggregate.
///
/// Merchant accounts are liabilities: their ledger positions are negative, so
/// the ledger figures here are sign-flipped to compare with the aggregate.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reconciliation {
    pub merchant_id: String,
    pub ledger_available_vnd: Decimal,
    pub ledger_pending_vnd: Decimal,
    pub balance: MerchantBalance,
}

impl Reconciliation {
    pub(crate) fn new(
        balance: MerchantBalance,
        available_position: Decimal,
        pending_position: Decimal,
    ) -> Self {
        Self {
            merchant_id: balance.merchant_id.clone(),
            ledger_available_vnd: liability(available_position),
            ledger_pending_vnd: liability(pending_position),
            balance,
        }
    }

    /// Aggregate minus ledger for the available funds.
    pub fn available_difference(&self) -> Decimal {
        self.balance.available_vnd - self.ledger_available_vnd
    }

    /// Aggregate minus ledger for the pending funds.
    pub fn pending_difference(&self) -> Decimal {
        self.balance.pending_vnd - self.ledger_pending_vnd
    }

    pub fn is_consistent(&self) -> bool {
        self.available_difference().is_zero() && self.pending_difference().is_zero()
    }
}

fn liability(position: Decimal) -> Decimal {
    if position.is_zero() {
        Decimal::ZERO
    } else {
        -position
    }
}
