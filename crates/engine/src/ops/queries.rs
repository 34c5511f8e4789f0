//! Onboarding and read-only operations exposed to treasury and compliance.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use uuid::Uuid;

use crate::{
    Currency, LedgerEntry, MerchantBalance, ResultEngine,
    accounts::{self, Reconciliation, merchant_balance_account, merchant_pending_account},
    balances,
    ledger::{self, UnbalancedGroup},
};

use super::{Engine, SETTLEMENT_CURRENCY};

impl Engine {
    /// Creates the zeroed balance of a newly onboarded merchant.
    pub async fn create_merchant_balance(&self, merchant_id: &str) -> ResultEngine<MerchantBalance> {
        let balance = balances::create(&self.database, merchant_id).await?;
        tracing::info!(merchant_id, "merchant balance created");
        Ok(balance)
    }

    pub async fn merchant_balance(&self, merchant_id: &str) -> ResultEngine<MerchantBalance> {
        Ok(balances::get(&self.database, merchant_id).await?)
    }

    pub async fn ledger_entry(&self, id: Uuid) -> ResultEngine<LedgerEntry> {
        Ok(ledger::get_by_id(&self.database, id).await?)
    }

    /// Entries of a merchant, newest first.
    pub async fn merchant_entries(
        &self,
        merchant_id: &str,
        limit: u64,
        offset: u64,
    ) -> ResultEngine<Vec<LedgerEntry>> {
        Ok(ledger::get_by_merchant(&self.database, merchant_id, limit, offset).await?)
    }

    pub async fn entries_by_reference(
        &self,
        reference_type: &str,
        reference_id: &str,
    ) -> ResultEngine<Vec<LedgerEntry>> {
        Ok(ledger::get_by_reference(&self.database, reference_type, reference_id).await?)
    }

    pub async fn transaction_group(&self, transaction_group_id: Uuid) -> ResultEngine<Vec<LedgerEntry>> {
        Ok(ledger::get_by_transaction_group(&self.database, transaction_group_id).await?)
    }

    pub async fn account_entries(
        &self,
        account: &str,
        limit: u64,
        offset: u64,
    ) -> ResultEngine<Vec<LedgerEntry>> {
        Ok(ledger::get_by_account(&self.database, account, limit, offset).await?)
    }

    pub async fn account_balance(&self, account: &str) -> ResultEngine<Decimal> {
        Ok(accounts::account_balance(&self.database, account).await?)
    }

    pub async fn account_balances_by_currency(
        &self,
        account: &str,
    ) -> ResultEngine<BTreeMap<Currency, Decimal>> {
        Ok(accounts::account_balances_by_currency(&self.database, account).await?)
    }

    /// Audits the whole ledger; see [`ledger::validate_integrity`].
    pub async fn validate_integrity(&self) -> ResultEngine<Vec<UnbalancedGroup>> {
        let unbalanced = ledger::validate_integrity(&self.database).await?;
        if unbalanced.is_empty() {
            tracing::info!("ledger integrity check passed");
        } else {
            tracing::warn!(groups = unbalanced.len(), "ledger integrity check failed");
        }
        Ok(unbalanced)
    }

    /// Compares a merchant's balance aggregate with its ledger accounts.
    pub async fn reconcile_merchant(&self, merchant_id: &str) -> ResultEngine<Reconciliation> {
        let balance = balances::get(&self.database, merchant_id).await?;
        let position = |balances: BTreeMap<Currency, Decimal>| {
            balances
                .get(&SETTLEMENT_CURRENCY)
                .copied()
                .unwrap_or(Decimal::ZERO)
        };
        let available = position(
            accounts::account_balances_by_currency(
                &self.database,
                &merchant_balance_account(merchant_id),
            )
            .await?,
        );
        let pending = position(
            accounts::account_balances_by_currency(
                &self.database,
                &merchant_pending_account(merchant_id),
            )
            .await?,
        );

        let reconciliation = Reconciliation::new(balance, available, pending);
        if !reconciliation.is_consistent() {
            tracing::warn!(
                merchant_id,
                available_difference = %reconciliation.available_difference(),
                pending_difference = %reconciliation.pending_difference(),
                "merchant balance disagrees with the ledger"
            );
        }
        Ok(reconciliation)
    }
}
