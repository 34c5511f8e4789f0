use rust_decimal::Decimal;

use crate::{
    NewLedgerEntry, ResultEngine,
    accounts::{merchant_balance_account, merchant_pending_account},
    balances,
};

use super::{
    BalanceChange, Engine, PAYMENT_REFERENCE, PAYMENT_SETTLEMENT_REFERENCE, Posting,
    SETTLEMENT_CURRENCY,
};

impl Engine {
    /// Books a confirmed payment straight into the merchant's available funds.
    ///
    /// Ledger: debit the crypto pool, credit `merchant_balance:<merchant_id>`.
    /// Balance: `record_payment`.
    pub async fn confirm_payment(
        &self,
        payment_id: &str,
        merchant_id: &str,
        amount: Decimal,
    ) -> ResultEngine<Posting> {
        let entries = NewLedgerEntry::pair(
            &self.accounts.crypto_pool,
            &merchant_balance_account(merchant_id),
            amount,
            SETTLEMENT_CURRENCY,
            PAYMENT_REFERENCE,
            payment_id,
            &format!("payment {payment_id} confirmed"),
        )
        .map(|entry| entry.with_merchant(merchant_id))
        .to_vec();

        let posting = self
            .post(
                merchant_id,
                PAYMENT_REFERENCE,
                payment_id,
                entries,
                BalanceChange::RecordPayment(amount),
            )
            .await
            .inspect_err(|err| {
                tracing::warn!(payment_id, merchant_id, %amount, error = %err, "payment confirmation rejected");
            })?;

        tracing::info!(
            payment_id,
            merchant_id,
            %amount,
            transaction_group_id = %posting.transaction_group_id,
            "payment confirmed"
        );
        Ok(posting)
    }

    /// Books a detected payment that is not spendable yet.
    ///
    /// Ledger: debit the crypto pool, credit `merchant_pending:<merchant_id>`.
    /// Balance: `increment_pending`.
    pub async fn record_pending_payment(
        &self,
        payment_id: &str,
        merchant_id: &str,
        amount: Decimal,
    ) -> ResultEngine<Posting> {
        let entries = NewLedgerEntry::pair(
            &self.accounts.crypto_pool,
            &merchant_pending_account(merchant_id),
            amount,
            SETTLEMENT_CURRENCY,
            PAYMENT_REFERENCE,
            payment_id,
            &format!("payment {payment_id} pending"),
        )
        .map(|entry| entry.with_merchant(merchant_id))
        .to_vec();

        let posting = self
            .post(
                merchant_id,
                PAYMENT_REFERENCE,
                payment_id,
                entries,
                BalanceChange::IncrementPending(amount),
            )
            .await
            .inspect_err(|err| {
                tracing::warn!(payment_id, merchant_id, %amount, error = %err, "pending payment rejected");
            })?;

        tracing::info!(
            payment_id,
            merchant_id,
            %amount,
            transaction_group_id = %posting.transaction_group_id,
            "pending payment recorded"
        );
        Ok(posting)
    }

    /// Makes a pending payment spendable, keeping `fee` as revenue.
    ///
    /// Ledger: debit `merchant_pending:<merchant_id>` by `amount`, credit
    /// `merchant_balance:<merchant_id>` with `amount - fee` and fee revenue with
    /// `fee`. Balance: `convert_pending_to_available`.
    pub async fn settle_pending_payment(
        &self,
        payment_id: &str,
        merchant_id: &str,
        amount: Decimal,
        fee: Decimal,
    ) -> ResultEngine<Posting> {
        let result = match self.settlement_entries(payment_id, merchant_id, amount, fee) {
            Ok(entries) => {
                self.post(
                    merchant_id,
                    PAYMENT_SETTLEMENT_REFERENCE,
                    payment_id,
                    entries,
                    BalanceChange::ConvertPendingToAvailable { amount, fee },
                )
                .await
            }
            Err(err) => Err(err),
        };
        let posting = result.inspect_err(|err| {
            tracing::warn!(payment_id, merchant_id, %amount, %fee, error = %err, "settlement rejected");
        })?;

        tracing::info!(
            payment_id,
            merchant_id,
            %amount,
            %fee,
            transaction_group_id = %posting.transaction_group_id,
            "pending payment settled"
        );
        Ok(posting)
    }

    fn settlement_entries(
        &self,
        payment_id: &str,
        merchant_id: &str,
        amount: Decimal,
        fee: Decimal,
    ) -> ResultEngine<Vec<NewLedgerEntry>> {
        balances::check_conversion(amount, fee)?;

        let pending_account = merchant_pending_account(merchant_id);
        let mut entries = NewLedgerEntry::pair(
            &pending_account,
            &merchant_balance_account(merchant_id),
            amount - fee,
            SETTLEMENT_CURRENCY,
            PAYMENT_SETTLEMENT_REFERENCE,
            payment_id,
            &format!("payment {payment_id} settled"),
        )
        .to_vec();
        if !fee.is_zero() {
            entries.extend(NewLedgerEntry::pair(
                &pending_account,
                &self.accounts.fee_revenue,
                fee,
                SETTLEMENT_CURRENCY,
                PAYMENT_SETTLEMENT_REFERENCE,
                payment_id,
                &format!("payment {payment_id} fee"),
            ));
        }
        Ok(entries
            .into_iter()
            .map(|entry| entry.with_merchant(merchant_id))
            .collect())
    }
}
