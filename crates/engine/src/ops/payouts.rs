use rust_decimal::Decimal;

use crate::{
    MerchantBalance, NewLedgerEntry, ResultEngine, accounts::merchant_balance_account, balances,
};

use super::{BalanceChange, Engine, PAYOUT_REFERENCE, Posting, SETTLEMENT_CURRENCY};

impl Engine {
    /// Holds `amount` of the merchant's available funds for a payout request.
    ///
    /// Nothing moves yet, so no ledger entry is written.
    pub async fn reserve_balance(
        &self,
        merchant_id: &str,
        amount: Decimal,
    ) -> ResultEngine<MerchantBalance> {
        let balance = balances::reserve_balance(&self.database, merchant_id, amount)
            .await
            .inspect_err(|err| {
                tracing::warn!(merchant_id, %amount, error = %err, "reservation rejected");
            })?;
        tracing::info!(merchant_id, %amount, "balance reserved");
        Ok(balance)
    }

    /// Releases the hold of a cancelled or rejected payout.
    pub async fn release_reserved_balance(
        &self,
        merchant_id: &str,
        amount: Decimal,
    ) -> ResultEngine<MerchantBalance> {
        let balance = balances::release_reserved_balance(&self.database, merchant_id, amount)
            .await
            .inspect_err(|err| {
                tracing::warn!(merchant_id, %amount, error = %err, "release rejected");
            })?;
        tracing::info!(merchant_id, %amount, "reservation released");
        Ok(balance)
    }

    /// Settles an approved payout: `amount` leaves through the payout pool and
    /// `fee` is kept as revenue.
    ///
    /// Ledger: debit `merchant_balance:<merchant_id>`, credit the payout pool
    /// with `amount` and fee revenue with `fee`. Balance: `deduct_balance`,
    /// which requires the funds to be reserved beforehand.
    pub async fn complete_payout(
        &self,
        payout_id: &str,
        merchant_id: &str,
        amount: Decimal,
        fee: Decimal,
    ) -> ResultEngine<Posting> {
        let result = match self.payout_entries(payout_id, merchant_id, amount, fee) {
            Ok(entries) => {
                self.post(
                    merchant_id,
                    PAYOUT_REFERENCE,
                    payout_id,
                    entries,
                    BalanceChange::DeductBalance { amount, fee },
                )
                .await
            }
            Err(err) => Err(err),
        };
        let posting = result.inspect_err(|err| {
            tracing::warn!(payout_id, merchant_id, %amount, %fee, error = %err, "payout rejected");
        })?;

        tracing::info!(
            payout_id,
            merchant_id,
            %amount,
            %fee,
            transaction_group_id = %posting.transaction_group_id,
            "payout completed"
        );
        Ok(posting)
    }

    fn payout_entries(
        &self,
        payout_id: &str,
        merchant_id: &str,
        amount: Decimal,
        fee: Decimal,
    ) -> ResultEngine<Vec<NewLedgerEntry>> {
        balances::ensure_non_negative(fee)?;
        balances::ensure_positive(amount, "payout amount must be > 0")?;

        let merchant_account = merchant_balance_account(merchant_id);
        let mut entries = NewLedgerEntry::pair(
            &merchant_account,
            &self.accounts.payout_pool,
            amount,
            SETTLEMENT_CURRENCY,
            PAYOUT_REFERENCE,
            payout_id,
            &format!("payout {payout_id} completed"),
        )
        .to_vec();
        if !fee.is_zero() {
            entries.extend(NewLedgerEntry::pair(
                &merchant_account,
                &self.accounts.fee_revenue,
                fee,
                SETTLEMENT_CURRENCY,
                PAYOUT_REFERENCE,
                payout_id,
                &format!("payout {payout_id} fee"),
            ));
        }
        Ok(entries
            .into_iter()
            .map(|entry| entry.with_merchant(merchant_id))
            .collect())
    }
}
