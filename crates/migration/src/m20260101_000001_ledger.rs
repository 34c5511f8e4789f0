//! Accounting schema.
//!
//! - `ledger_entries`: append-only double-entry rows, one per posted side
//! - `merchant_balances`: one aggregate row per merchant, guarded by `version`
//!
//! Money columns are exact decimal strings; arithmetic happens in the engine.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[derive(Iden)]
enum LedgerEntries {
    Table,
    Id,
    TransactionGroupId,
    Position,
    EntryType,
    DebitAccount,
    CreditAccount,
    Amount,
    Currency,
    ReferenceType,
    ReferenceId,
    MerchantId,
    Description,
    Metadata,
    CreatedAt,
}

#[derive(Iden)]
enum MerchantBalances {
    Table,
    MerchantId,
    PendingVnd,
    AvailableVnd,
    TotalVnd,
    ReservedVnd,
    TotalReceivedVnd,
    TotalPaidOutVnd,
    TotalFeesVnd,
    TotalPaymentsCount,
    TotalPayoutsCount,
    LastPaymentAt,
    LastPayoutAt,
    Version,
    CreatedAt,
    UpdatedAt,
}

fn money(column: MerchantBalances) -> ColumnDef {
    ColumnDef::new(column)
        .string()
        .not_null()
        .default("0")
        .to_owned()
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(LedgerEntries::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(LedgerEntries::Id)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(LedgerEntries::TransactionGroupId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LedgerEntries::Position).integer().not_null())
                    .col(ColumnDef::new(LedgerEntries::EntryType).string().not_null())
                    .col(
                        ColumnDef::new(LedgerEntries::DebitAccount)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LedgerEntries::CreditAccount)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LedgerEntries::Amount).string().not_null())
                    .col(
                        ColumnDef::new(LedgerEntries::Currency)
                            .string()
                            .not_null()
                            .default("VND"),
                    )
                    .col(
                        ColumnDef::new(LedgerEntries::ReferenceType)
                            .string()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(LedgerEntries::ReferenceId)
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(LedgerEntries::MerchantId).string())
                    .col(
                        ColumnDef::new(LedgerEntries::Description)
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(LedgerEntries::Metadata).text())
                    .col(
                        ColumnDef::new(LedgerEntries::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        let indexes = [
            ("idx-ledger_entries-merchant_id", vec![LedgerEntries::MerchantId]),
            (
                "idx-ledger_entries-reference",
                vec![LedgerEntries::ReferenceType, LedgerEntries::ReferenceId],
            ),
            (
                "idx-ledger_entries-transaction_group_id",
                vec![LedgerEntries::TransactionGroupId],
            ),
            ("idx-ledger_entries-debit_account", vec![LedgerEntries::DebitAccount]),
            ("idx-ledger_entries-credit_account", vec![LedgerEntries::CreditAccount]),
        ];
        for (name, columns) in indexes {
            let mut index = Index::create();
            index.name(name).table(LedgerEntries::Table);
            for column in columns {
                index.col(column);
            }
            manager.create_index(index.to_owned()).await?;
        }

        manager
            .create_table(
                Table::create()
                    .table(MerchantBalances::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MerchantBalances::MerchantId)
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(money(MerchantBalances::PendingVnd))
                    .col(money(MerchantBalances::AvailableVnd))
                    .col(money(MerchantBalances::TotalVnd))
                    .col(money(MerchantBalances::ReservedVnd))
                    .col(money(MerchantBalances::TotalReceivedVnd))
                    .col(money(MerchantBalances::TotalPaidOutVnd))
                    .col(money(MerchantBalances::TotalFeesVnd))
                    .col(
                        ColumnDef::new(MerchantBalances::TotalPaymentsCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MerchantBalances::TotalPayoutsCount)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(MerchantBalances::LastPaymentAt).timestamp_with_time_zone())
                    .col(ColumnDef::new(MerchantBalances::LastPayoutAt).timestamp_with_time_zone())
                    .col(
                        ColumnDef::new(MerchantBalances::Version)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(
                        ColumnDef::new(MerchantBalances::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(MerchantBalances::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(MerchantBalances::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(LedgerEntries::Table).to_owned())
            .await?;
        Ok(())
    }
}
