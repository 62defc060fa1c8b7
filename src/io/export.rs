use anyhow::Result;
use std::io::Write;

use crate::application::LedgerService;
use crate::domain::{AccountId, Direction, Money, Statement, Transaction, format_cents};
use crate::storage::LedgerStore;

/// Rows fetched per store round trip while exporting a transaction history.
const EXPORT_PAGE_SIZE: u64 = 500;

/// Exporter for converting ledger data to CSV
pub struct Exporter<'a, S> {
    service: &'a LedgerService<S>,
}

impl<'a, S: LedgerStore> Exporter<'a, S> {
    pub fn new(service: &'a LedgerService<S>) -> Self {
        Self { service }
    }

    /// Export every transaction touching the account, newest first.
    /// Signed amounts are from the account's point of view.
    pub async fn export_transactions_csv<W: Write>(
        &self,
        account_id: AccountId,
        writer: W,
    ) -> Result<usize> {
        let mut csv_writer = csv::Writer::from_writer(writer);

        // Write header
        csv_writer.write_record([
            "id",
            "sequence",
            "created_at",
            "kind",
            "status",
            "from_account",
            "to_account",
            "amount",
            "fee",
            "effect",
            "currency",
            "description",
            "reference",
            "reverses",
        ])?;

        let mut cursor = self.service.transactions(account_id, EXPORT_PAGE_SIZE);
        let mut count = 0;
        while let Some(page) = cursor.next_page().await? {
            for tx in &page {
                let (from, to) = endpoints(tx);
                let effect = tx.effect_on(account_id)?;

                csv_writer.write_record([
                    tx.id.to_string(),
                    tx.sequence.to_string(),
                    tx.created_at.to_rfc3339(),
                    tx.kind().to_string(),
                    tx.status.to_string(),
                    from,
                    to,
                    format_cents(tx.amount.cents()),
                    format_cents(tx.fee.cents()),
                    format_cents(effect.cents()),
                    tx.amount.currency().to_string(),
                    tx.description.clone().unwrap_or_default(),
                    tx.reference.clone().unwrap_or_default(),
                    tx.reverses.as_ref().map(|id| id.to_string()).unwrap_or_default(),
                ])?;
                count += 1;
            }
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export account balances to CSV format
    pub async fn export_accounts_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let accounts = self.service.list_accounts().await?;
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "account_number",
            "type",
            "status",
            "currency",
            "balance",
            "available_balance",
        ])?;

        let mut count = 0;
        for account in &accounts {
            csv_writer.write_record([
                account.account_number.as_str(),
                account.account_type.as_str(),
                account.status.as_str(),
                account.currency.as_str(),
                &format_cents(account.balance.cents()),
                &format_cents(account.available_balance.cents()),
            ])?;
            count += 1;
        }

        csv_writer.flush()?;
        Ok(count)
    }

    /// Export a statement as a header plus one row.
    pub fn export_statement_csv<W: Write>(&self, statement: &Statement, writer: W) -> Result<()> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record([
            "statement_number",
            "account_number",
            "start_date",
            "end_date",
            "currency",
            "opening_balance",
            "total_deposits",
            "total_withdrawals",
            "total_transfers_in",
            "total_transfers_out",
            "total_fees",
            "total_interest",
            "net_change",
            "closing_balance",
            "transaction_count",
            "generated_at",
        ])?;

        let money = |m: Money| format_cents(m.cents());
        csv_writer.write_record([
            statement.statement_number.clone(),
            statement.account_number.clone(),
            statement.period.start_date.to_string(),
            statement.period.end_date.to_string(),
            statement.currency.to_string(),
            money(statement.opening_balance),
            money(statement.total_deposits),
            money(statement.total_withdrawals),
            money(statement.total_transfers_in),
            money(statement.total_transfers_out),
            money(statement.total_fees),
            money(statement.total_interest),
            money(statement.net_change),
            money(statement.closing_balance),
            statement.transaction_count.to_string(),
            statement.generated_at.to_rfc3339(),
        ])?;

        csv_writer.flush()?;
        Ok(())
    }
}

/// Source and destination account columns. Deposits have no source and
/// debits no destination.
fn endpoints(tx: &Transaction) -> (String, String) {
    if let Some(route) = tx.movement.route() {
        return (route.from().to_string(), route.to().to_string());
    }
    let account = tx.movement.primary_account();
    match tx.movement.direction_for(account) {
        Some(Direction::Credit) => (String::new(), account.to_string()),
        _ => (account.to_string(), String::new()),
    }
}
