use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use crate::application::{LedgerService, OpenAccount};
use crate::config::LedgerConfig;
use crate::domain::{
    Account, AccountStatus, AccountType, Currency, Money, Statement, Transaction, TransactionId,
    format_cents,
};
use crate::storage::SqliteStore;

type Service = LedgerService<SqliteStore>;

/// Tally - Retail Bank Ledger Engine
#[derive(Parser)]
#[command(name = "tally")]
#[command(about = "Account ledger with daily limits, transfers and statements")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, default_value = "tally.db")]
    pub database: String,

    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the day boundary offset, in minutes east of UTC
    #[arg(long, allow_hyphen_values = true)]
    pub utc_offset_minutes: Option<i32>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Deposit money into an account
    Deposit {
        /// Account number or id
        account: String,

        /// Amount (e.g., "50.00" or "50")
        amount: String,

        #[arg(short, long)]
        description: Option<String>,

        /// External reference (teller slip, order number)
        #[arg(short, long)]
        reference: Option<String>,
    },

    /// Withdraw money from an account
    Withdraw {
        /// Account number or id
        account: String,

        /// Amount (e.g., "50.00" or "50")
        amount: String,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        reference: Option<String>,
    },

    /// Transfer money between two accounts
    Transfer {
        /// Amount to transfer (e.g., "50.00" or "50")
        amount: String,

        /// Source account number or id
        #[arg(long)]
        from: String,

        /// Destination account number or id
        #[arg(long)]
        to: String,

        #[arg(short, long)]
        description: Option<String>,

        #[arg(short, long)]
        reference: Option<String>,
    },

    /// Charge a fee to an account
    Fee {
        /// Account number or id
        account: String,

        /// Amount (e.g., "2.50")
        amount: String,

        #[arg(short, long)]
        description: Option<String>,
    },

    /// Reverse a completed transaction
    Reverse {
        /// Transaction ID to reverse
        id: String,
    },

    /// List transactions of an account, newest first
    Transactions {
        /// Account number or id
        account: String,

        /// Maximum number of transactions to show
        #[arg(short, long, default_value = "20")]
        limit: u64,

        /// Number of transactions to skip
        #[arg(long, default_value = "0")]
        offset: u64,
    },

    /// Show detailed transaction information
    Transaction {
        /// Transaction ID
        id: String,
    },

    /// Statement commands
    #[command(subcommand)]
    Statement(StatementCommands),

    /// Verify ledger integrity
    Verify,

    /// Export data to CSV
    Export {
        /// What to export: transactions, accounts, statement
        export_type: String,

        /// Account number or id (for transactions)
        #[arg(long)]
        account: Option<String>,

        /// Statement number (for statement)
        #[arg(long)]
        statement: Option<String>,

        /// Output file (stdout if omitted)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open a new account
    Open {
        /// Account type: checking, savings, money_market, certificate_of_deposit, business
        #[arg(short = 't', long = "type", default_value = "checking")]
        account_type: String,

        /// Currency code (defaults to the configured currency)
        #[arg(long)]
        currency: Option<String>,

        /// Initial deposit amount
        #[arg(long)]
        initial_deposit: Option<String>,

        /// Daily withdrawal limit
        #[arg(long)]
        withdrawal_limit: Option<String>,

        /// Daily transfer limit
        #[arg(long)]
        transfer_limit: Option<String>,

        /// Allow the balance to go down to minus this amount
        #[arg(long)]
        overdraft: Option<String>,
    },

    /// Close an account permanently
    Close { account: String },

    /// Suspend an account
    Suspend { account: String },

    /// Reactivate a suspended or inactive account
    Activate { account: String },

    /// Show account details and balances
    Show { account: String },

    /// List all accounts
    List,
}

#[derive(Subcommand)]
pub enum StatementCommands {
    /// Generate a statement for [from, to)
    Generate {
        /// Account number or id
        account: String,

        /// Start date, inclusive (YYYY-MM-DD)
        #[arg(long)]
        from: String,

        /// End date, exclusive (YYYY-MM-DD)
        #[arg(long)]
        to: String,

        /// Output format: table, json, csv
        #[arg(long, default_value = "table")]
        format: String,
    },

    /// List generated statements of an account
    List {
        account: String,

        #[arg(short, long, default_value = "12")]
        limit: u64,
    },

    /// Show a generated statement
    Show {
        /// Statement number
        number: String,

        /// Output format: table, json, csv
        #[arg(long, default_value = "table")]
        format: String,
    },
}

impl Cli {
    fn init_tracing(&self) {
        let default = if self.verbose { "debug" } else { "warn" };
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    fn load_config(&self) -> Result<LedgerConfig> {
        let mut config = match &self.config {
            Some(path) => LedgerConfig::load(path)?,
            None => LedgerConfig::default(),
        };
        if let Some(minutes) = self.utc_offset_minutes {
            config.utc_offset_minutes = minutes;
        }
        config.validate()?;
        Ok(config)
    }

    pub async fn run(self) -> Result<()> {
        self.init_tracing();
        let config = self.load_config()?;

        if matches!(self.command, Commands::Init) {
            Service::init(&self.database, config).await?;
            println!("Database initialized: {}", self.database);
            return Ok(());
        }

        let service = Service::connect(&self.database, config)
            .await
            .with_context(|| format!("Failed to open database {}", self.database))?;

        match self.command {
            Commands::Init => {}

            Commands::Account(cmd) => run_account_command(&service, cmd).await?,

            Commands::Deposit {
                account,
                amount,
                description,
                reference,
            } => {
                let account = resolve_account(&service, &account).await?;
                let amount = parse_amount(&amount, account.currency)?;
                let tx = service
                    .deposit(account.id, amount, description, reference)
                    .await?;
                print_posted("Deposited", &tx, &service, account.id).await?;
            }

            Commands::Withdraw {
                account,
                amount,
                description,
                reference,
            } => {
                let account = resolve_account(&service, &account).await?;
                let amount = parse_amount(&amount, account.currency)?;
                let tx = service
                    .withdraw(account.id, amount, description, reference)
                    .await?;
                print_posted("Withdrew", &tx, &service, account.id).await?;
            }

            Commands::Transfer {
                amount,
                from,
                to,
                description,
                reference,
            } => {
                let from = resolve_account(&service, &from).await?;
                let to = resolve_account(&service, &to).await?;
                let amount = parse_amount(&amount, from.currency)?;
                let tx = service
                    .transfer(from.id, to.id, amount, description, reference)
                    .await?;
                println!(
                    "Transferred {} {} -> {} ({})",
                    tx.amount, from.account_number, to.account_number, tx.id
                );
            }

            Commands::Fee {
                account,
                amount,
                description,
            } => {
                let account = resolve_account(&service, &account).await?;
                let amount = parse_amount(&amount, account.currency)?;
                let tx = service.charge_fee(account.id, amount, description).await?;
                print_posted("Charged fee", &tx, &service, account.id).await?;
            }

            Commands::Reverse { id } => {
                let reversal = service
                    .reverse_transaction(&TransactionId::from(id.as_str()))
                    .await?;
                println!(
                    "Reversed transaction {}: {} {} ({})",
                    id,
                    reversal.kind(),
                    reversal.amount,
                    reversal.id
                );
            }

            Commands::Transactions {
                account,
                limit,
                offset,
            } => {
                let account = resolve_account(&service, &account).await?;
                run_transactions_command(&service, &account, offset, limit).await?;
            }

            Commands::Transaction { id } => {
                let tx = service
                    .get_transaction(&TransactionId::from(id.as_str()))
                    .await?;
                print_transaction(&tx);
            }

            Commands::Statement(cmd) => run_statement_command(&service, cmd).await?,

            Commands::Verify => run_verify_command(&service).await?,

            Commands::Export {
                export_type,
                account,
                statement,
                output,
            } => {
                run_export_command(
                    &service,
                    &export_type,
                    account.as_deref(),
                    statement.as_deref(),
                    output.as_deref(),
                )
                .await?
            }
        }

        Ok(())
    }
}

async fn run_account_command(service: &Service, cmd: AccountCommands) -> Result<()> {
    match cmd {
        AccountCommands::Open {
            account_type,
            currency,
            initial_deposit,
            withdrawal_limit,
            transfer_limit,
            overdraft,
        } => {
            let account_type = AccountType::from_str(&account_type).with_context(|| {
                format!(
                    "Invalid account type '{}'. Valid types: checking, savings, money_market, \
                     certificate_of_deposit, business",
                    account_type
                )
            })?;
            let currency = match currency {
                Some(code) => Currency::new(&code)?,
                None => service.config().currency,
            };

            let mut request = OpenAccount::new(account_type).currency(currency);
            if let Some(amount) = initial_deposit {
                request = request.initial_deposit(parse_amount(&amount, currency)?);
            }
            if let Some(limit) = withdrawal_limit {
                request.daily_withdrawal_limit = Some(parse_amount(&limit, currency)?);
            }
            if let Some(limit) = transfer_limit {
                request.daily_transfer_limit = Some(parse_amount(&limit, currency)?);
            }
            if let Some(limit) = overdraft {
                request = request.overdraft(parse_amount(&limit, currency)?);
            }

            let account = service.open_account(request).await?;
            println!(
                "Opened {} account {} (routing {}), balance {}",
                account.account_type,
                account.account_number,
                account.routing_number,
                account.balance
            );
        }

        AccountCommands::Close { account } => {
            let account = resolve_account(service, &account).await?;
            let account = service.close_account(account.id).await?;
            println!("Closed account {}", account.account_number);
        }

        AccountCommands::Suspend { account } => {
            let account = resolve_account(service, &account).await?;
            let account = service
                .set_status(account.id, AccountStatus::Suspended)
                .await?;
            println!("Suspended account {}", account.account_number);
        }

        AccountCommands::Activate { account } => {
            let account = resolve_account(service, &account).await?;
            let account = service.set_status(account.id, AccountStatus::Active).await?;
            println!("Activated account {}", account.account_number);
        }

        AccountCommands::Show { account } => {
            let account = resolve_account(service, &account).await?;
            let count = service.count_transactions(account.id).await?;
            print_account(&account, count);
        }

        AccountCommands::List => {
            let accounts = service.list_accounts().await?;
            if accounts.is_empty() {
                println!("No accounts found.");
                return Ok(());
            }

            println!(
                "{:<12} {:<24} {:<10} {:>14} {:>14} {:<4}",
                "NUMBER", "TYPE", "STATUS", "BALANCE", "AVAILABLE", "CCY"
            );
            println!("{}", "-".repeat(83));
            for account in accounts {
                println!(
                    "{:<12} {:<24} {:<10} {:>14} {:>14} {:<4}",
                    account.account_number,
                    account.account_type,
                    account.status,
                    format_cents(account.balance.cents()),
                    format_cents(account.available_balance.cents()),
                    account.currency
                );
            }
        }
    }
    Ok(())
}

async fn run_transactions_command(
    service: &Service,
    account: &Account,
    offset: u64,
    limit: u64,
) -> Result<()> {
    let transactions = service.list_transactions(account.id, offset, limit).await?;
    if transactions.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    println!(
        "{:<16} {:<20} {:<11} {:>12} {:<30}",
        "ID", "DATE", "KIND", "EFFECT", "DESCRIPTION"
    );
    println!("{}", "-".repeat(92));
    for tx in &transactions {
        let effect = tx.effect_on(account.id)?;
        println!(
            "{:<16} {:<20} {:<11} {:>12} {:<30}",
            tx.id,
            tx.created_at.format("%Y-%m-%d %H:%M:%S"),
            tx.kind(),
            format_cents(effect.cents()),
            truncate(tx.description.as_deref().unwrap_or("-"), 30)
        );
    }

    let total = service.count_transactions(account.id).await?;
    println!();
    println!(
        "Showing {} of {} transactions (offset {})",
        transactions.len(),
        total,
        offset
    );
    Ok(())
}

async fn run_statement_command(service: &Service, cmd: StatementCommands) -> Result<()> {
    match cmd {
        StatementCommands::Generate {
            account,
            from,
            to,
            format,
        } => {
            let account = resolve_account(service, &account).await?;
            let statement = service
                .generate_statement(account.id, parse_date(&from)?, parse_date(&to)?)
                .await?;
            print_statement(service, &statement, &format)?;
        }

        StatementCommands::List { account, limit } => {
            let account = resolve_account(service, &account).await?;
            let statements = service.list_statements(account.id, 0, limit).await?;
            if statements.is_empty() {
                println!("No statements found.");
                return Ok(());
            }

            println!(
                "{:<32} {:<10} {:<10} {:>14} {:>14}",
                "NUMBER", "FROM", "TO", "OPENING", "CLOSING"
            );
            println!("{}", "-".repeat(84));
            for statement in statements {
                println!(
                    "{:<32} {:<10} {:<10} {:>14} {:>14}",
                    statement.statement_number,
                    statement.period.start_date,
                    statement.period.end_date,
                    format_cents(statement.opening_balance.cents()),
                    format_cents(statement.closing_balance.cents())
                );
            }
        }

        StatementCommands::Show { number, format } => {
            let statement = service.get_statement(&number).await?;
            print_statement(service, &statement, &format)?;
        }
    }
    Ok(())
}

async fn run_verify_command(service: &Service) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = service.check_integrity().await?;

    println!("Accounts:     {}", report.accounts_checked);
    println!("Transactions: {}", report.transactions_checked);
    println!();

    if report.is_healthy() {
        println!("Ledger is consistent.");
    } else {
        println!("Issues found:");
        for issue in &report.issues {
            println!("  - {}", issue);
        }
        anyhow::bail!("Ledger integrity check failed");
    }

    Ok(())
}

async fn run_export_command(
    service: &Service,
    export_type: &str,
    account: Option<&str>,
    statement: Option<&str>,
    output: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{Write, stdout};

    let exporter = Exporter::new(service);

    // Determine output writer
    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match export_type {
        "transactions" => {
            let reference = account.context("--account is required for transactions export")?;
            let account = resolve_account(service, reference).await?;
            let count = exporter.export_transactions_csv(account.id, writer).await?;
            if output.is_some() {
                eprintln!("Exported {} transactions", count);
            }
        }
        "accounts" => {
            let count = exporter.export_accounts_csv(writer).await?;
            if output.is_some() {
                eprintln!("Exported {} accounts", count);
            }
        }
        "statement" => {
            let number = statement.context("--statement is required for statement export")?;
            let statement = service.get_statement(number).await?;
            exporter.export_statement_csv(&statement, writer)?;
            if output.is_some() {
                eprintln!("Exported statement {}", statement.statement_number);
            }
        }
        _ => {
            anyhow::bail!(
                "Invalid export type '{}'. Valid types: transactions, accounts, statement",
                export_type
            );
        }
    }

    Ok(())
}

/// Accept either a 10-digit account number or an account UUID.
async fn resolve_account(service: &Service, reference: &str) -> Result<Account> {
    let account = match Uuid::parse_str(reference) {
        Ok(id) => service.get_account(id).await?,
        Err(_) => service.find_account_by_number(reference).await?,
    };
    Ok(account)
}

fn parse_amount(input: &str, currency: Currency) -> Result<Money> {
    Money::parse(input, currency).context("Invalid amount format. Use '50.00' or '50'")
}

fn parse_date(date_str: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .with_context(|| format!("Invalid date format '{}'. Use YYYY-MM-DD", date_str))
}

async fn print_posted(
    verb: &str,
    tx: &Transaction,
    service: &Service,
    account_id: Uuid,
) -> Result<()> {
    let snapshot = service.snapshot(account_id).await?;
    println!(
        "{} {} ({}). Balance: {}, available: {}",
        verb, tx.amount, tx.id, snapshot.balance, snapshot.available_balance
    );
    Ok(())
}

fn print_account(account: &Account, transaction_count: u64) {
    println!("Account:          {}", account.account_number);
    println!("ID:               {}", account.id);
    println!("Routing:          {}", account.routing_number);
    println!("Type:             {}", account.account_type);
    println!("Status:           {}", account.status);
    println!("Balance:          {}", account.balance);
    println!("Available:        {}", account.available_balance);
    println!("Withdrawal limit: {} per day", account.daily_withdrawal_limit);
    println!("Transfer limit:   {} per day", account.daily_transfer_limit);
    if account.overdraft_protected {
        println!("Overdraft:        {}", account.overdraft_limit);
    }
    println!(
        "Opened:           {}",
        account.created_at.format("%Y-%m-%d %H:%M:%S UTC")
    );
    if let Some(at) = account.last_activity {
        println!("Last activity:    {}", at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("Transactions:     {}", transaction_count);
}

fn print_transaction(tx: &Transaction) {
    println!("Transaction: {}", tx.id);
    println!("Sequence:    {}", tx.sequence);
    println!("Kind:        {}", tx.kind());
    println!("Status:      {}", tx.status);
    match tx.movement.route() {
        Some(route) => {
            println!("From:        {}", route.from());
            println!("To:          {}", route.to());
        }
        None => println!("Account:     {}", tx.movement.primary_account()),
    }
    println!("Amount:      {}", tx.amount);
    if !tx.fee.is_zero() {
        println!("Fee:         {}", tx.fee);
    }
    println!(
        "Created:     {}",
        tx.created_at.format("%Y-%m-%d %H:%M:%S%.6f UTC")
    );
    if let Some(description) = &tx.description {
        println!("Description: {}", description);
    }
    if let Some(reference) = &tx.reference {
        println!("Reference:   {}", reference);
    }
    if let Some(original) = &tx.reverses {
        println!("Reverses:    {}", original);
    }
}

fn print_statement(service: &Service, statement: &Statement, format: &str) -> Result<()> {
    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(statement)?);
        }
        "csv" => {
            crate::io::Exporter::new(service).export_statement_csv(statement, std::io::stdout())?;
        }
        "table" => {
            let row = |label: &str, amount: Money| {
                println!("  {:<20} {:>14}", label, format_cents(amount.cents()));
            };
            println!("Statement {}", statement.statement_number);
            println!(
                "Account {}  {} to {} ({})",
                statement.account_number,
                statement.period.start_date,
                statement.period.end_date,
                statement.currency
            );
            println!();
            row("Opening balance", statement.opening_balance);
            row("Deposits", statement.total_deposits);
            row("Withdrawals", statement.total_withdrawals);
            row("Transfers in", statement.total_transfers_in);
            row("Transfers out", statement.total_transfers_out);
            row("Fees", statement.total_fees);
            row("Interest", statement.total_interest);
            println!("  {}", "-".repeat(35));
            row("Net change", statement.net_change);
            row("Closing balance", statement.closing_balance);
            println!();
            println!(
                "{} transactions ({} deposits, {} withdrawals)",
                statement.transaction_count, statement.deposits_count, statement.withdrawals_count
            );
        }
        other => anyhow::bail!("Invalid format '{}'. Valid formats: table, json, csv", other),
    }
    Ok(())
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("groceries", 30), "groceries");
        assert_eq!(truncate("abcdefghij", 8), "abcde...");
    }

    #[test]
    fn test_parse_args() {
        let cli = Cli::try_parse_from([
            "tally",
            "--database",
            "bank.db",
            "transfer",
            "50.00",
            "--from",
            "0000000001",
            "--to",
            "0000000002",
        ])
        .unwrap();
        assert_eq!(cli.database, "bank.db");
        assert!(matches!(cli.command, Commands::Transfer { ref amount, .. } if amount == "50.00"));

        let cli = Cli::try_parse_from([
            "tally",
            "statement",
            "generate",
            "0000000001",
            "--from",
            "2024-01-01",
            "--to",
            "2024-02-01",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Statement(StatementCommands::Generate { .. })
        ));
    }
}
