mod common;

use anyhow::Result;
use chrono::Duration;
use common::{memory_service, open_funded, usd};
use tally::application::{LedgerError, OpenAccount};
use tally::domain::{
    AccountStatus, AccountType, Currency, Money, Movement, TransactionId, TransactionKind,
    TransactionStatus,
};
use uuid::Uuid;

#[tokio::test]
async fn test_withdrawals_stop_at_available_balance() -> Result<()> {
    let (service, _clock) = memory_service();
    let account = open_funded(&service, 10_000).await?;

    service.withdraw(account.id, usd(4_000), None, None).await?;
    assert_eq!(service.snapshot(account.id).await?.balance, usd(6_000));

    service.withdraw(account.id, usd(4_000), None, None).await?;
    assert_eq!(service.snapshot(account.id).await?.balance, usd(2_000));

    let err = service
        .withdraw(account.id, usd(4_000), None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientFunds { available, requested, .. }
            if available == usd(2_000) && requested == usd(4_000)
    ));

    let snapshot = service.snapshot(account.id).await?;
    assert_eq!(snapshot.balance, usd(2_000));
    assert_eq!(snapshot.available_balance, usd(2_000));
    // Initial deposit plus the two accepted withdrawals
    assert_eq!(service.count_transactions(account.id).await?, 3);

    Ok(())
}

#[tokio::test]
async fn test_transfer_moves_funds_as_one_record() -> Result<()> {
    let (service, _clock) = memory_service();
    let a = open_funded(&service, 10_000).await?;
    let b = open_funded(&service, 0).await?;

    let tx = service
        .transfer(a.id, b.id, usd(5_000), Some("rent share".into()), Some("REF-1".into()))
        .await?;

    assert_eq!(service.snapshot(a.id).await?.balance, usd(5_000));
    assert_eq!(service.snapshot(b.id).await?.balance, usd(5_000));

    assert_eq!(tx.status, TransactionStatus::Completed);
    assert_eq!(tx.kind(), TransactionKind::Transfer);
    let route = tx.movement.route().unwrap();
    assert_eq!(route.from(), a.id);
    assert_eq!(route.to(), b.id);

    let from_side = service.list_transactions(a.id, 0, 10).await?;
    let to_side = service.list_transactions(b.id, 0, 10).await?;
    assert_eq!(from_side[0].id, tx.id);
    assert_eq!(to_side.len(), 1);
    assert_eq!(to_side[0].id, tx.id);
    assert_eq!(service.get_transaction(&tx.id).await?, tx);

    Ok(())
}

#[tokio::test]
async fn test_rejected_requests_leave_no_record() -> Result<()> {
    let (service, _clock) = memory_service();
    let a = open_funded(&service, 10_000).await?;
    let b = open_funded(&service, 0).await?;

    let err = service
        .transfer(a.id, a.id, usd(100), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::SelfTransfer(id) if id == a.id));

    for amount in [usd(0), usd(-500)] {
        let err = service.deposit(a.id, amount, None, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
        let err = service.withdraw(a.id, amount, None, None).await.unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
        let err = service
            .transfer(a.id, b.id, amount, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
    }

    let euros = Money::new(100, Currency::EUR);
    let err = service.deposit(a.id, euros, None, None).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount(_)));

    let err = service
        .transfer(a.id, b.id, usd(50_000), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

    assert_eq!(service.count_transactions(a.id).await?, 1);
    assert_eq!(service.count_transactions(b.id).await?, 0);
    assert_eq!(service.snapshot(a.id).await?.balance, usd(10_000));
    assert_eq!(service.snapshot(b.id).await?.balance, usd(0));

    Ok(())
}

#[tokio::test]
async fn test_unknown_ids() -> Result<()> {
    let (service, _clock) = memory_service();
    let a = open_funded(&service, 1_000).await?;
    let ghost = Uuid::new_v4();

    let err = service.deposit(ghost, usd(100), None, None).await.unwrap_err();
    assert!(matches!(err, LedgerError::AccountNotFound(_)));

    let err = service
        .transfer(a.id, ghost, usd(100), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AccountNotFound(_)));

    let missing = TransactionId::from("TXN000000000000");
    let err = service.get_transaction(&missing).await.unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(id) if id == missing));

    let err = service.find_account_by_number("not-a-number").await.unwrap_err();
    assert!(matches!(err, LedgerError::AccountNotFound(_)));

    Ok(())
}

#[tokio::test]
async fn test_daily_withdrawal_limit_resets_next_day() -> Result<()> {
    let (service, clock) = memory_service();
    let account = open_funded(&service, 500_000).await?;

    // Default limit is 1,000.00; reaching it exactly is allowed
    service.withdraw(account.id, usd(60_000), None, None).await?;
    service.withdraw(account.id, usd(40_000), None, None).await?;

    let err = service
        .withdraw(account.id, usd(1), None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::DailyLimitExceeded {
            kind: TransactionKind::Withdrawal,
            limit,
            used,
            requested,
            ..
        } if limit == usd(100_000) && used == usd(100_000) && requested == usd(1)
    ));

    // Deposits and fees are never limited
    service.deposit(account.id, usd(500_000), None, None).await?;
    service.charge_fee(account.id, usd(2_500), None).await?;

    clock.advance(Duration::days(1));
    service.withdraw(account.id, usd(50_000), None, None).await?;
    assert_eq!(
        service.snapshot(account.id).await?.balance,
        usd(500_000 - 100_000 + 500_000 - 2_500 - 50_000)
    );

    Ok(())
}

#[tokio::test]
async fn test_daily_transfer_limit_is_per_source_account() -> Result<()> {
    let (service, _clock) = memory_service();
    let request = OpenAccount::new(AccountType::Checking)
        .initial_deposit(usd(100_000))
        .limits(usd(100_000), usd(10_000));
    let a = service.open_account(request).await?;
    let b = open_funded(&service, 100_000).await?;

    service.transfer(a.id, b.id, usd(10_000), None, None).await?;
    let err = service
        .transfer(a.id, b.id, usd(1), None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::DailyLimitExceeded { kind: TransactionKind::Transfer, .. }
    ));

    // Transfer limits do not consume the withdrawal allowance
    service.withdraw(a.id, usd(50_000), None, None).await?;
    // The receiving side has its own allowance
    service.transfer(b.id, a.id, usd(10_000), None, None).await?;

    Ok(())
}

#[tokio::test]
async fn test_overdraft_protected_account() -> Result<()> {
    let (service, _clock) = memory_service();
    let request = OpenAccount::new(AccountType::Business).overdraft(usd(5_000));
    let account = service.open_account(request).await?;

    service.withdraw(account.id, usd(5_000), None, None).await?;
    assert_eq!(service.snapshot(account.id).await?.balance, usd(-5_000));

    let err = service
        .withdraw(account.id, usd(1), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

    let report = service.check_integrity().await?;
    assert!(report.is_healthy());

    Ok(())
}

#[tokio::test]
async fn test_status_transitions_gate_movements() -> Result<()> {
    let (service, _clock) = memory_service();
    let a = open_funded(&service, 10_000).await?;
    let b = open_funded(&service, 10_000).await?;

    service.set_status(a.id, AccountStatus::Suspended).await?;
    let err = service.deposit(a.id, usd(100), None, None).await.unwrap_err();
    assert!(matches!(
        err,
        LedgerError::AccountNotActive { status: AccountStatus::Suspended, .. }
    ));
    let err = service
        .transfer(b.id, a.id, usd(100), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AccountNotActive { account, .. } if account == a.id));

    service.set_status(a.id, AccountStatus::Active).await?;
    service.deposit(a.id, usd(100), None, None).await?;

    let closed = service.close_account(a.id).await?;
    assert_eq!(closed.status, AccountStatus::Closed);
    let err = service
        .set_status(a.id, AccountStatus::Active)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InvalidStatusTransition { from: AccountStatus::Closed, .. }
    ));
    let err = service.withdraw(a.id, usd(100), None, None).await.unwrap_err();
    assert!(matches!(err, LedgerError::AccountNotActive { .. }));

    Ok(())
}

#[tokio::test]
async fn test_reversal_compensates_once() -> Result<()> {
    let (service, _clock) = memory_service();
    let account = open_funded(&service, 10_000).await?;

    let withdrawal = service
        .withdraw(account.id, usd(3_000), Some("ATM".into()), None)
        .await?;
    let reversal = service.reverse_transaction(&withdrawal.id).await?;

    assert_eq!(reversal.reverses.as_ref(), Some(&withdrawal.id));
    assert_eq!(reversal.description.as_deref(), Some("Reversal of: ATM"));
    assert_eq!(reversal.movement, withdrawal.movement);
    assert_eq!(service.snapshot(account.id).await?.balance, usd(10_000));

    // The original stays in the log untouched
    let original = service.get_transaction(&withdrawal.id).await?;
    assert_eq!(original.status, TransactionStatus::Completed);

    let err = service
        .reverse_transaction(&withdrawal.id)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::AlreadyReversed { reversal: ref id, .. } if *id == reversal.id
    ));

    let err = service.reverse_transaction(&reversal.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::NotReversible(..)));

    assert!(service.check_integrity().await?.is_healthy());
    Ok(())
}

#[tokio::test]
async fn test_reversing_transfer_and_deposit() -> Result<()> {
    let (service, _clock) = memory_service();
    let a = open_funded(&service, 10_000).await?;
    let b = open_funded(&service, 0).await?;

    let transfer = service.transfer(a.id, b.id, usd(4_000), None, None).await?;
    service.withdraw(b.id, usd(3_000), None, None).await?;

    // B only holds 10.00 now, so the transfer cannot be pulled back
    let err = service.reverse_transaction(&transfer.id).await.unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { account, .. } if account == b.id));

    service.deposit(b.id, usd(3_000), None, None).await?;
    service.reverse_transaction(&transfer.id).await?;
    assert_eq!(service.snapshot(a.id).await?.balance, usd(10_000));
    assert_eq!(service.snapshot(b.id).await?.balance, usd(0));

    let deposit = service.deposit(a.id, usd(1_500), None, None).await?;
    let reversal = service.reverse_transaction(&deposit.id).await?;
    assert!(matches!(reversal.movement, Movement::Deposit { account } if account == a.id));
    assert_eq!(service.snapshot(a.id).await?.balance, usd(10_000));

    Ok(())
}

#[tokio::test]
async fn test_reversal_does_not_restore_limit_headroom() -> Result<()> {
    let (service, _clock) = memory_service();
    let account = open_funded(&service, 500_000).await?;

    let withdrawal = service.withdraw(account.id, usd(100_000), None, None).await?;
    service.reverse_transaction(&withdrawal.id).await?;

    let err = service
        .withdraw(account.id, usd(1), None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::DailyLimitExceeded { .. }));

    Ok(())
}

#[tokio::test]
async fn test_fee_is_a_debit() -> Result<()> {
    let (service, _clock) = memory_service();
    let request = OpenAccount::new(AccountType::Savings)
        .initial_deposit(usd(1_000))
        .limits(usd(0), usd(0));
    let account = service.open_account(request).await?;

    let fee = service
        .charge_fee(account.id, usd(250), Some("Monthly maintenance".into()))
        .await?;
    assert_eq!(fee.kind(), TransactionKind::Fee);
    assert_eq!(service.snapshot(account.id).await?.balance, usd(750));

    let err = service.charge_fee(account.id, usd(800), None).await.unwrap_err();
    assert!(matches!(err, LedgerError::InsufficientFunds { .. }));

    Ok(())
}

#[tokio::test]
async fn test_open_account_defaults() -> Result<()> {
    let (service, _clock) = memory_service();
    let account = open_funded(&service, 2_500).await?;

    assert_eq!(account.account_number.len(), 10);
    assert!(account.account_number.bytes().all(|b| b.is_ascii_digit()));
    assert_eq!(account.routing_number, "021000021");
    assert_eq!(account.status, AccountStatus::Active);
    assert_eq!(account.daily_withdrawal_limit, usd(100_000));
    assert_eq!(account.daily_transfer_limit, usd(1_000_000));
    assert_eq!(account.balance, usd(2_500));

    let found = service.find_account_by_number(&account.account_number).await?;
    assert_eq!(found.id, account.id);

    let history = service.list_transactions(account.id, 0, 10).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].kind(), TransactionKind::Deposit);
    assert_eq!(history[0].description.as_deref(), Some("Initial deposit"));

    let err = service
        .open_account(OpenAccount::new(AccountType::Checking).initial_deposit(usd(-1)))
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount(_)));
    assert_eq!(service.list_accounts().await?.len(), 1);

    Ok(())
}

#[tokio::test]
async fn test_snapshot_is_idempotent() -> Result<()> {
    let (service, _clock) = memory_service();
    let account = open_funded(&service, 7_000).await?;

    let first = service.snapshot(account.id).await?;
    let second = service.snapshot(account.id).await?;
    assert_eq!(first, second);
    assert_eq!(first.balance, first.available_balance);

    Ok(())
}

#[tokio::test]
async fn test_transaction_pages_newest_first() -> Result<()> {
    let (service, _clock) = memory_service();
    let account = open_funded(&service, 0).await?;

    let mut posted = Vec::new();
    for cents in 1..=5 {
        posted.push(service.deposit(account.id, usd(cents * 100), None, None).await?);
    }

    let mut cursor = service.transactions(account.id, 2);
    let mut seen = Vec::new();
    let mut sizes = Vec::new();
    while let Some(page) = cursor.next_page().await? {
        sizes.push(page.len());
        seen.extend(page);
    }
    assert_eq!(sizes, vec![2, 2, 1]);
    assert!(cursor.next_page().await?.is_none());

    let expected: Vec<_> = posted.iter().rev().map(|tx| tx.id.clone()).collect();
    let actual: Vec<_> = seen.iter().map(|tx| tx.id.clone()).collect();
    assert_eq!(actual, expected);
    assert!(seen.windows(2).all(|w| w[0].sequence > w[1].sequence));

    cursor.reset();
    let again = cursor.next_page().await?.unwrap();
    assert_eq!(again[0].id, posted[4].id);

    assert!(service.list_transactions(account.id, 10, 5).await?.is_empty());

    Ok(())
}

#[tokio::test]
async fn test_cursor_does_not_repeat_after_new_commits() -> Result<()> {
    let (service, _clock) = memory_service();
    let account = open_funded(&service, 100).await?;
    let other = open_funded(&service, 10_000).await?;
    // Same instant throughout, so only the sequence orders them
    service.deposit(account.id, usd(200), None, None).await?;
    service.deposit(account.id, usd(300), None, None).await?;

    let mut cursor = service.transactions(account.id, 1);
    let first = cursor.next_page().await?.unwrap();
    assert_eq!(first[0].amount, usd(300));

    service.deposit(account.id, usd(400), None, None).await?;
    service
        .transfer(other.id, account.id, usd(500), None, None)
        .await?;

    let second = cursor.next_page().await?.unwrap();
    assert_eq!(second.len(), 1);
    assert_ne!(second[0].id, first[0].id);
    assert_eq!(second[0].amount, usd(200));

    let third = cursor.next_page().await?.unwrap();
    assert_eq!(third[0].amount, usd(100));
    assert!(cursor.next_page().await?.is_none());
    assert_eq!(service.count_transactions(account.id).await?, 5);

    Ok(())
}
