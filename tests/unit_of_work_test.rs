//! Lifecycle tests for the unit of work.
//!
//! Every scenario runs against the scripted connection double and ends by
//! checking that no session or pooled connection leaked.

use std::time::Duration;

use ledger_service::infra::db::testing::{settle, ScriptedConnector};
use ledger_service::infra::{DbError, PoolOptions, SessionState, Statement, UnitOfWorkFactory};

fn factory(connector: &ScriptedConnector, options: PoolOptions) -> UnitOfWorkFactory {
    UnitOfWorkFactory::new(connector.provider(options))
}

async fn assert_no_leaks(uow: &UnitOfWorkFactory) {
    let status = settle(uow.provider()).await;
    assert_eq!(status.in_use, 0, "pooled connection leaked: {:?}", status);
    assert_eq!(uow.active_sessions(), 0, "session leaked");
}

// =============================================================================
// Commit / rollback outcomes
// =============================================================================

#[tokio::test]
async fn test_success_commits_once_and_releases() {
    let connector = ScriptedConnector::new();
    let uow = factory(&connector, PoolOptions::new(1));

    let written = uow
        .transaction(|session| {
            Box::pin(async move {
                session
                    .execute(Statement::new("UPDATE accounts SET balance = 0"))
                    .await?;
                Ok::<_, DbError>(session.pending_writes())
            })
        })
        .await
        .unwrap();

    assert_eq!(written, 1);
    assert_eq!(connector.begins(), 1);
    assert_eq!(connector.commits(), 1);
    assert_eq!(connector.rollbacks(), 0);

    assert_no_leaks(&uow).await;
    assert_eq!(uow.provider().status().idle, 1);
    assert_eq!(uow.provider().status().released_total, 1);
}

#[tokio::test]
async fn test_error_rolls_back_without_commit() {
    let connector = ScriptedConnector::new();
    let uow = factory(&connector, PoolOptions::new(1));

    let result: Result<(), DbError> = uow
        .transaction(|session| {
            Box::pin(async move {
                session
                    .execute(Statement::new("UPDATE accounts SET balance = 0"))
                    .await?;
                Err(DbError::RowNotFound)
            })
        })
        .await;

    assert!(matches!(result, Err(DbError::RowNotFound)));
    assert_eq!(connector.commits(), 0);
    assert_eq!(connector.rollbacks(), 1);
    assert_no_leaks(&uow).await;
    assert_eq!(uow.provider().status().idle, 1);
}

#[tokio::test]
async fn test_failed_statement_prevents_commit() {
    let connector = ScriptedConnector::new();
    connector.push_error(DbError::query("deadlock detected"));
    let uow = factory(&connector, PoolOptions::new(1));

    // The closure swallows the error, but the session remembers it.
    let result: Result<(), DbError> = uow
        .transaction(|session| {
            Box::pin(async move {
                let _ = session.execute(Statement::new("UPDATE accounts SET balance = 0")).await;
                Ok(())
            })
        })
        .await;

    assert!(matches!(result, Err(DbError::StaleState(_))));
    assert_eq!(connector.commits(), 0);
    assert_eq!(connector.rollbacks(), 1);
    assert_no_leaks(&uow).await;
}

#[tokio::test]
async fn test_commit_failure_is_returned_and_connection_reset() {
    let connector = ScriptedConnector::new();
    connector.fail_next_commit(DbError::stale("could not serialize access"));
    let uow = factory(&connector, PoolOptions::new(1));

    let result = uow
        .transaction_serializable(|session| {
            Box::pin(async move {
                session
                    .execute(Statement::new("INSERT INTO transfers DEFAULT VALUES"))
                    .await?;
                Ok::<_, DbError>(())
            })
        })
        .await;

    assert!(matches!(result, Err(DbError::StaleState(_))));
    assert_no_leaks(&uow).await;
    // The connection still had a transaction open, so it was reset on return.
    assert_eq!(connector.rollbacks(), 1);

    uow.transaction(|_| Box::pin(async { Ok::<_, DbError>(()) }))
        .await
        .unwrap();
    assert_eq!(connector.connections_opened(), 1);
}

#[tokio::test]
async fn test_rollback_is_idempotent() {
    let connector = ScriptedConnector::new();
    let uow = factory(&connector, PoolOptions::new(1));

    let mut session = uow.begin().await.unwrap();
    session.rollback().await;
    session.rollback().await;
    assert_eq!(session.state(), SessionState::RolledBack);
    assert!(session.commit().await.is_err());
    session.close().await;

    assert_eq!(connector.rollbacks(), 1);
    assert_eq!(connector.commits(), 0);
    assert_no_leaks(&uow).await;
}

// =============================================================================
// Cancellation and panics
// =============================================================================

#[tokio::test]
async fn test_timeout_cancellation_rolls_back_before_reuse() {
    let connector = ScriptedConnector::new();
    connector.set_latency(Duration::from_millis(500));
    let uow = factory(&connector, PoolOptions::new(1));

    let cancelled = tokio::time::timeout(
        Duration::from_millis(20),
        uow.transaction(|session| {
            Box::pin(async move {
                session
                    .execute(Statement::new("UPDATE accounts SET balance = 0"))
                    .await?;
                Ok::<_, DbError>(())
            })
        }),
    )
    .await;

    assert!(cancelled.is_err());
    assert_no_leaks(&uow).await;
    assert_eq!(connector.commits(), 0);
    assert_eq!(connector.rollbacks(), 1);

    // The next borrower gets the same physical connection, already reset.
    let mut session = uow.begin().await.unwrap();
    assert_eq!(connector.connections_opened(), 1);
    session.commit().await.unwrap();
    session.close().await;
    assert_no_leaks(&uow).await;
}

#[tokio::test]
async fn test_aborted_task_rolls_back() {
    let connector = ScriptedConnector::new();
    connector.set_latency(Duration::from_millis(500));
    let uow = factory(&connector, PoolOptions::new(1));

    let worker = uow.clone();
    let handle = tokio::spawn(async move {
        worker
            .transaction(|session| {
                Box::pin(async move {
                    session
                        .execute(Statement::new("DELETE FROM transfers"))
                        .await?;
                    Ok::<_, DbError>(())
                })
            })
            .await
    });

    // Wait until the statement is in flight.
    while connector.statements().is_empty() {
        tokio::task::yield_now().await;
    }
    handle.abort();
    assert!(handle.await.unwrap_err().is_cancelled());

    assert_no_leaks(&uow).await;
    assert_eq!(connector.commits(), 0);
    assert_eq!(connector.rollbacks(), 1);
}

#[tokio::test]
async fn test_panic_in_task_rolls_back() {
    let connector = ScriptedConnector::new();
    let uow = factory(&connector, PoolOptions::new(1));

    let worker = uow.clone();
    let handle = tokio::spawn(async move {
        worker
            .transaction(|session| {
                Box::pin(async move {
                    session
                        .execute(Statement::new("UPDATE accounts SET balance = 0"))
                        .await?;
                    if session.pending_writes() > 0 {
                        panic!("handler bug");
                    }
                    Ok::<_, DbError>(())
                })
            })
            .await
    });

    assert!(handle.await.unwrap_err().is_panic());
    assert_no_leaks(&uow).await;
    assert_eq!(connector.commits(), 0);
    assert_eq!(connector.rollbacks(), 1);
}

// =============================================================================
// Pool capacity
// =============================================================================

#[tokio::test]
async fn test_extra_caller_waits_for_a_connection() {
    let connector = ScriptedConnector::new();
    connector.set_latency(Duration::from_millis(30));
    let uow = factory(&connector, PoolOptions::new(2));

    let run = |label: &'static str| {
        let uow = uow.clone();
        async move {
            uow.transaction(move |session| {
                Box::pin(async move {
                    session
                        .execute(Statement::new(format!("UPDATE t SET v = '{label}'")))
                        .await?;
                    Ok::<_, DbError>(label)
                })
            })
            .await
        }
    };

    let (a, b, c) = tokio::join!(run("a"), run("b"), run("c"));

    assert_eq!(a.unwrap(), "a");
    assert_eq!(b.unwrap(), "b");
    assert_eq!(c.unwrap(), "c");
    assert_eq!(connector.connections_opened(), 2);
    assert_eq!(connector.commits(), 3);
    assert_no_leaks(&uow).await;
    assert_eq!(uow.provider().status().idle, 2);
}

#[tokio::test]
async fn test_extra_caller_times_out_with_pool_exhausted() {
    let connector = ScriptedConnector::new();
    let uow = factory(
        &connector,
        PoolOptions::new(1).acquire_timeout(Duration::from_millis(20)),
    );

    let held = uow.begin().await.unwrap();

    let result = uow
        .transaction(|_| Box::pin(async { Ok::<_, DbError>(()) }))
        .await;
    assert!(matches!(result, Err(DbError::PoolExhausted { .. })));
    assert_eq!(uow.provider().status().timeouts_total, 1);
    assert_eq!(connector.begins(), 1);

    held.close().await;
    assert_no_leaks(&uow).await;

    uow.transaction(|_| Box::pin(async { Ok::<_, DbError>(()) }))
        .await
        .unwrap();
    assert_no_leaks(&uow).await;
}

#[tokio::test]
async fn test_closed_pool_rejects_new_units_of_work() {
    let connector = ScriptedConnector::new();
    let uow = factory(&connector, PoolOptions::new(1));

    uow.provider().close().await;
    let result = uow
        .transaction(|_| Box::pin(async { Ok::<_, DbError>(()) }))
        .await;

    assert!(matches!(result, Err(DbError::PoolClosed)));
    assert_eq!(connector.begins(), 0);
    assert_no_leaks(&uow).await;
}
