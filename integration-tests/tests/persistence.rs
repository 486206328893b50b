#![allow(non_snake_case)]

use integration_tests::TestContext;
use ledger_backend::sled_storage::SledUserStore;
use miniapp_ledger::{
    RestUserStore,
    Session,
    SessionStatus,
    test_helpers::query_payload,
};
use serde_json::json;
use tempdir::TempDir;

#[tokio::test]
async fn session__balance_survives_backend_restart() {
    let temp_dir = TempDir::new("ledger_backend_restart").unwrap();
    let ctx = TestContext::with_store(SledUserStore::open(temp_dir.path()).unwrap());
    let payload = query_payload(&json!({"id": 8, "username": "keeper"}), &[]);

    // given
    let session = ctx.session();
    session.start(&payload).await;
    session.add_to_balance(30).await.unwrap();
    session.add_to_balance(12).await.unwrap();
    drop(session);

    // when
    let ctx = ctx.restart();
    let status = ctx.session().start(&payload).await;

    // then
    match status {
        SessionStatus::Ready { user, balance } => {
            assert_eq!(balance, 42);
            assert_eq!(user.profile.username.as_deref(), Some("keeper"));
        }
        other => panic!("expected ready session, got {other:?}"),
    }
}

#[tokio::test]
async fn session__backend_gone_degrades_as_retryable() {
    let temp_dir = TempDir::new("ledger_backend_down").unwrap();
    let ctx = TestContext::with_store(SledUserStore::open(temp_dir.path()).unwrap());
    let payload = query_payload(&json!({"id": 8}), &[]);
    ctx.session().start(&payload).await;

    // when
    let config = ctx.config();
    drop(ctx);
    let session = Session::new(RestUserStore::new(&config).unwrap());
    let status = session.start(&payload).await;

    // then
    assert!(matches!(
        status,
        SessionStatus::Degraded {
            retryable: true,
            ..
        }
    ));
    assert_eq!(session.ledger().balance(), None);
}
