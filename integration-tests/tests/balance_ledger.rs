#![allow(non_snake_case)]

use integration_tests::{
    TestContext,
    unreachable_backend,
};
use miniapp_ledger::{
    BackendError,
    BalanceLedger,
    BalancePhase,
    Error,
    RestUserStore,
    UserProfile,
    UserStore,
};
use proptest::prelude::*;
use tokio::runtime::{
    Builder,
    Runtime,
};

fn runtime() -> Runtime {
    Builder::new_current_thread().enable_all().build().unwrap()
}

async fn seeded(ctx: &TestContext, telegram_id: &str, balance: i64) {
    ctx.backing()
        .upsert_user(&UserProfile::new(telegram_id))
        .await
        .unwrap();
    if balance != 0 {
        ctx.backing()
            .add_to_balance(telegram_id, balance)
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn increment__commits_the_server_balance() {
    let ctx = TestContext::new();
    seeded(&ctx, "1", 100).await;
    let ledger = BalanceLedger::new(ctx.client());
    ledger.load("1").await.unwrap();

    // when
    let balance = ledger.increment("1", 50).await.unwrap();

    // then
    assert_eq!(balance, 150);
    assert_eq!(ledger.state().phase, BalancePhase::Committed { server: 150 });
    let stored = ctx.backing().find_user("1").await.unwrap().unwrap();
    assert_eq!(stored.balance, 150);
}

#[tokio::test]
async fn increment__settles_on_server_value_when_another_session_wrote() {
    let ctx = TestContext::new();
    seeded(&ctx, "1", 100).await;
    let ledger = BalanceLedger::new(ctx.client());
    ledger.load("1").await.unwrap();

    // given
    ctx.client().add_to_balance("1", 25).await.unwrap();

    // when
    let balance = ledger.increment("1", 50).await.unwrap();

    // then
    assert_eq!(balance, 175);
    assert_eq!(ledger.balance(), Some(175));
}

#[tokio::test]
async fn increment__below_zero_is_refused_and_rolled_back() {
    let ctx = TestContext::new();
    seeded(&ctx, "1", 10).await;
    let ledger = BalanceLedger::new(ctx.client());
    ledger.load("1").await.unwrap();

    // when
    let result = ledger.increment("1", -11).await;

    // then
    assert!(matches!(
        result,
        Err(Error::BackendUnavailable(BackendError::BalanceUnderflow { .. }))
    ));
    assert_eq!(ledger.balance(), Some(10));
    assert!(matches!(
        ledger.state().phase,
        BalancePhase::RolledBack {
            prior: Some(10),
            ..
        }
    ));
    assert_eq!(ctx.backing().find_user("1").await.unwrap().unwrap().balance, 10);
}

#[tokio::test]
async fn load__unknown_user_is_not_found() {
    let ctx = TestContext::new();
    let ledger = BalanceLedger::new(ctx.client());

    // when
    let result = ledger.load("999").await;

    // then
    assert!(matches!(result, Err(Error::UserNotFound(id)) if id == "999"));
    assert_eq!(ledger.balance(), None);
    assert!(ledger.state().last_error.is_some());
}

#[tokio::test]
async fn increment__unreachable_backend_rolls_back_to_prior() {
    // given
    let ledger = BalanceLedger::new(RestUserStore::new(&unreachable_backend()).unwrap());

    // when
    let load = ledger.load("1").await;
    let increment = ledger.increment("1", 5).await;

    // then
    assert!(matches!(
        load,
        Err(Error::BackendUnavailable(BackendError::Transport(_)))
    ));
    assert!(increment.unwrap_err().is_transient());
    assert_eq!(ledger.balance(), None);
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 8, .. ProptestConfig::default() })]
    #[test]
    fn increment__remote_balance_never_goes_negative(
        amounts in proptest::collection::vec(-40i64..=40, 1..12)
    ) {
        let rt = runtime();
        rt.block_on(async {
            let ctx = TestContext::new();
            seeded(&ctx, "1", 0).await;
            let ledger = BalanceLedger::new(ctx.client());
            ledger.load("1").await.unwrap();

            let mut expected = 0i64;
            for amount in amounts {
                let result = ledger.increment("1", amount).await;
                if expected + amount >= 0 {
                    expected += amount;
                    prop_assert_eq!(result.unwrap(), expected);
                } else {
                    prop_assert!(result.is_err());
                }
                prop_assert_eq!(ledger.balance(), Some(expected));
            }
            let stored = ctx.backing().find_user("1").await.unwrap().unwrap();
            prop_assert_eq!(stored.balance, expected);
            Ok(())
        })?;
    }
}
