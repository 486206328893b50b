#![allow(non_snake_case)]

use miniapp_ledger::{
    BalanceLedger,
    IdentityResolver,
    InMemoryUserStore,
    Session,
    SessionStatus,
    UserStore,
    test_helpers::{
        InstrumentedStore,
        json_payload,
        query_payload,
        record,
    },
};
use proptest::prelude::*;
use serde_json::{
    Value,
    json,
};
use tokio::runtime::{
    Builder,
    Runtime,
};

fn runtime() -> Runtime {
    Builder::new_current_thread().enable_all().build().unwrap()
}

prop_compose! {
    fn launch_user()(
        id in 1i64..=9_007_199_254_740_991,
        username in proptest::option::of("[a-z][a-z0-9_]{3,20}"),
        first_name in proptest::option::of("[A-Za-z ]{1,16}"),
        last_name in proptest::option::of("[A-Za-z&=%+]{1,16}"),
        language_code in proptest::option::of("[a-z]{2}"),
        allows_write_to_pm in proptest::option::of(any::<bool>()),
        is_premium in proptest::option::of(any::<bool>()),
    ) -> Value {
        let mut user = json!({ "id": id });
        let fields = [
            ("username", username.map(Value::from)),
            ("first_name", first_name.map(Value::from)),
            ("last_name", last_name.map(Value::from)),
            ("language_code", language_code.map(Value::from)),
            ("allows_write_to_pm", allows_write_to_pm.map(Value::from)),
            ("is_premium", is_premium.map(Value::from)),
        ];
        for (key, value) in fields {
            if let Some(value) = value {
                user[key] = value;
            }
        }
        user
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]
    #[test]
    fn resolve__both_encodings_yield_identical_records(user in launch_user()) {
        let rt = runtime();
        rt.block_on(async {
            let from_query = IdentityResolver::new(InMemoryUserStore::new())
                .resolve(&query_payload(&user, &[("auth_date", "1700000000")]))
                .await
                .unwrap();
            let from_json = IdentityResolver::new(InMemoryUserStore::new())
                .resolve(&json_payload(&user))
                .await
                .unwrap();
            prop_assert_eq!(&from_query, &from_json);
            prop_assert_eq!(from_query.telegram_id(), user["id"].to_string());
            Ok(())
        })?;
    }

    #[test]
    fn increment__cache_matches_store_after_any_mix_of_failures(
        steps in proptest::collection::vec((-30i64..=60, any::<bool>()), 1..20)
    ) {
        let rt = runtime();
        rt.block_on(async {
            let store = InstrumentedStore::new(
                InMemoryUserStore::new_with_users([record("1", "a", 100)]),
            );
            let ledger = BalanceLedger::new(store.clone());
            ledger.load("1").await.unwrap();

            for (amount, fail) in steps {
                store.fail_increments(fail);
                let _ = ledger.increment("1", amount).await;
                let stored = store.inner().find_user("1").await.unwrap().unwrap().balance;
                prop_assert_eq!(ledger.balance(), Some(stored));
                prop_assert!(stored >= 0);
            }
            Ok(())
        })?;
    }
}

#[tokio::test]
async fn resolve__racing_launches_of_one_identity_leave_one_record_latest_wins() {
    // given
    let store = InMemoryUserStore::new();
    let first = IdentityResolver::new(store.clone());
    let second = IdentityResolver::new(store.clone());
    let payload_a = query_payload(&json!({"id": 123, "username": "a"}), &[]);
    let payload_b = query_payload(&json!({"id": 123, "username": "b"}), &[]);

    // when
    let (a, b) = tokio::join!(first.resolve(&payload_a), second.resolve(&payload_b));

    // then
    assert_eq!(a.unwrap().telegram_id(), "123");
    assert_eq!(b.unwrap().telegram_id(), "123");
    assert_eq!(store.user_count().unwrap(), 1);
    let stored = store.find_user("123").await.unwrap().unwrap();
    assert_eq!(stored.profile.username.as_deref(), Some("b"));
}

#[tokio::test]
async fn scenario__relaunch_with_new_username_updates_single_record() {
    // given
    let store = InMemoryUserStore::new();
    let first = IdentityResolver::new(store.clone())
        .resolve(r#"user={"id":123,"username":"a"}"#)
        .await
        .unwrap();

    // when
    let second = IdentityResolver::new(store.clone())
        .resolve(r#"user={"id":123,"username":"b"}"#)
        .await
        .unwrap();

    // then
    assert_eq!(first.telegram_id(), "123");
    assert_eq!(first.profile.username.as_deref(), Some("a"));
    assert_eq!(first.profile.first_name, None);
    assert_eq!(second.profile.username.as_deref(), Some("b"));
    assert_eq!(store.user_count().unwrap(), 1);
}

#[tokio::test]
async fn session__full_launch_then_reward_then_relaunch() {
    // given
    let store = InMemoryUserStore::new();
    let payload = query_payload(&json!({"id": 77, "first_name": "Kim"}), &[]);
    let session = Session::new(store.clone());

    // when
    let first_status = session.start(&payload).await;
    session.add_to_balance(100).await.unwrap();
    session.add_to_balance(50).await.unwrap();
    let relaunch = Session::new(store.clone()).start(&payload).await;

    // then
    assert!(matches!(first_status, SessionStatus::Ready { balance: 0, .. }));
    match relaunch {
        SessionStatus::Ready { user, balance } => {
            assert_eq!(balance, 150);
            assert_eq!(user.profile.first_name.as_deref(), Some("Kim"));
        }
        other => panic!("expected ready session, got {other:?}"),
    }
    let leaderboard = session.leaderboard(10).await.unwrap();
    assert_eq!(leaderboard.len(), 1);
    assert_eq!(leaderboard[0].balance, 150);
}
