#![allow(non_snake_case)]

use integration_tests::TestContext;
use miniapp_ledger::{
    Referral,
    ReferralStore,
    SessionStatus,
    UserProfile,
    UserStore,
    test_helpers::query_payload,
};
use serde_json::json;

#[tokio::test]
async fn session__invite_link_credits_referrer_once() {
    let ctx = TestContext::new();

    // given
    let referrer = ctx.session();
    referrer
        .start(&query_payload(&json!({"id": 1, "username": "host"}), &[]))
        .await;
    let link = referrer.invite_link("@ledger_bot", "play").unwrap();
    let friend_payload = query_payload(
        &json!({"id": 2, "first_name": "Bo"}),
        &[("start_param", link.start_param().as_str())],
    );

    // when
    let first = ctx.session().start(&friend_payload).await;
    let second = ctx.session().start(&friend_payload).await;

    // then
    assert!(matches!(first, SessionStatus::Ready { balance: 0, .. }));
    assert!(matches!(second, SessionStatus::Ready { .. }));
    let referrals = referrer.referrals().await.unwrap();
    assert_eq!(referrals.len(), 1);
    assert_eq!(referrals[0].telegram_id, "2");
    assert_eq!(referrals[0].first_name.as_deref(), Some("Bo"));
}

#[tokio::test]
async fn referrals__only_the_first_referrer_is_kept() {
    let ctx = TestContext::new();
    let friend = UserProfile::new("2");

    // given
    ctx.client()
        .record_referral(&Referral::new("1", &friend))
        .await
        .unwrap();

    // when
    let again = ctx
        .client()
        .record_referral(&Referral::new("3", &friend))
        .await
        .unwrap();

    // then
    assert!(!again);
    assert_eq!(ctx.client().referrals_of("1").await.unwrap().len(), 1);
    assert!(ctx.client().referrals_of("3").await.unwrap().is_empty());
}

#[tokio::test]
async fn leaderboard__orders_by_balance_and_honors_limit() {
    let ctx = TestContext::new();

    // given
    for (id, name, balance) in [("1", "low", 5), ("2", "high", 90), ("3", "mid", 40)] {
        ctx.client()
            .upsert_user(&UserProfile::new(id).with_username(name))
            .await
            .unwrap();
        ctx.client().add_to_balance(id, balance).await.unwrap();
    }

    // when
    let top = ctx.session().leaderboard(2).await.unwrap();

    // then
    let names: Vec<_> = top
        .iter()
        .map(|entry| entry.username.as_deref().unwrap())
        .collect();
    assert_eq!(names, ["high", "mid"]);
    assert_eq!(top[0].balance, 90);
}
