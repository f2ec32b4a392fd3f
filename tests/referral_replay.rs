//! Integration tests for the referral replay state machine: the canonical
//! four-event scenario in one batch and split at every boundary, cursor
//! advancement on empty ranges, and owner queries.

use std::collections::BTreeMap;
use std::sync::Arc;

use alloy::primitives::{Address, U256};

use dex_event_indexer::db::create_pool;
use dex_event_indexer::db::models::DecodedEventRow;
use dex_event_indexer::db::repository::Repository;
use dex_event_indexer::deployment::Deployment;
use dex_event_indexer::events::{FieldValue, RawEvent};
use dex_event_indexer::harvester::streams::stream_key;
use dex_event_indexer::referral::ReferralReplayer;

fn owner_a() -> Address {
    Address::repeat_byte(0xAA)
}

fn trader_c() -> Address {
    Address::repeat_byte(0xCC)
}

fn deployment() -> Deployment {
    Deployment::new(
        "testchain",
        "testdex",
        0,
        100,
        4,
        std::collections::HashMap::new(),
    )
}

async fn setup_repo() -> Arc<Repository> {
    let pool = create_pool("sqlite::memory:").await.expect("pool");
    Arc::new(Repository::new(pool))
}

fn referral_row(
    deployment: &Deployment,
    slug: &str,
    block: u64,
    fields: Vec<(&str, FieldValue)>,
) -> DecodedEventRow {
    let fields: BTreeMap<String, FieldValue> = fields
        .into_iter()
        .map(|(name, value)| (name.to_string(), value))
        .collect();

    let raw = RawEvent {
        block_number: block,
        transaction_index: 0,
        transaction_hash: format!("0xtx{slug}{block}"),
        log_index: 0,
        fields: fields.clone(),
    };

    DecodedEventRow::new(
        &deployment.blockchain_type,
        &deployment.exchange_id,
        &stream_key(deployment, slug),
        &raw,
        None,
        &fields,
    )
    .expect("row")
}

/// Seed the canonical scenario: SetTier, SetReferrerTier, RegisterCode,
/// SetTraderReferralCode, in chronological order at blocks 10..=13.
async fn seed_scenario(repo: &Repository, deployment: &Deployment) {
    let rows = vec![
        referral_row(
            deployment,
            "set-tier",
            10,
            vec![
                ("tierId", FieldValue::Uint(2)),
                ("totalRebate", FieldValue::BigUint(U256::from(1_000u64))),
                ("discountShare", FieldValue::BigUint(U256::from(500u64))),
            ],
        ),
        referral_row(
            deployment,
            "set-referrer-tier",
            11,
            vec![
                ("referrer", FieldValue::Addr(owner_a())),
                ("tierId", FieldValue::Uint(2)),
            ],
        ),
        referral_row(
            deployment,
            "register-code",
            12,
            vec![
                ("account", FieldValue::Addr(owner_a())),
                ("code", FieldValue::Str("0xbeef".to_string())),
            ],
        ),
        referral_row(
            deployment,
            "set-trader-referral-code",
            13,
            vec![
                ("account", FieldValue::Addr(trader_c())),
                ("code", FieldValue::Str("0xbeef".to_string())),
            ],
        ),
    ];

    repo.save_event_rows(&rows, 100).await.expect("seeded");
}

async fn assert_canonical_result(replayer: &ReferralReplayer) {
    let info = replayer
        .get_trader_referral_info(trader_c())
        .await
        .expect("query")
        .expect("trader must have a snapshot");

    assert_eq!(info.code, "0xbeef");
    assert_eq!(info.owner, owner_a());
    assert_eq!(info.tier_id, 2);
    assert_eq!(info.total_rebate, U256::from(1_000u64));
    assert_eq!(info.discount_share, U256::from(500u64));
}

#[tokio::test]
async fn canonical_scenario_single_batch() {
    let deployment = deployment();
    let repo = setup_repo().await;
    seed_scenario(&repo, &deployment).await;

    let replayer = ReferralReplayer::new(Arc::clone(&repo), deployment);
    replayer.replay(1, 1_000).await.expect("replay");

    assert_canonical_result(&replayer).await;
}

#[tokio::test]
async fn canonical_scenario_split_at_every_boundary() {
    // Splitting between any two of the four events must yield the identical
    // final mapping, because state is rebuilt from checkpoints at each
    // boundary.
    for boundary in [10u64, 11, 12] {
        let deployment = deployment();
        let repo = setup_repo().await;
        seed_scenario(&repo, &deployment).await;

        let replayer = ReferralReplayer::new(Arc::clone(&repo), deployment);
        replayer.replay(1, boundary).await.expect("first batch");
        replayer
            .replay(boundary + 1, 1_000)
            .await
            .expect("second batch");

        assert_canonical_result(&replayer).await;
    }
}

#[tokio::test]
async fn run_to_is_idempotent() {
    let deployment = deployment();
    let repo = setup_repo().await;
    seed_scenario(&repo, &deployment).await;

    let replayer = ReferralReplayer::new(Arc::clone(&repo), deployment.clone());
    replayer.run_to(2_000).await.expect("first run");
    assert_canonical_result(&replayer).await;

    // A second run over the same range is a no-op and changes nothing.
    replayer.run_to(2_000).await.expect("second run");
    assert_canonical_result(&replayer).await;

    let cursor_key = stream_key(&deployment, "referral-replay");
    assert_eq!(
        repo.get_cursor(&cursor_key).await.expect("cursor"),
        Some(2_000)
    );
}

#[tokio::test]
async fn empty_range_still_advances_cursor() {
    let deployment = deployment();
    let repo = setup_repo().await;

    let replayer = ReferralReplayer::new(Arc::clone(&repo), deployment.clone());
    replayer.run_to(500).await.expect("run");

    let cursor_key = stream_key(&deployment, "referral-replay");
    assert_eq!(
        repo.get_cursor(&cursor_key).await.expect("cursor"),
        Some(500)
    );

    let info = replayer
        .get_trader_referral_info(trader_c())
        .await
        .expect("query");
    assert!(info.is_none());
}

#[tokio::test]
async fn referrals_by_owner_lists_bound_traders() {
    let deployment = deployment();
    let repo = setup_repo().await;
    seed_scenario(&repo, &deployment).await;

    let replayer = ReferralReplayer::new(Arc::clone(&repo), deployment);
    replayer.replay(1, 1_000).await.expect("replay");

    let referrals = replayer
        .get_referrals_by_owner(owner_a())
        .await
        .expect("query");

    assert_eq!(referrals.len(), 1);
    assert_eq!(referrals[0].0, trader_c());
    assert_eq!(referrals[0].1.code, "0xbeef");
    assert_eq!(referrals[0].1.tier_id, 2);

    // An unrelated owner has no referrals.
    let none = replayer
        .get_referrals_by_owner(Address::repeat_byte(0x77))
        .await
        .expect("query");
    assert!(none.is_empty());
}

#[tokio::test]
async fn tier_change_in_later_batch_applies_to_new_bindings_only() {
    // A SetTier in a later batch updates the code's live state through the
    // checkpoint chain; a trader binding in that batch sees the new
    // parameters.
    let deployment = deployment();
    let repo = setup_repo().await;
    seed_scenario(&repo, &deployment).await;

    let late_rows = vec![
        referral_row(
            &deployment,
            "set-tier",
            500,
            vec![
                ("tierId", FieldValue::Uint(2)),
                ("totalRebate", FieldValue::BigUint(U256::from(7_777u64))),
                ("discountShare", FieldValue::BigUint(U256::from(111u64))),
            ],
        ),
        referral_row(
            &deployment,
            "set-trader-referral-code",
            501,
            vec![
                ("account", FieldValue::Addr(Address::repeat_byte(0xDD))),
                ("code", FieldValue::Str("0xbeef".to_string())),
            ],
        ),
    ];
    repo.save_event_rows(&late_rows, 100).await.expect("late rows");

    let replayer = ReferralReplayer::new(Arc::clone(&repo), deployment);
    replayer.replay(1, 100).await.expect("first batch");
    replayer.replay(101, 1_000).await.expect("second batch");

    let late_trader = replayer
        .get_trader_referral_info(Address::repeat_byte(0xDD))
        .await
        .expect("query")
        .expect("snapshot");
    assert_eq!(late_trader.total_rebate, U256::from(7_777u64));
    assert_eq!(late_trader.discount_share, U256::from(111u64));
}
