//! Poller behaviour driven tick by tick against a scripted upstream.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use common::{FakeChain, RecordingSubscriber};
use serde_json::json;
use subscription_gateway::subscription::{
    Broadcaster, HeadPoller, LogFilter, LogsPoller, Registry, Subscriber, Subscription,
    SubscriptionKind, SubscriptionParams,
};

const USDT: &str = "0xdac17f958d2ee523a2206206994597c13d831ec7";
const OTHER: &str = "0x000000000000000000000000000000000000dead";
const TRANSFER: &str = "0xddf252ad1be2c89b69c2b068fc378daa952ba7f163c4a11628f55a4df523b3ef";
const APPROVAL: &str = "0x8c5be1e5ebec7d5bd14f71427d1e84f3dd0314c0f7b2291e5b200ac8c7c3b925";

fn head_poller(chain: &Arc<FakeChain>) -> (Arc<Registry>, Arc<Broadcaster>, HeadPoller) {
    let registry = Arc::new(Registry::new());
    let broadcaster = Arc::new(Broadcaster::new(registry.clone(), "main", "evm:1"));
    let poller = HeadPoller::new(
        registry.clone(),
        broadcaster.clone(),
        chain.clone(),
        Duration::from_millis(10),
        "main",
        "evm:1",
    );
    (registry, broadcaster, poller)
}

fn logs_poller(chain: &Arc<FakeChain>) -> (Arc<Registry>, Arc<Broadcaster>, LogsPoller) {
    let registry = Arc::new(Registry::new());
    let broadcaster = Arc::new(Broadcaster::new(registry.clone(), "main", "evm:1"));
    let poller = LogsPoller::new(
        registry.clone(),
        broadcaster.clone(),
        chain.clone(),
        Duration::from_millis(10),
        "main",
        "evm:1",
    );
    (registry, broadcaster, poller)
}

fn add_subscription(
    registry: &Registry,
    id: &str,
    kind: SubscriptionKind,
    params: SubscriptionParams,
    subscriber: Arc<RecordingSubscriber>,
) {
    registry
        .add(
            Subscription {
                id: id.to_string(),
                kind,
                params,
                connection_id: subscriber.connection_id().to_string(),
                created_at: Instant::now(),
            },
            subscriber,
        )
        .unwrap();
}

#[tokio::test]
async fn head_poller_skips_upstream_without_subscribers() {
    let chain = FakeChain::new(100);
    let (_registry, _broadcaster, poller) = head_poller(&chain);

    poller.poll_once().await;
    poller.poll_once().await;

    assert_eq!(chain.calls("eth_getBlockByNumber"), 0);
}

#[tokio::test]
async fn head_poller_emits_once_per_block_height() {
    let chain = FakeChain::new(100);
    let (registry, broadcaster, poller) = head_poller(&chain);
    let subscriber = RecordingSubscriber::new("conn-a");
    add_subscription(
        &registry,
        "0xhead",
        SubscriptionKind::NewHeads,
        SubscriptionParams::NewHeads,
        subscriber.clone(),
    );

    // Same height observed three times: exactly one emission.
    poller.poll_once().await;
    poller.poll_once().await;
    poller.poll_once().await;
    broadcaster.wait().await;
    assert_eq!(subscriber.results_for("0xhead").len(), 1);

    chain.advance();
    poller.poll_once().await;
    broadcaster.wait().await;
    chain.advance();
    poller.poll_once().await;
    broadcaster.wait().await;

    let headers = subscriber.results_for("0xhead");
    let numbers: Vec<&str> =
        headers.iter().map(|header| header["number"].as_str().unwrap()).collect();
    assert_eq!(numbers, vec!["0x64", "0x65", "0x66"]);
    assert!(headers[0]["hash"].as_str().unwrap().starts_with("0x"));
    assert!(headers[0].get("transactions").is_none());
}

#[tokio::test]
async fn head_poller_swallows_upstream_errors_and_retries() {
    let chain = FakeChain::new(100);
    let (registry, broadcaster, poller) = head_poller(&chain);
    let subscriber = RecordingSubscriber::new("conn-a");
    add_subscription(
        &registry,
        "0xhead",
        SubscriptionKind::NewHeads,
        SubscriptionParams::NewHeads,
        subscriber.clone(),
    );

    chain.fail_next("eth_getBlockByNumber");
    poller.poll_once().await;
    broadcaster.wait().await;
    assert!(subscriber.results_for("0xhead").is_empty());

    // The next tick recovers without losing the block.
    poller.poll_once().await;
    broadcaster.wait().await;
    assert_eq!(subscriber.results_for("0xhead").len(), 1);
}

#[tokio::test]
async fn logs_poller_first_tick_only_advances_state() {
    let chain = FakeChain::new(5);
    let (registry, broadcaster, poller) = logs_poller(&chain);
    let subscriber = RecordingSubscriber::new("conn-a");
    add_subscription(
        &registry,
        "0xlogs",
        SubscriptionKind::Logs,
        SubscriptionParams::Logs(LogFilter::default()),
        subscriber.clone(),
    );
    // Logs that predate the subscription must never be delivered.
    chain.push_log(4, 0, USDT, &[TRANSFER]);
    chain.push_log(5, 0, USDT, &[TRANSFER]);

    poller.poll_once().await;
    broadcaster.wait().await;

    assert!(chain.get_logs_windows().is_empty());
    assert!(subscriber.results_for("0xlogs").is_empty());
}

#[tokio::test]
async fn logs_poller_windows_are_contiguous_and_non_overlapping() {
    let chain = FakeChain::new(5);
    let (registry, broadcaster, poller) = logs_poller(&chain);
    let subscriber = RecordingSubscriber::new("conn-a");
    add_subscription(
        &registry,
        "0xlogs",
        SubscriptionKind::Logs,
        SubscriptionParams::Logs(LogFilter::default()),
        subscriber.clone(),
    );

    poller.poll_once().await; // startup: cursor at 5

    chain.set_block(7);
    chain.push_log(6, 0, USDT, &[TRANSFER]);
    chain.push_log(7, 0, USDT, &[TRANSFER]);
    poller.poll_once().await;

    poller.poll_once().await; // no new block: no fetch

    chain.set_block(9);
    chain.push_log(8, 0, USDT, &[TRANSFER]);
    poller.poll_once().await;
    broadcaster.wait().await;

    let windows = chain.get_logs_windows();
    assert_eq!(windows, vec![(6, 7), (8, 9)]);

    // Contiguous coverage of every block after the cursor. Blocks 6 and 7
    // were sent by the same tick on independent tasks, so compare sorted.
    let mut delivered: Vec<String> = subscriber
        .results_for("0xlogs")
        .iter()
        .map(|log| log["blockNumber"].as_str().unwrap().to_string())
        .collect();
    delivered.sort_unstable();
    assert_eq!(delivered, vec!["0x6", "0x7", "0x8"]);
}

#[tokio::test]
async fn logs_poller_applies_filters_locally_per_subscription() {
    let chain = FakeChain::new(10);
    let (registry, broadcaster, poller) = logs_poller(&chain);

    let usdt_subscriber = RecordingSubscriber::new("conn-a");
    add_subscription(
        &registry,
        "0xusdt",
        SubscriptionKind::Logs,
        SubscriptionParams::Logs(
            LogFilter::parse(Some(&json!({ "address": USDT }))).unwrap(),
        ),
        usdt_subscriber.clone(),
    );
    let transfer_subscriber = RecordingSubscriber::new("conn-b");
    add_subscription(
        &registry,
        "0xtransfer",
        SubscriptionKind::Logs,
        SubscriptionParams::Logs(
            LogFilter::parse(Some(&json!({ "topics": [TRANSFER] }))).unwrap(),
        ),
        transfer_subscriber.clone(),
    );

    poller.poll_once().await; // startup

    // The fake upstream is lenient and returns all three to both
    // subscriptions; local matching must separate them.
    chain.push_log(11, 0, USDT, &[TRANSFER]);
    chain.push_log(11, 1, OTHER, &[TRANSFER]);
    chain.push_log(11, 2, OTHER, &[APPROVAL]);
    chain.set_block(11);
    poller.poll_once().await;
    broadcaster.wait().await;

    let usdt_logs = usdt_subscriber.results_for("0xusdt");
    assert_eq!(usdt_logs.len(), 1);
    assert_eq!(usdt_logs[0]["address"], USDT);

    let transfer_logs = transfer_subscriber.results_for("0xtransfer");
    assert_eq!(transfer_logs.len(), 2);
    for log in &transfer_logs {
        assert_eq!(log["topics"][0], TRANSFER);
    }
}

#[tokio::test]
async fn logs_poller_failed_fetch_skips_its_window() {
    let chain = FakeChain::new(5);
    let (registry, broadcaster, poller) = logs_poller(&chain);
    let subscriber = RecordingSubscriber::new("conn-a");
    add_subscription(
        &registry,
        "0xlogs",
        SubscriptionKind::Logs,
        SubscriptionParams::Logs(LogFilter::default()),
        subscriber.clone(),
    );

    poller.poll_once().await; // startup: cursor at 5

    // The cursor advances before the fetch, so a failed fetch skips its
    // window instead of replaying it.
    chain.push_log(6, 0, USDT, &[TRANSFER]);
    chain.set_block(6);
    chain.fail_next("eth_getLogs");
    poller.poll_once().await;
    broadcaster.wait().await;
    assert!(subscriber.results_for("0xlogs").is_empty());

    chain.push_log(7, 0, OTHER, &[TRANSFER]);
    chain.set_block(7);
    poller.poll_once().await;
    broadcaster.wait().await;

    let delivered = subscriber.results_for("0xlogs");
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0]["blockNumber"], "0x7");
}

#[tokio::test]
async fn logs_poller_skips_upstream_without_subscribers() {
    let chain = FakeChain::new(5);
    let (_registry, _broadcaster, poller) = logs_poller(&chain);

    poller.poll_once().await;

    assert_eq!(chain.calls("eth_blockNumber"), 0);
    assert_eq!(chain.calls("eth_getLogs"), 0);
}

#[tokio::test]
async fn logs_poller_block_number_failure_freezes_the_cursor() {
    let chain = FakeChain::new(5);
    let (registry, broadcaster, poller) = logs_poller(&chain);
    let subscriber = RecordingSubscriber::new("conn-a");
    add_subscription(
        &registry,
        "0xlogs",
        SubscriptionKind::Logs,
        SubscriptionParams::Logs(LogFilter::default()),
        subscriber.clone(),
    );

    poller.poll_once().await; // startup: cursor at 5

    chain.push_log(6, 0, USDT, &[TRANSFER]);
    chain.set_block(6);
    chain.fail_next("eth_blockNumber");
    poller.poll_once().await;
    broadcaster.wait().await;
    assert!(subscriber.results_for("0xlogs").is_empty());

    // The failed tick did not move the cursor; block 6 is still covered.
    poller.poll_once().await;
    broadcaster.wait().await;
    let delivered = subscriber.results_for("0xlogs");
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0]["blockNumber"], "0x6");
}
