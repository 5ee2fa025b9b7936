//! Metric registration and recording helpers.
//!
//! All series carry `project` and `network` labels; the remaining labels
//! depend on the series (`kind`, `reason`, `cause`, `result`, `method`,
//! `type`). Names are registered once through the `describe_*` macros on
//! first use.

use std::sync::LazyLock;
use std::time::Duration;

use metrics::{
    counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};

use crate::subscription::SubscriptionKind;

const ACTIVE_CONNECTIONS: &str = "gateway_websocket_active_connections";
const ACTIVE_CONNECTIONS_HELP: &str = "Currently open websocket connections";

const CONNECTIONS_TOTAL: &str = "gateway_websocket_connections_total";
const CONNECTIONS_TOTAL_HELP: &str = "Websocket connections accepted since start";

const CONNECTIONS_CLOSED: &str = "gateway_websocket_connections_closed_total";
const CONNECTIONS_CLOSED_HELP: &str = "Websocket connections closed, by reason";

const ACTIVE_SUBSCRIPTIONS: &str = "gateway_subscription_active";
const ACTIVE_SUBSCRIPTIONS_HELP: &str = "Currently active subscriptions, by kind";

const SUBSCRIPTIONS_CREATED: &str = "gateway_subscription_created_total";
const SUBSCRIPTIONS_CREATED_HELP: &str = "Subscriptions created, by kind";

const SUBSCRIPTIONS_REMOVED: &str = "gateway_subscription_removed_total";
const SUBSCRIPTIONS_REMOVED_HELP: &str = "Subscriptions removed, by kind and reason";

const NOTIFICATIONS_SENT: &str = "gateway_subscription_notifications_sent_total";
const NOTIFICATIONS_SENT_HELP: &str = "Notifications delivered to client write queues, by kind";

const NOTIFICATION_ERRORS: &str = "gateway_subscription_notification_errors_total";
const NOTIFICATION_ERRORS_HELP: &str = "Notification delivery failures, by kind and cause";

const POLLS: &str = "gateway_subscription_polls_total";
const POLLS_HELP: &str = "Completed upstream polls, by kind and result";

const POLL_ERRORS: &str = "gateway_subscription_poll_errors_total";
const POLL_ERRORS_HELP: &str = "Failed upstream polls, by kind and cause";

const POLL_DURATION: &str = "gateway_subscription_poll_duration_seconds";
const POLL_DURATION_HELP: &str = "Wall time of one upstream poll, by kind";

const MESSAGES_RECEIVED: &str = "gateway_websocket_messages_received_total";
const MESSAGES_RECEIVED_HELP: &str = "Inbound JSON-RPC messages, by method";

const MESSAGES_SENT: &str = "gateway_websocket_messages_sent_total";
const MESSAGES_SENT_HELP: &str = "Outbound frames, by type";

static DESCRIBE: LazyLock<()> = LazyLock::new(|| {
    describe_gauge!(ACTIVE_CONNECTIONS, ACTIVE_CONNECTIONS_HELP);
    describe_counter!(CONNECTIONS_TOTAL, CONNECTIONS_TOTAL_HELP);
    describe_counter!(CONNECTIONS_CLOSED, CONNECTIONS_CLOSED_HELP);
    describe_gauge!(ACTIVE_SUBSCRIPTIONS, ACTIVE_SUBSCRIPTIONS_HELP);
    describe_counter!(SUBSCRIPTIONS_CREATED, SUBSCRIPTIONS_CREATED_HELP);
    describe_counter!(SUBSCRIPTIONS_REMOVED, SUBSCRIPTIONS_REMOVED_HELP);
    describe_counter!(NOTIFICATIONS_SENT, NOTIFICATIONS_SENT_HELP);
    describe_counter!(NOTIFICATION_ERRORS, NOTIFICATION_ERRORS_HELP);
    describe_counter!(POLLS, POLLS_HELP);
    describe_counter!(POLL_ERRORS, POLL_ERRORS_HELP);
    describe_histogram!(POLL_DURATION, POLL_DURATION_HELP);
    describe_counter!(MESSAGES_RECEIVED, MESSAGES_RECEIVED_HELP);
    describe_counter!(MESSAGES_SENT, MESSAGES_SENT_HELP);
});

fn describe() {
    LazyLock::force(&DESCRIBE);
}

pub(crate) fn connection_opened(project: &str, network: &str) {
    describe();
    counter!(CONNECTIONS_TOTAL, "project" => project.to_string(), "network" => network.to_string())
        .increment(1);
    gauge!(ACTIVE_CONNECTIONS, "project" => project.to_string(), "network" => network.to_string())
        .increment(1.0);
}

pub(crate) fn connection_closed(project: &str, network: &str, reason: &'static str) {
    describe();
    counter!(
        CONNECTIONS_CLOSED,
        "project" => project.to_string(),
        "network" => network.to_string(),
        "reason" => reason
    )
    .increment(1);
    gauge!(ACTIVE_CONNECTIONS, "project" => project.to_string(), "network" => network.to_string())
        .decrement(1.0);
}

pub(crate) fn subscription_created(project: &str, network: &str, kind: SubscriptionKind) {
    describe();
    counter!(
        SUBSCRIPTIONS_CREATED,
        "project" => project.to_string(),
        "network" => network.to_string(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

pub(crate) fn subscription_removed(
    project: &str,
    network: &str,
    kind: SubscriptionKind,
    reason: &'static str,
) {
    describe();
    counter!(
        SUBSCRIPTIONS_REMOVED,
        "project" => project.to_string(),
        "network" => network.to_string(),
        "kind" => kind.as_str(),
        "reason" => reason
    )
    .increment(1);
}

pub(crate) fn set_active_subscriptions(
    project: &str,
    network: &str,
    kind: SubscriptionKind,
    count: usize,
) {
    describe();
    gauge!(
        ACTIVE_SUBSCRIPTIONS,
        "project" => project.to_string(),
        "network" => network.to_string(),
        "kind" => kind.as_str()
    )
    .set(count as f64);
}

pub(crate) fn notification_sent(project: &str, network: &str, kind: SubscriptionKind) {
    describe();
    counter!(
        NOTIFICATIONS_SENT,
        "project" => project.to_string(),
        "network" => network.to_string(),
        "kind" => kind.as_str()
    )
    .increment(1);
}

pub(crate) fn notification_error(
    project: &str,
    network: &str,
    kind: SubscriptionKind,
    cause: &'static str,
) {
    describe();
    counter!(
        NOTIFICATION_ERRORS,
        "project" => project.to_string(),
        "network" => network.to_string(),
        "kind" => kind.as_str(),
        "cause" => cause
    )
    .increment(1);
}

pub(crate) fn poll(project: &str, network: &str, kind: SubscriptionKind, result: &'static str) {
    describe();
    counter!(
        POLLS,
        "project" => project.to_string(),
        "network" => network.to_string(),
        "kind" => kind.as_str(),
        "result" => result
    )
    .increment(1);
}

pub(crate) fn poll_error(
    project: &str,
    network: &str,
    kind: SubscriptionKind,
    cause: &'static str,
) {
    describe();
    counter!(
        POLL_ERRORS,
        "project" => project.to_string(),
        "network" => network.to_string(),
        "kind" => kind.as_str(),
        "cause" => cause
    )
    .increment(1);
}

pub(crate) fn poll_duration(
    project: &str,
    network: &str,
    kind: SubscriptionKind,
    elapsed: Duration,
) {
    describe();
    histogram!(
        POLL_DURATION,
        "project" => project.to_string(),
        "network" => network.to_string(),
        "kind" => kind.as_str()
    )
    .record(elapsed.as_secs_f64());
}

pub(crate) fn message_received(project: &str, network: &str, method: &str) {
    describe();
    counter!(
        MESSAGES_RECEIVED,
        "project" => project.to_string(),
        "network" => network.to_string(),
        "method" => method.to_string()
    )
    .increment(1);
}

pub(crate) fn message_sent(project: &str, network: &str, frame_type: &'static str) {
    describe();
    counter!(
        MESSAGES_SENT,
        "project" => project.to_string(),
        "network" => network.to_string(),
        "type" => frame_type
    )
    .increment(1);
}
