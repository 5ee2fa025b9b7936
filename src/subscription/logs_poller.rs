use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::{primitives::U64, rpc::types::Log};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    metrics,
    rpc::{ForwardRpc, JsonRpcRequest},
};

use super::{
    filter::LogFilter, Broadcaster, PollError, Registry, SubscriptionKind, SubscriptionParams,
};

/// Polls `eth_getLogs` for every `logs` subscription and pushes matches.
///
/// Each tick covers the half-open window `(last_seen, current]`; ticks
/// therefore never overlap and together cover every block after the first
/// observed height. `last_seen` advances before the per-subscription
/// fetches, so a failed fetch skips its window rather than replaying it.
///
/// Filters are forwarded verbatim so the upstream can pre-filter, and every
/// returned record is re-checked locally; lenient upstreams do not leak
/// non-matching logs to clients.
pub struct LogsPoller {
    registry: Arc<Registry>,
    broadcaster: Arc<Broadcaster>,
    forward: Arc<dyn ForwardRpc>,
    poll_interval: Duration,
    project_id: String,
    network_id: String,
    last_block_number: Mutex<Option<U64>>,
}

impl LogsPoller {
    pub fn new(
        registry: Arc<Registry>,
        broadcaster: Arc<Broadcaster>,
        forward: Arc<dyn ForwardRpc>,
        poll_interval: Duration,
        project_id: impl Into<String>,
        network_id: impl Into<String>,
    ) -> Self {
        Self {
            registry,
            broadcaster,
            forward,
            poll_interval,
            project_id: project_id.into(),
            network_id: network_id.into(),
            last_block_number: Mutex::new(None),
        }
    }

    /// Poll loop. Ticks immediately on start, then every `poll_interval`,
    /// until the token is cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(poll_interval = ?self.poll_interval, "starting logs poller");

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("logs poller stopped");
                    return;
                }
                _ = ticker.tick() => {
                    // Cancellation also aborts an in-flight upstream call;
                    // a cancelled poll is a non-event.
                    tokio::select! {
                        _ = cancel.cancelled() => {}
                        _ = self.poll_once() => {}
                    }
                }
            }
        }
    }

    /// One tick: advance the window and fetch logs for each subscription.
    pub async fn poll_once(&self) {
        let ids = self.registry.list_by_kind(SubscriptionKind::Logs);
        if ids.is_empty() {
            debug!("no logs subscribers, skipping poll");
            return;
        }
        debug!(subscribers = ids.len(), "polling for logs");

        let started = Instant::now();
        let current = match self.current_block_number().await {
            Ok(number) => number,
            Err(err) => {
                error!(%err, "failed to get current block number");
                metrics::poll_error(
                    &self.project_id,
                    &self.network_id,
                    SubscriptionKind::Logs,
                    err.cause(),
                );
                return;
            }
        };

        let window = {
            let mut last = self.last_block_number.lock();
            let window = (*last)
                .filter(|prev| *prev < current)
                .map(|prev| (prev.saturating_add(U64::from(1)), current));
            *last = Some(current);
            window
        };
        let Some((from_block, to_block)) = window else {
            // Startup tick or no new block: the window is empty, only the
            // cursor moved.
            debug!(current = %current, "no new blocks in window");
            self.record_poll("success");
            return;
        };

        for id in ids {
            let Some(subscription) = self.registry.get(&id) else {
                continue; // unsubscribed between snapshot and fetch
            };
            let SubscriptionParams::Logs(filter) = &subscription.params else {
                continue;
            };

            match self.fetch_logs(filter, from_block, to_block).await {
                Ok(logs) => {
                    let fetched = logs.len();
                    let mut sent = 0usize;
                    for log in &logs {
                        if !filter.matches(log) {
                            continue;
                        }
                        match serde_json::to_value(log) {
                            Ok(payload) => {
                                self.broadcaster.broadcast(&id, &payload);
                                sent += 1;
                            }
                            Err(err) => error!(%err, sub_id = %id, "failed to serialize log"),
                        }
                    }
                    if fetched > 0 {
                        debug!(sub_id = %id, fetched, sent, "sent log notifications");
                    }
                }
                Err(err) => {
                    error!(%err, sub_id = %id, "failed to fetch logs");
                    metrics::poll_error(
                        &self.project_id,
                        &self.network_id,
                        SubscriptionKind::Logs,
                        err.cause(),
                    );
                }
            }
        }

        self.record_poll("success");
        metrics::poll_duration(
            &self.project_id,
            &self.network_id,
            SubscriptionKind::Logs,
            started.elapsed(),
        );
    }

    async fn current_block_number(&self) -> Result<U64, PollError> {
        let request = JsonRpcRequest::new("eth_blockNumber", json!([]));
        let response = self.forward.forward(request).await?;

        if let Some(err) = response.error {
            return Err(PollError::Upstream { code: err.code, message: err.message });
        }
        if response.is_empty_result() {
            return Err(PollError::EmptyResult);
        }
        let result = response.result.unwrap_or(Value::Null);
        Ok(serde_json::from_value(result)?)
    }

    async fn fetch_logs(
        &self,
        filter: &LogFilter,
        from_block: U64,
        to_block: U64,
    ) -> Result<Vec<Log>, PollError> {
        let mut query = serde_json::Map::new();
        query.insert("fromBlock".to_string(), serde_json::to_value(from_block)?);
        query.insert("toBlock".to_string(), serde_json::to_value(to_block)?);
        filter.extend_query(&mut query)?;

        let request = JsonRpcRequest::new("eth_getLogs", json!([query]));
        let response = self.forward.forward(request).await?;

        if let Some(err) = response.error {
            return Err(PollError::Upstream { code: err.code, message: err.message });
        }
        match response.result {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(result) => Ok(serde_json::from_value(result)?),
        }
    }

    fn record_poll(&self, result: &'static str) {
        metrics::poll(&self.project_id, &self.network_id, SubscriptionKind::Logs, result);
    }
}
