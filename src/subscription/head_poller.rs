use std::sync::Arc;
use std::time::{Duration, Instant};

use alloy::primitives::{Address, B256, U256, U64};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    metrics,
    rpc::{ForwardRpc, JsonRpcRequest},
};

use super::{Broadcaster, PollError, Registry, SubscriptionKind};

/// The subset of an EVM block object forwarded to `newHeads` subscribers.
///
/// Unknown fields of the upstream block are dropped on parse; optional
/// fields stay absent in the notification when the chain does not supply
/// them (no `baseFeePerGas` pre-London, for example).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockHeader {
    pub number: U64,
    pub hash: B256,
    pub parent_hash: B256,
    pub timestamp: U64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub miner: Option<Address>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_limit: Option<U64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gas_used: Option<U64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_fee_per_gas: Option<U256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transactions_root: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state_root: Option<B256>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receipts_root: Option<B256>,
}

/// Polls the upstream chain head and emits each newly observed block.
///
/// "New" is decided on the block number alone: a same-height reorg swaps
/// the hash without changing the number and is not re-emitted. That is an
/// accepted limit of the polling model.
pub struct HeadPoller {
    registry: Arc<Registry>,
    broadcaster: Arc<Broadcaster>,
    forward: Arc<dyn ForwardRpc>,
    poll_interval: Duration,
    project_id: String,
    network_id: String,
    last_block: Mutex<Option<BlockHeader>>,
}

impl HeadPoller {
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
            last_block: Mutex::new(None),
        }
    }

    /// Poll loop. Ticks immediately on start, then every `poll_interval`,
    /// until the token is cancelled.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        info!(poll_interval = ?self.poll_interval, "starting head poller");

        let mut ticker = interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("head poller stopped");
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

    /// One tick: fetch the latest block and broadcast it if the height
    /// changed since the previous tick.
    pub async fn poll_once(&self) {
        let subscribers = self.registry.count_by_kind(SubscriptionKind::NewHeads);
        if subscribers == 0 {
            debug!("no newHeads subscribers, skipping poll");
            return;
        }
        debug!(subscribers, "polling for new head");

        let started = Instant::now();
        let header = match self.fetch_latest_header().await {
            Ok(header) => header,
            Err(PollError::EmptyResult) => {
                debug!("empty response for latest block");
                self.record_poll("empty");
                return;
            }
            Err(err) => {
                error!(%err, "failed to fetch latest block");
                metrics::poll_error(
                    &self.project_id,
                    &self.network_id,
                    SubscriptionKind::NewHeads,
                    err.cause(),
                );
                return;
            }
        };
        metrics::poll_duration(
            &self.project_id,
            &self.network_id,
            SubscriptionKind::NewHeads,
            started.elapsed(),
        );

        let is_new = {
            let mut last = self.last_block.lock();
            match &*last {
                Some(previous) if previous.number == header.number => false,
                _ => {
                    *last = Some(header.clone());
                    true
                }
            }
        };
        if !is_new {
            debug!(number = %header.number, "block already processed");
            self.record_poll("no_change");
            return;
        }

        info!(
            number = %header.number,
            hash = %header.hash,
            subscribers,
            "new block detected, broadcasting"
        );
        self.record_poll("new_block");

        match serde_json::to_value(&header) {
            Ok(payload) => {
                self.broadcaster.broadcast_to_kind(SubscriptionKind::NewHeads, &payload);
            }
            Err(err) => error!(%err, "failed to serialize block header"),
        }
    }

    async fn fetch_latest_header(&self) -> Result<BlockHeader, PollError> {
        let request = JsonRpcRequest::new("eth_getBlockByNumber", json!(["latest", false]));
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

    fn record_poll(&self, result: &'static str) {
        metrics::poll(&self.project_id, &self.network_id, SubscriptionKind::NewHeads, result);
    }
}
