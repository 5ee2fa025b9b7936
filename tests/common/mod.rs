#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use subscription_gateway::{
    websocket::server::router, ForwardError, ForwardResolver, ForwardRpc, JsonRpcRequest,
    JsonRpcResponse, SubscriptionConfig, WebSocketConfig, WsServer,
};
use subscription_gateway::subscription::{NotifyError, Subscriber};

/// A scripted upstream chain behind the `ForwardRpc` seam.
///
/// Deliberately lenient on `eth_getLogs`: it ignores the address and topic
/// params and returns every log in the requested window, the way a sloppy
/// provider might. The gateway's local re-filtering has to hold the client
/// contract regardless.
pub struct FakeChain {
    state: Mutex<ChainState>,
}

struct ChainState {
    number: u64,
    logs: Vec<Value>,
    calls: HashMap<String, usize>,
    fail_next: HashSet<String>,
    get_logs_windows: Vec<(u64, u64)>,
}

impl FakeChain {
    pub fn new(start_block: u64) -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(ChainState {
                number: start_block,
                logs: Vec::new(),
                calls: HashMap::new(),
                fail_next: HashSet::new(),
                get_logs_windows: Vec::new(),
            }),
        })
    }

    pub fn advance(&self) -> u64 {
        let mut state = self.state.lock();
        state.number += 1;
        state.number
    }

    pub fn set_block(&self, number: u64) {
        self.state.lock().number = number;
    }

    pub fn block_number(&self) -> u64 {
        self.state.lock().number
    }

    pub fn push_log(&self, block: u64, index: u64, address: &str, topics: &[&str]) {
        self.state.lock().logs.push(log_record(block, index, address, topics));
    }

    /// Makes the next call to `method` fail at the transport level.
    pub fn fail_next(&self, method: &str) {
        self.state.lock().fail_next.insert(method.to_string());
    }

    pub fn calls(&self, method: &str) -> usize {
        self.state.lock().calls.get(method).copied().unwrap_or(0)
    }

    /// Every `(fromBlock, toBlock)` window `eth_getLogs` was called with.
    pub fn get_logs_windows(&self) -> Vec<(u64, u64)> {
        self.state.lock().get_logs_windows.clone()
    }
}

#[async_trait]
impl ForwardRpc for FakeChain {
    async fn forward(&self, request: JsonRpcRequest) -> Result<JsonRpcResponse, ForwardError> {
        let mut state = self.state.lock();
        *state.calls.entry(request.method.clone()).or_default() += 1;

        if state.fail_next.remove(&request.method) {
            return Err(ForwardError::Upstream("injected upstream failure".to_string()));
        }

        let id = request.response_id();
        let result = match request.method.as_str() {
            "eth_blockNumber" => json!(format!("0x{:x}", state.number)),
            "eth_getBlockByNumber" => block_header(state.number),
            "eth_getLogs" => {
                let query = &request.params[0];
                let from = parse_hex(query["fromBlock"].as_str().unwrap_or("0x0"));
                let to = parse_hex(query["toBlock"].as_str().unwrap_or("0x0"));
                state.get_logs_windows.push((from, to));

                let in_window: Vec<Value> = state
                    .logs
                    .iter()
                    .filter(|log| {
                        let block = parse_hex(log["blockNumber"].as_str().unwrap_or("0x0"));
                        from <= block && block <= to
                    })
                    .cloned()
                    .collect();
                json!(in_window)
            }
            "eth_chainId" => json!("0x1"),
            _ => {
                return Ok(JsonRpcResponse::error(id, -32601, "method not found"));
            }
        };
        Ok(JsonRpcResponse::result(id, result))
    }
}

fn parse_hex(value: &str) -> u64 {
    u64::from_str_radix(value.trim_start_matches("0x"), 16).unwrap_or(0)
}

/// A deterministic block object of the shape `eth_getBlockByNumber` returns.
pub fn block_header(number: u64) -> Value {
    json!({
        "number": format!("0x{number:x}"),
        "hash": format!("0x{:064x}", number.wrapping_mul(7919)),
        "parentHash": format!("0x{:064x}", number.wrapping_sub(1).wrapping_mul(7919)),
        "timestamp": format!("0x{:x}", 1_700_000_000u64 + number * 12),
        "miner": "0x95222290dd7278aa3ddd389cc1e1d165cc4bafe5",
        "gasLimit": "0x1c9c380",
        "gasUsed": "0x5208",
        "baseFeePerGas": "0x7",
        "transactionsRoot": format!("0x{:064x}", number.wrapping_mul(31)),
        "stateRoot": format!("0x{:064x}", number.wrapping_mul(37)),
        "receiptsRoot": format!("0x{:064x}", number.wrapping_mul(41)),
        "transactions": [],
        "size": "0x220"
    })
}

/// A complete log record of the shape `eth_getLogs` returns.
pub fn log_record(block: u64, index: u64, address: &str, topics: &[&str]) -> Value {
    json!({
        "address": address,
        "topics": topics,
        "data": "0x",
        "blockNumber": format!("0x{block:x}"),
        "blockHash": format!("0x{:064x}", block.wrapping_mul(7919)),
        "transactionHash": format!("0x{:064x}", block.wrapping_mul(104_729) + index),
        "transactionIndex": "0x0",
        "logIndex": format!("0x{index:x}"),
        "removed": false
    })
}

/// Captures every notification handed to it, in order.
pub struct RecordingSubscriber {
    connection_id: String,
    frames: Mutex<Vec<(String, Value)>>,
}

impl RecordingSubscriber {
    pub fn new(connection_id: &str) -> Arc<Self> {
        Arc::new(Self { connection_id: connection_id.to_string(), frames: Mutex::new(Vec::new()) })
    }

    pub fn frames(&self) -> Vec<(String, Value)> {
        self.frames.lock().clone()
    }

    /// The notification payloads delivered for one subscription id.
    pub fn results_for(&self, subscription_id: &str) -> Vec<Value> {
        self.frames
            .lock()
            .iter()
            .filter(|(id, _)| id == subscription_id)
            .map(|(_, frame)| frame["params"]["result"].clone())
            .collect()
    }
}

impl Subscriber for RecordingSubscriber {
    fn connection_id(&self) -> &str {
        &self.connection_id
    }

    fn notify(&self, subscription_id: &str, frame: String) -> Result<(), NotifyError> {
        let value: Value = serde_json::from_str(&frame).expect("notification frame is json");
        self.frames.lock().push((subscription_id.to_string(), value));
        Ok(())
    }
}

/// Binds the gateway router to an ephemeral port, serving every network
/// from the given fake chain.
pub async fn start_gateway(
    chain: Arc<FakeChain>,
    ws_config: WebSocketConfig,
    sub_config: SubscriptionConfig,
) -> (SocketAddr, Arc<WsServer>) {
    let server = WsServer::new(ws_config, sub_config);
    let resolver: ForwardResolver = {
        let chain = chain.clone();
        Arc::new(move |_key| Some(chain.clone() as Arc<dyn ForwardRpc>))
    };
    let app = router(server.clone(), resolver);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind test listener");
    let addr = listener.local_addr().expect("listener has a local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("gateway server failed");
    });

    (addr, server)
}
