use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::body::Bytes;
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use futures_util::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::{interval, MissedTickBehavior};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::{
    metrics,
    rpc::{self, JsonRpcRequest, JsonRpcResponse},
    subscription::{
        filter::LogFilter, id::random_id, manager::SubscribeError, NotifyError, Subscriber,
        SubscriptionKind, SubscriptionParams,
    },
};

use super::{manager::ConnectionManager, CloseReason};

/// Bound of the per-connection write queue. Responses and notifications
/// share it so frame order is preserved; a client that cannot drain it is
/// closed rather than buffered without bound.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

pub(crate) enum Outbound {
    Response(String),
    Notification(String),
}

/// Shared handle to one client connection.
///
/// This is what the registry stores as the subscriber: enqueueing frames
/// and signalling close are the only operations anyone outside the
/// connection's own tasks may perform.
pub struct ConnectionHandle {
    id: String,
    outbound: mpsc::Sender<Outbound>,
    cancel: CancellationToken,
    close_reason: Mutex<Option<CloseReason>>,
    last_activity: Mutex<Instant>,
}

impl ConnectionHandle {
    pub(crate) fn new() -> (Arc<Self>, mpsc::Receiver<Outbound>) {
        let (outbound, receiver) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let handle = Arc::new(Self {
            id: random_id(),
            outbound,
            cancel: CancellationToken::new(),
            close_reason: Mutex::new(None),
            last_activity: Mutex::new(Instant::now()),
        });
        (handle, receiver)
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        *self.close_reason.lock()
    }

    /// Starts teardown. The first reason wins; repeated calls are no-ops.
    pub(crate) fn begin_close(&self, reason: CloseReason) {
        {
            let mut current = self.close_reason.lock();
            if current.is_none() {
                *current = Some(reason);
            }
        }
        self.cancel.cancel();
    }

    fn touch(&self) {
        *self.last_activity.lock() = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_activity.lock().elapsed()
    }

    /// Enqueues a response frame. Responses must not be dropped, so a full
    /// queue closes the connection instead.
    pub(crate) fn respond(&self, response: &JsonRpcResponse) {
        let frame = match serde_json::to_string(response) {
            Ok(frame) => frame,
            Err(err) => {
                error!(conn_id = %self.id, %err, "failed to serialize response");
                return;
            }
        };
        match self.outbound.try_send(Outbound::Response(frame)) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!(conn_id = %self.id, "write queue full, closing connection");
                self.begin_close(CloseReason::Backpressure);
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }
}

impl Subscriber for ConnectionHandle {
    fn connection_id(&self) -> &str {
        &self.id
    }

    fn notify(&self, _subscription_id: &str, frame: String) -> Result<(), NotifyError> {
        match self.outbound.try_send(Outbound::Notification(frame)) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.begin_close(CloseReason::Backpressure);
                Err(NotifyError::QueueFull)
            }
            Err(TrySendError::Closed(_)) => Err(NotifyError::Closed),
        }
    }
}

/// Drives one connection to completion: read task inline, write task
/// spawned, teardown when either side stops.
pub(crate) async fn run(
    socket: WebSocket,
    manager: Arc<ConnectionManager>,
    handle: Arc<ConnectionHandle>,
    outbound: mpsc::Receiver<Outbound>,
) {
    let (sink, stream) = socket.split();

    let writer = tokio::spawn(write_loop(sink, outbound, handle.clone(), manager.clone()));
    read_loop(stream, &handle, &manager).await;

    handle.begin_close(CloseReason::ClientClose);
    if let Err(err) = writer.await {
        warn!(conn_id = %handle.id(), %err, "write task aborted");
    }
    manager.release(&handle);
}

async fn read_loop(
    mut stream: SplitStream<WebSocket>,
    handle: &Arc<ConnectionHandle>,
    manager: &Arc<ConnectionManager>,
) {
    loop {
        tokio::select! {
            _ = handle.cancel.cancelled() => return,
            frame = stream.next() => match frame {
                None => {
                    handle.begin_close(CloseReason::ClientClose);
                    return;
                }
                Some(Err(err)) => {
                    debug!(conn_id = %handle.id(), %err, "websocket read failed");
                    handle.begin_close(CloseReason::Error);
                    return;
                }
                Some(Ok(message)) => {
                    // Any inbound traffic counts as liveness, not just pongs.
                    handle.touch();
                    match message {
                        Message::Text(text) => dispatch(text.as_str(), handle, manager),
                        Message::Close(_) => {
                            handle.begin_close(CloseReason::ClientClose);
                            return;
                        }
                        Message::Ping(_) | Message::Pong(_) | Message::Binary(_) => {}
                    }
                }
            }
        }
    }
}

async fn write_loop(
    mut sink: SplitSink<WebSocket, Message>,
    outbound: mpsc::Receiver<Outbound>,
    handle: Arc<ConnectionHandle>,
    manager: Arc<ConnectionManager>,
) {
    let config = manager.config().clone();
    let project = manager.project_id().to_string();
    let network = manager.network_id().to_string();

    let mut messages = ReceiverStream::new(outbound);
    let mut ping = interval(config.ping_interval);
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = handle.cancel.cancelled() => break,
            message = messages.next() => {
                let Some(message) = message else { break };
                let (frame, frame_type) = match message {
                    Outbound::Response(frame) => (frame, "response"),
                    Outbound::Notification(frame) => (frame, "notification"),
                };
                if let Err(err) = sink.send(Message::Text(frame.into())).await {
                    debug!(conn_id = %handle.id(), %err, "websocket write failed");
                    handle.begin_close(CloseReason::Error);
                    break;
                }
                metrics::message_sent(&project, &network, frame_type);
            }
            _ = ping.tick() => {
                if handle.idle_for() > config.pong_timeout {
                    warn!(conn_id = %handle.id(), "pong deadline exceeded, closing connection");
                    handle.begin_close(CloseReason::Timeout);
                    break;
                }
                if let Err(err) = sink.send(Message::Ping(Bytes::new())).await {
                    debug!(conn_id = %handle.id(), %err, "websocket ping failed");
                    handle.begin_close(CloseReason::Error);
                    break;
                }
                metrics::message_sent(&project, &network, "ping");
            }
        }
    }

    let reason = handle.close_reason().unwrap_or(CloseReason::ClientClose);
    let close = CloseFrame { code: close_code::NORMAL, reason: reason.as_str().into() };
    let _ = sink.send(Message::Close(Some(close))).await;
}

/// Decodes one inbound text frame and routes it.
fn dispatch(text: &str, handle: &Arc<ConnectionHandle>, manager: &Arc<ConnectionManager>) {
    let raw: Value = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            debug!(conn_id = %handle.id(), %err, "invalid json frame");
            handle.respond(&JsonRpcResponse::error(Value::Null, rpc::PARSE_ERROR, "parse error"));
            return;
        }
    };
    let id = raw.get("id").cloned().unwrap_or(Value::Null);

    let request: JsonRpcRequest = match serde_json::from_value(raw) {
        Ok(request) => request,
        Err(err) => {
            debug!(conn_id = %handle.id(), %err, "invalid json-rpc request");
            handle.respond(&JsonRpcResponse::error(id, rpc::INVALID_REQUEST, "invalid request"));
            return;
        }
    };
    if !request.is_valid() {
        handle.respond(&JsonRpcResponse::error(id, rpc::INVALID_REQUEST, "invalid request"));
        return;
    }

    metrics::message_received(manager.project_id(), manager.network_id(), &request.method);
    debug!(conn_id = %handle.id(), method = %request.method, "dispatching request");

    match request.method.as_str() {
        "eth_subscribe" => handle_subscribe(request, handle, manager),
        "eth_unsubscribe" => handle_unsubscribe(request, handle, manager),
        _ => forward_request(request, handle, manager),
    }
}

fn handle_subscribe(
    request: JsonRpcRequest,
    handle: &Arc<ConnectionHandle>,
    manager: &Arc<ConnectionManager>,
) {
    let id = request.response_id();

    let params: Vec<Value> = match serde_json::from_value(request.params) {
        Ok(params) => params,
        Err(_) => {
            handle.respond(&JsonRpcResponse::error(
                id,
                rpc::INVALID_PARAMS,
                "expected subscription params array",
            ));
            return;
        }
    };
    let Some(kind_name) = params.first().and_then(Value::as_str) else {
        handle.respond(&JsonRpcResponse::error(
            id,
            rpc::INVALID_PARAMS,
            "missing subscription kind",
        ));
        return;
    };
    let Some(kind) = SubscriptionKind::parse(kind_name) else {
        handle.respond(&JsonRpcResponse::error(
            id,
            rpc::INVALID_PARAMS,
            format!("unsupported subscription kind: {kind_name}"),
        ));
        return;
    };

    let owned = manager.subscriptions().registry().count_by_connection(handle.id());
    if owned >= manager.config().max_subscriptions_per_connection {
        handle.respond(&JsonRpcResponse::error(
            id,
            rpc::LIMIT_EXCEEDED,
            "subscription limit reached for connection",
        ));
        return;
    }

    let sub_params = match kind {
        SubscriptionKind::NewHeads => SubscriptionParams::NewHeads,
        SubscriptionKind::Logs => match LogFilter::parse(params.get(1)) {
            Ok(filter) => SubscriptionParams::Logs(filter),
            Err(err) => {
                handle.respond(&JsonRpcResponse::error(id, rpc::INVALID_PARAMS, err.to_string()));
                return;
            }
        },
    };

    let subscriber: Arc<dyn Subscriber> = handle.clone();
    match manager.subscriptions().subscribe(kind, sub_params, subscriber) {
        Ok(sub_id) => handle.respond(&JsonRpcResponse::result(id, json!(sub_id))),
        Err(err @ SubscribeError::LogFilterLimit(_)) => {
            handle.respond(&JsonRpcResponse::error(id, rpc::LIMIT_EXCEEDED, err.to_string()));
        }
        Err(err) => {
            handle.respond(&JsonRpcResponse::error(id, rpc::INTERNAL_ERROR, err.to_string()));
        }
    }
}

fn handle_unsubscribe(
    request: JsonRpcRequest,
    handle: &Arc<ConnectionHandle>,
    manager: &Arc<ConnectionManager>,
) {
    let id = request.response_id();

    let params: Vec<Value> = serde_json::from_value(request.params).unwrap_or_default();
    let Some(sub_id) = params.first().and_then(Value::as_str) else {
        handle.respond(&JsonRpcResponse::error(
            id,
            rpc::INVALID_PARAMS,
            "missing subscription id",
        ));
        return;
    };

    // An unknown id is a normal `false`, not an error.
    let existed = manager.subscriptions().unsubscribe(sub_id);
    handle.respond(&JsonRpcResponse::result(id, json!(existed)));
}

/// Any method other than subscribe/unsubscribe is proxied upstream. The
/// call runs on its own task so a slow upstream never blocks the read loop.
fn forward_request(
    request: JsonRpcRequest,
    handle: &Arc<ConnectionHandle>,
    manager: &Arc<ConnectionManager>,
) {
    let forward = manager.forward();
    let handle = handle.clone();
    tokio::spawn(async move {
        let id = request.response_id();
        let method = request.method.clone();
        let response = match forward.forward(request).await {
            Ok(response) => response,
            Err(err) => {
                debug!(method = %method, %err, "forwarded request failed");
                JsonRpcResponse::error(id, rpc::INTERNAL_ERROR, err.to_string())
            }
        };
        handle.respond(&response);
    });
}
