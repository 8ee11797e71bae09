//! # Connection Task
//!
//! One task per accepted socket: performs the init handshake, processes
//! inbound frames serially in receive order, and drains the connection's
//! frame sink as the single writer. Teardown cascades exactly one
//! disconnect into the engine.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::{accept_async, tungstenite::Message};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::{ConnectionHandle, FrameSink, SubscriptionEngine};
use crate::protocol::{ClientFrame, ErrorKind, ErrorPayload, ServerFrame};

use super::errors::{ServerError, ServerResult};

/// Per-connection tunables, derived from the server config.
#[derive(Debug, Clone)]
pub struct ConnectionSettings {
    /// Keepalive emission interval
    pub keepalive_interval: Duration,

    /// How long a connection may stay in AwaitingInit
    pub init_timeout: Duration,

    /// Outbound frame queue capacity
    pub outbound_queue_capacity: usize,

    /// Window in which a repeated overflow closes the connection
    pub slow_consumer_window: Duration,
}

/// Initialization state of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Waiting for the client's `init` frame
    AwaitingInit,
    /// Handshake complete; subscription frames accepted
    Initialized,
    /// Close decided; flushing pending outbound frames
    Closing,
    /// Socket gone
    Closed,
}

/// What to do after handling one inbound frame
enum Flow {
    Continue,
    /// Stop reading, flush the sink, then close
    Drain,
}

/// Serve one WebSocket connection to completion.
pub async fn run_connection(
    stream: TcpStream,
    peer_addr: SocketAddr,
    engine: Arc<SubscriptionEngine>,
    settings: ConnectionSettings,
) -> ServerResult<()> {
    let ws = accept_async(stream)
        .await
        .map_err(|e| ServerError::Handshake(e.to_string()))?;
    let (mut ws_sender, mut ws_receiver) = ws.split();

    let connection_id = Uuid::new_v4();
    info!(connection = %connection_id, peer = %peer_addr, "connection accepted");

    let sink = Arc::new(FrameSink::new(
        settings.outbound_queue_capacity,
        settings.slow_consumer_window,
    ));
    let handle = ConnectionHandle::new(connection_id, Arc::clone(&sink));

    let mut state = ConnectionState::AwaitingInit;
    let init_deadline = tokio::time::Instant::now() + settings.init_timeout;
    let inactivity_limit = settings.keepalive_interval * 3;
    let mut last_inbound = tokio::time::Instant::now();
    let mut keepalive = tokio::time::interval_at(
        tokio::time::Instant::now() + settings.keepalive_interval,
        settings.keepalive_interval,
    );

    loop {
        tokio::select! {
            inbound = ws_receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        last_inbound = tokio::time::Instant::now();
                        if state == ConnectionState::Closing {
                            continue;
                        }
                        let flow = match serde_json::from_str::<ClientFrame>(&text) {
                            Ok(frame) => handle_frame(frame, &mut state, &engine, &handle),
                            Err(err) => {
                                debug!(connection = %connection_id, error = %err, "malformed frame");
                                reject(state, &sink, format!("malformed frame: {}", err))
                            }
                        };
                        if matches!(flow, Flow::Drain) {
                            state = ConnectionState::Closing;
                            sink.close();
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        last_inbound = tokio::time::Instant::now();
                        if ws_sender.send(Message::Pong(data)).await.is_err() {
                            state = ConnectionState::Closed;
                            break;
                        }
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_inbound = tokio::time::Instant::now();
                    }
                    Some(Ok(Message::Binary(_))) => {
                        last_inbound = tokio::time::Instant::now();
                        if state != ConnectionState::Closing {
                            let _ = reject(state, &sink, "binary frames are not supported");
                            state = ConnectionState::Closing;
                            sink.close();
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        state = ConnectionState::Closed;
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        debug!(connection = %connection_id, error = %err, "receive error");
                        state = ConnectionState::Closed;
                        break;
                    }
                }
            }

            outbound = sink.recv() => {
                match outbound {
                    Some(frame) => {
                        let json = match serde_json::to_string(&frame) {
                            Ok(json) => json,
                            Err(err) => {
                                warn!(connection = %connection_id, error = %err, "frame serialization failed");
                                continue;
                            }
                        };
                        if ws_sender.send(Message::Text(json)).await.is_err() {
                            state = ConnectionState::Closed;
                            break;
                        }
                    }
                    // Sink closed and drained: terminate, init failure, or
                    // repeated overflow.
                    None => {
                        state = ConnectionState::Closed;
                        break;
                    }
                }
            }

            _ = tokio::time::sleep_until(init_deadline), if state == ConnectionState::AwaitingInit => {
                debug!(connection = %connection_id, "init timeout");
                sink.enqueue(ServerFrame::InitErr {
                    reason: "init timeout".to_string(),
                });
                state = ConnectionState::Closing;
                sink.close();
            }

            _ = keepalive.tick() => {
                if state == ConnectionState::Initialized {
                    if last_inbound.elapsed() > inactivity_limit {
                        info!(connection = %connection_id, "inactivity timeout");
                        state = ConnectionState::Closed;
                        break;
                    }
                    sink.enqueue(ServerFrame::Keepalive);
                }
            }
        }
    }

    engine.on_disconnect(connection_id);
    sink.close();
    let _ = ws_sender.send(Message::Close(None)).await;

    info!(connection = %connection_id, state = ?state, "connection closed");
    Ok(())
}

/// Dispatch one parsed inbound frame against the connection state.
fn handle_frame(
    frame: ClientFrame,
    state: &mut ConnectionState,
    engine: &Arc<SubscriptionEngine>,
    handle: &ConnectionHandle,
) -> Flow {
    match (*state, frame) {
        (ConnectionState::AwaitingInit, ClientFrame::Init { .. }) => {
            *state = ConnectionState::Initialized;
            handle.sink.enqueue(ServerFrame::InitAck);
            Flow::Continue
        }
        (ConnectionState::AwaitingInit, _) => {
            handle.sink.enqueue(ServerFrame::InitErr {
                reason: "expected init frame".to_string(),
            });
            Flow::Drain
        }
        (ConnectionState::Initialized, ClientFrame::Init { .. }) => {
            handle.sink.enqueue(ServerFrame::session_error(
                ErrorKind::ProtocolError,
                "session already initialized",
            ));
            Flow::Drain
        }
        (ConnectionState::Initialized, ClientFrame::Start { id, payload }) => {
            engine.on_start(handle, &id, &payload);
            Flow::Continue
        }
        (ConnectionState::Initialized, ClientFrame::Stop { id }) => {
            engine.on_stop(handle, &id);
            Flow::Continue
        }
        (ConnectionState::Initialized, ClientFrame::Terminate) => Flow::Drain,
        // Closing and Closed never reach here; inbound is ignored or the
        // loop has exited.
        (_, _) => Flow::Continue,
    }
}

/// Queue the protocol-error reply appropriate for the connection state.
fn reject(state: ConnectionState, sink: &FrameSink, message: impl Into<String>) -> Flow {
    match state {
        ConnectionState::AwaitingInit => {
            sink.enqueue(ServerFrame::InitErr {
                reason: message.into(),
            });
        }
        _ => {
            sink.enqueue(ServerFrame::Error {
                id: None,
                payload: ErrorPayload::new(ErrorKind::ProtocolError, message),
            });
        }
    }
    Flow::Drain
}
