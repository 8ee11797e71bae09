//! # Frame Sink
//!
//! Per-connection bounded FIFO of outbound frames, filled synchronously by
//! bus handlers and drained by the connection's single writer task.
//!
//! Overflow policy: when the queue is full, the oldest pending `data`
//! frames are dropped and each affected subscription receives one `error`
//! frame of kind `SlowConsumer`; the subscription stays active. A second
//! overflow inside the configured window closes the sink with a final
//! session-level `error` frame.
//!
//! Every enqueue of a `data` frame passes the instance's [`DeliveryGate`].
//! `complete` closes the gate and enqueues under the same lock acquisition,
//! so no `data` frame for that subscription can follow its `complete`.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::sync::Notify;
use tracing::warn;

use crate::protocol::{ErrorKind, ServerFrame};

/// Per-subscription delivery gate. Open while the subscription may receive
/// `data` frames; closed atomically with its `complete` frame.
#[derive(Debug)]
pub struct DeliveryGate {
    open: AtomicBool,
}

impl DeliveryGate {
    /// A new, open gate
    pub fn new() -> Self {
        Self {
            open: AtomicBool::new(true),
        }
    }

    /// Whether `data` frames may still be enqueued
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self) {
        self.open.store(false, Ordering::Release);
    }
}

impl Default for DeliveryGate {
    fn default() -> Self {
        Self::new()
    }
}

struct SinkState {
    queue: VecDeque<ServerFrame>,
    closed: bool,
    close_requested: bool,
    last_overflow: Option<Instant>,
}

/// Bounded outbound frame queue for one connection.
pub struct FrameSink {
    state: Mutex<SinkState>,
    notify: Notify,
    capacity: usize,
    overflow_window: Duration,
}

impl FrameSink {
    /// Create a sink with the given queue capacity and repeated-overflow
    /// window.
    pub fn new(capacity: usize, overflow_window: Duration) -> Self {
        Self {
            state: Mutex::new(SinkState {
                queue: VecDeque::with_capacity(capacity),
                closed: false,
                close_requested: false,
                last_overflow: None,
            }),
            notify: Notify::new(),
            capacity,
            overflow_window,
        }
    }

    /// Enqueue a control frame (`init_ack`, `init_err`, `error`,
    /// `keepalive`).
    pub fn enqueue(&self, frame: ServerFrame) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.closed {
            return;
        }
        self.push(&mut state, frame);
        drop(state);
        self.notify.notify_one();
    }

    /// Enqueue a `data` frame for a subscription, honoring its gate.
    pub fn enqueue_data(&self, gate: &DeliveryGate, id: &str, payload: Value) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if state.closed || !gate.is_open() {
            return;
        }
        self.push(&mut state, ServerFrame::data(id, payload));
        drop(state);
        self.notify.notify_one();
    }

    /// Close a subscription's gate and enqueue its `complete` frame.
    ///
    /// Both happen under one lock acquisition: `complete` is the last frame
    /// bearing this id.
    pub fn complete(&self, gate: &DeliveryGate, id: &str) {
        let mut state = match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        gate.close();
        if state.closed {
            return;
        }
        self.push(&mut state, ServerFrame::Complete { id: id.to_string() });
        drop(state);
        self.notify.notify_one();
    }

    /// Push with overflow handling. Caller holds the state lock.
    fn push(&self, state: &mut SinkState, frame: ServerFrame) {
        if state.queue.len() >= self.capacity {
            self.overflow(state);
            if state.closed {
                return;
            }
        }
        state.queue.push_back(frame);
    }

    /// Drop the oldest `data` frames down to half capacity and emit one
    /// `SlowConsumer` error per affected subscription. A repeated overflow
    /// inside the window closes the sink with a final no-id error frame.
    fn overflow(&self, state: &mut SinkState) {
        let target = self.capacity / 2;
        let mut need_drop = state.queue.len().saturating_sub(target);
        let mut affected: Vec<String> = Vec::new();
        let mut kept = VecDeque::with_capacity(self.capacity);

        for frame in state.queue.drain(..) {
            if need_drop > 0 {
                if let Some(id) = frame.data_subscription_id() {
                    if !affected.iter().any(|a| a == id) {
                        affected.push(id.to_string());
                    }
                    need_drop -= 1;
                    continue;
                }
            }
            kept.push_back(frame);
        }
        state.queue = kept;

        warn!(
            dropped_subscriptions = affected.len(),
            queue = state.queue.len(),
            "outbound queue overflowed; dropped oldest data frames"
        );

        for id in affected {
            state.queue.push_back(ServerFrame::subscription_error(
                id,
                ErrorKind::SlowConsumer,
                "outbound queue overflowed; oldest events were dropped",
            ));
        }

        let now = Instant::now();
        let repeated = state
            .last_overflow
            .is_some_and(|prev| now.duration_since(prev) <= self.overflow_window);
        state.last_overflow = Some(now);

        if repeated {
            state.queue.push_back(ServerFrame::session_error(
                ErrorKind::SlowConsumer,
                "outbound queue overflowed repeatedly; closing connection",
            ));
            state.close_requested = true;
            state.closed = true;
        }
    }

    /// Receive the next frame, waiting until one is available. Returns
    /// `None` once the sink is closed and drained.
    pub async fn recv(&self) -> Option<ServerFrame> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut state = match self.state.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                if let Some(frame) = state.queue.pop_front() {
                    return Some(frame);
                }
                if state.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Pop the next frame without waiting
    pub fn try_recv(&self) -> Option<ServerFrame> {
        match self.state.lock() {
            Ok(mut state) => state.queue.pop_front(),
            Err(poisoned) => poisoned.into_inner().queue.pop_front(),
        }
    }

    /// Stop accepting frames and wake the reader. Pending frames remain
    /// receivable. Idempotent.
    pub fn close(&self) {
        match self.state.lock() {
            Ok(mut state) => state.closed = true,
            Err(poisoned) => poisoned.into_inner().closed = true,
        }
        self.notify.notify_one();
    }

    /// Whether the sink decided the connection must close
    pub fn close_requested(&self) -> bool {
        self.state
            .lock()
            .map(|s| s.close_requested)
            .unwrap_or(true)
    }

    /// Frames currently queued
    pub fn len(&self) -> usize {
        self.state.lock().map(|s| s.queue.len()).unwrap_or(0)
    }

    /// Whether the queue is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn data_frames(sink: &FrameSink) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        while let Some(frame) = sink.try_recv() {
            frames.push(frame);
        }
        frames
    }

    #[test]
    fn test_fifo_order() {
        let sink = FrameSink::new(8, Duration::from_secs(30));
        let gate = DeliveryGate::new();

        for i in 0..3 {
            sink.enqueue_data(&gate, "s1", json!({"id": i}));
        }

        let frames = data_frames(&sink);
        assert_eq!(frames.len(), 3);
        for (i, frame) in frames.iter().enumerate() {
            match frame {
                ServerFrame::Data { payload, .. } => assert_eq!(payload["id"], i),
                other => panic!("unexpected frame: {:?}", other),
            }
        }
    }

    #[test]
    fn test_gate_blocks_data_after_complete() {
        let sink = FrameSink::new(8, Duration::from_secs(30));
        let gate = DeliveryGate::new();

        sink.enqueue_data(&gate, "s1", json!({"id": 1}));
        sink.complete(&gate, "s1");
        sink.enqueue_data(&gate, "s1", json!({"id": 2}));

        let frames = data_frames(&sink);
        assert_eq!(frames.len(), 2);
        assert!(matches!(&frames[0], ServerFrame::Data { .. }));
        assert!(matches!(&frames[1], ServerFrame::Complete { id } if id == "s1"));
    }

    #[test]
    fn test_overflow_drops_oldest_and_flags_slow_consumer() {
        let sink = FrameSink::new(8, Duration::from_secs(30));
        let gate = DeliveryGate::new();

        for i in 0..9 {
            sink.enqueue_data(&gate, "s1", json!({"id": i}));
        }

        // 8 queued, the 9th overflowed: ids 0..=3 dropped, one SlowConsumer
        // error appended, then the 9th data frame.
        let frames = data_frames(&sink);
        assert_eq!(frames.len(), 6);

        match &frames[0] {
            ServerFrame::Data { payload, .. } => assert_eq!(payload["id"], 4),
            other => panic!("unexpected frame: {:?}", other),
        }
        match &frames[4] {
            ServerFrame::Error { id, payload } => {
                assert_eq!(id.as_deref(), Some("s1"));
                assert_eq!(payload.kind, ErrorKind::SlowConsumer);
            }
            other => panic!("unexpected frame: {:?}", other),
        }
        match &frames[5] {
            ServerFrame::Data { payload, .. } => assert_eq!(payload["id"], 8),
            other => panic!("unexpected frame: {:?}", other),
        }

        assert!(!sink.close_requested());

        // The subscription is still deliverable after the overflow.
        sink.enqueue_data(&gate, "s1", json!({"id": 100}));
        assert_eq!(sink.len(), 1);
    }

    #[test]
    fn test_overflow_reports_each_affected_subscription_once() {
        let sink = FrameSink::new(4, Duration::from_secs(30));
        let gate_a = DeliveryGate::new();
        let gate_b = DeliveryGate::new();

        sink.enqueue_data(&gate_a, "a", json!({}));
        sink.enqueue_data(&gate_b, "b", json!({}));
        sink.enqueue_data(&gate_a, "a", json!({}));
        sink.enqueue_data(&gate_b, "b", json!({}));
        // Overflow: drops the two oldest (one per subscription).
        sink.enqueue_data(&gate_a, "a", json!({}));

        let errors: Vec<_> = data_frames(&sink)
            .into_iter()
            .filter_map(|f| match f {
                ServerFrame::Error { id, payload } => Some((id, payload.kind)),
                _ => None,
            })
            .collect();

        assert_eq!(
            errors,
            vec![
                (Some("a".to_string()), ErrorKind::SlowConsumer),
                (Some("b".to_string()), ErrorKind::SlowConsumer),
            ]
        );
    }

    #[test]
    fn test_repeated_overflow_closes_sink() {
        let sink = FrameSink::new(4, Duration::from_secs(30));
        let gate = DeliveryGate::new();

        for i in 0..5 {
            sink.enqueue_data(&gate, "s1", json!({"id": i}));
        }
        assert!(!sink.close_requested());

        // The queue refilled to capacity after the first overflow; this
        // enqueue overflows again inside the window.
        sink.enqueue_data(&gate, "s1", json!({"id": 5}));
        assert!(sink.close_requested());

        let frames = data_frames(&sink);
        match frames.last() {
            Some(ServerFrame::Error { id: None, payload }) => {
                assert_eq!(payload.kind, ErrorKind::SlowConsumer);
            }
            other => panic!("expected final session error, got {:?}", other),
        }

        // Closed: nothing further is accepted.
        sink.enqueue_data(&gate, "s1", json!({"id": 99}));
        assert!(sink.is_empty());
    }

    #[test]
    fn test_control_frames_survive_overflow() {
        let sink = FrameSink::new(4, Duration::from_secs(30));
        let gate = DeliveryGate::new();

        sink.enqueue(ServerFrame::InitAck);
        for i in 0..3 {
            sink.enqueue_data(&gate, "s1", json!({"id": i}));
        }
        // Overflow drops data frames only; init_ack stays at the front.
        sink.enqueue_data(&gate, "s1", json!({"id": 3}));

        let frames = data_frames(&sink);
        assert!(matches!(frames[0], ServerFrame::InitAck));
    }

    #[tokio::test]
    async fn test_recv_returns_none_after_close() {
        let sink = FrameSink::new(4, Duration::from_secs(30));

        sink.enqueue(ServerFrame::Keepalive);
        sink.close();

        assert!(matches!(sink.recv().await, Some(ServerFrame::Keepalive)));
        assert!(sink.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_recv_wakes_on_enqueue() {
        use std::sync::Arc;

        let sink = Arc::new(FrameSink::new(4, Duration::from_secs(30)));
        let reader = Arc::clone(&sink);
        let task = tokio::spawn(async move { reader.recv().await });

        tokio::task::yield_now().await;
        sink.enqueue(ServerFrame::Keepalive);

        let frame = task.await.unwrap();
        assert!(matches!(frame, Some(ServerFrame::Keepalive)));
    }
}
