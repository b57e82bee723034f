//! The bounded, single-writer mailbox behind each `LiveConnection` (§4.E,
//! §5 "Backpressure"). Generalizes the teacher's `ws.rs` pattern — a
//! dedicated write task draining an `mpsc` channel — with the shedding
//! policy the teacher's unbounded channel didn't need: when the queue is
//! full, the oldest non-critical frame is dropped rather than blocking the
//! hub or the orchestration task that produced the frame.

use std::{
    collections::VecDeque,
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicU32, Ordering},
    },
};

use tokio::sync::Notify;

pub enum PushOutcome {
    Enqueued,
    /// The queue was full; the oldest frame was dropped to make room.
    DroppedOldest,
    /// The queue has already been closed (connection shutting down).
    Closed,
}

pub struct SendQueue {
    capacity: usize,
    frames: Mutex<VecDeque<String>>,
    notify: Notify,
    closed: AtomicBool,
    consecutive_full: AtomicU32,
}

impl SendQueue {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            frames: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
            consecutive_full: AtomicU32::new(0),
        }
    }

    /// Push a frame. Returns whether the connection should now be closed
    /// (two consecutive full-queue events, §5).
    pub fn push(&self, frame: String) -> (PushOutcome, bool) {
        if self.closed.load(Ordering::Acquire) {
            return (PushOutcome::Closed, false);
        }

        let mut frames = self.frames.lock().unwrap_or_else(|poison| poison.into_inner());
        let outcome = if frames.len() >= self.capacity {
            frames.pop_front();
            PushOutcome::DroppedOldest
        } else {
            PushOutcome::Enqueued
        };
        frames.push_back(frame);
        drop(frames);
        self.notify.notify_one();

        let should_close = match outcome {
            PushOutcome::DroppedOldest => {
                let consecutive = self.consecutive_full.fetch_add(1, Ordering::AcqRel) + 1;
                consecutive >= 2
            },
            _ => {
                self.consecutive_full.store(0, Ordering::Release);
                false
            },
        };

        if should_close {
            metrics::counter!(chatcore_metrics::ws::BACKPRESSURE_CLOSES_TOTAL).increment(1);
        }

        (outcome, should_close)
    }

    /// Pop the next frame, waiting if the queue is empty. Returns `None`
    /// once the queue is closed and drained.
    pub async fn recv(&self) -> Option<String> {
        loop {
            {
                let mut frames = self.frames.lock().unwrap_or_else(|poison| poison.into_inner());
                if let Some(frame) = frames.pop_front() {
                    return Some(frame);
                }
                if self.closed.load(Ordering::Acquire) {
                    return None;
                }
            }
            self.notify.notified().await;
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.notify.notify_waiters();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pushes_up_to_capacity_without_dropping() {
        let queue = SendQueue::new(2);
        assert!(matches!(queue.push("a".into()).0, PushOutcome::Enqueued));
        assert!(matches!(queue.push("b".into()).0, PushOutcome::Enqueued));
    }

    #[test]
    fn a_full_queue_drops_the_oldest_frame() {
        let queue = SendQueue::new(1);
        queue.push("a".into());
        let (outcome, should_close) = queue.push("b".into());
        assert!(matches!(outcome, PushOutcome::DroppedOldest));
        assert!(!should_close);
    }

    #[test]
    fn two_consecutive_full_events_signal_close() {
        let queue = SendQueue::new(1);
        queue.push("a".into());
        queue.push("b".into());
        let (_, should_close) = queue.push("c".into());
        assert!(should_close);
    }

    #[test]
    fn an_enqueue_in_between_resets_the_consecutive_counter() {
        let queue = SendQueue::new(2);
        queue.push("a".into());
        queue.push("b".into());
        let (_, first_close) = queue.push("c".into());
        assert!(!first_close);
        let _ = queue.recv_now();
        let (_, second_close) = queue.push("d".into());
        assert!(!second_close);
    }

    impl SendQueue {
        fn recv_now(&self) -> Option<String> {
            self.frames.lock().unwrap().pop_front()
        }
    }

    #[tokio::test]
    async fn recv_returns_none_once_closed_and_drained() {
        let queue = SendQueue::new(2);
        queue.push("a".into());
        queue.close();
        assert_eq!(queue.recv().await, Some("a".to_string()));
        assert_eq!(queue.recv().await, None);
    }
}
