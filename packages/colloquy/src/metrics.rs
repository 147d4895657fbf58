//! Counters for the protocol's deliberately silent drop paths.
//!
//! The wire tolerance policy (malformed frames dropped, sends discarded
//! while disconnected, stray stream events ignored) is intentional, but
//! it should never be invisible. Every silent drop increments a counter
//! here alongside a `tracing` line.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Engine-wide counters. Shared between the session state machine and the
/// connection actor via `Arc`.
#[derive(Debug, Default)]
pub struct ClientMetrics {
    /// Inbound text frames handed to the router.
    pub frames_received: AtomicU64,
    /// Inbound frames dropped: invalid JSON, missing/unknown `type`, or
    /// a shape mismatch.
    pub frames_rejected: AtomicU64,
    /// Outbound frames written to the socket.
    pub frames_sent: AtomicU64,
    /// Outbound frames discarded because the connection was not open.
    pub sends_suppressed: AtomicU64,
    /// `delta`/`done`/`error` (or a second `start`) arriving with no
    /// matching active turn.
    pub stray_stream_events: AtomicU64,
    /// Caller misuse ignored by guard: empty prompts, prompts submitted
    /// mid-turn, out-of-domain feedback votes.
    pub operations_rejected: AtomicU64,
    /// Assistant turns finalized by `done` or `error`.
    pub turns_completed: AtomicU64,
    /// Replay sequences started.
    pub replays_started: AtomicU64,
}

impl ClientMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn frame_received(&self) {
        self.frames_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_rejected(&self) {
        self.frames_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn frame_sent(&self) {
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn send_suppressed(&self) {
        self.sends_suppressed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn stray_stream_event(&self) {
        self.stray_stream_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn operation_rejected(&self) {
        self.operations_rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn turn_completed(&self) {
        self.turns_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn replay_started(&self) {
        self.replays_started.fetch_add(1, Ordering::Relaxed);
    }

    /// Create a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            frames_received: self.frames_received.load(Ordering::Relaxed),
            frames_rejected: self.frames_rejected.load(Ordering::Relaxed),
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            sends_suppressed: self.sends_suppressed.load(Ordering::Relaxed),
            stray_stream_events: self.stray_stream_events.load(Ordering::Relaxed),
            operations_rejected: self.operations_rejected.load(Ordering::Relaxed),
            turns_completed: self.turns_completed.load(Ordering::Relaxed),
            replays_started: self.replays_started.load(Ordering::Relaxed),
        }
    }
}

/// Serializable snapshot of [`ClientMetrics`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub frames_received: u64,
    pub frames_rejected: u64,
    pub frames_sent: u64,
    pub sends_suppressed: u64,
    pub stray_stream_events: u64,
    pub operations_rejected: u64,
    pub turns_completed: u64,
    pub replays_started: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = ClientMetrics::new();
        metrics.frame_received();
        metrics.frame_received();
        metrics.frame_rejected();
        assert_eq!(metrics.frames_received.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.frames_rejected.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn snapshot_reflects_counters() {
        let metrics = ClientMetrics::new();
        metrics.frame_sent();
        metrics.send_suppressed();
        metrics.turn_completed();

        let snap = metrics.snapshot();
        assert_eq!(snap.frames_sent, 1);
        assert_eq!(snap.sends_suppressed, 1);
        assert_eq!(snap.turns_completed, 1);
        assert_eq!(snap.replays_started, 0);
    }
}
