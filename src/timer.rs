//! Timer contract (spec.md §6) and a `tokio`-backed reference
//! implementation.
//!
//! A real deployment's timer facility is an external collaborator
//! (spec.md §1); `TokioTimerFacility` is the concrete instance this crate
//! ships so `node::Node` is runnable without one.

use crate::wire::{QueueId, SenderId, Source};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::{mpsc, Mutex};

/// Opaque timer handle returned by `add_absolute`/`add_duration`.
pub type TimerHandle = u64;

/// What a timer's expiry means to the executive dispatcher; carried with
/// the event so `node::Node` knows which broadcast to issue
/// (`QueueTimeout`, `MessageGetTimeout`, `SendReceiveTimeout` — spec.md
/// §4.1, §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerContext {
    QueueRetention { queue_id: QueueId },
    MessageGetTimeout { queue_id: QueueId, source: Source },
    SendReceiveTimeout { sender_id: SenderId, source: Source },
}

#[derive(Debug, Clone, Copy)]
pub struct TimerEvent {
    pub handle: TimerHandle,
    pub context: TimerContext,
}

/// Single-shot absolute/duration timers with cancellation (spec.md §6).
#[async_trait]
pub trait TimerFacility: Send + Sync {
    async fn add_absolute(&self, at_ns: i64, context: TimerContext) -> TimerHandle;
    async fn add_duration(&self, duration: Duration, context: TimerContext) -> TimerHandle;
    async fn delete(&self, handle: TimerHandle);
    fn time_now_ns(&self) -> i64;
}

/// `tokio::time::sleep`-backed timer facility. Cancellation is modeled
/// with a generation counter per handle: `delete` bumps the generation,
/// and an expiring sleep task checks its own generation is still current
/// before sending the event, so a timer raced against its own
/// cancellation never delivers a stale expiry.
pub struct TokioTimerFacility {
    next_handle: AtomicU64,
    generations: Arc<Mutex<HashMap<TimerHandle, u64>>>,
    events: mpsc::Sender<TimerEvent>,
}

impl TokioTimerFacility {
    pub fn new(events: mpsc::Sender<TimerEvent>) -> Self {
        Self {
            next_handle: AtomicU64::new(1),
            generations: Arc::new(Mutex::new(HashMap::new())),
            events,
        }
    }

    async fn schedule(&self, duration: Duration, context: TimerContext) -> TimerHandle {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        let generation = {
            let mut gens = self.generations.lock().await;
            gens.insert(handle, 0);
            0
        };
        let generations = self.generations.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let still_live = {
                let gens = generations.lock().await;
                gens.get(&handle).copied() == Some(generation)
            };
            if still_live {
                let _ = events.send(TimerEvent { handle, context }).await;
            }
        });
        handle
    }
}

#[async_trait]
impl TimerFacility for TokioTimerFacility {
    async fn add_absolute(&self, at_ns: i64, context: TimerContext) -> TimerHandle {
        let now = self.time_now_ns();
        let remaining_ns = (at_ns - now).max(0) as u64;
        self.schedule(Duration::from_nanos(remaining_ns), context).await
    }

    async fn add_duration(&self, duration: Duration, context: TimerContext) -> TimerHandle {
        self.schedule(duration, context).await
    }

    async fn delete(&self, handle: TimerHandle) {
        let mut gens = self.generations.lock().await;
        // Removing (rather than just bumping) means a racing expiry's
        // generation lookup returns `None`, never `Some(stale_value)`.
        gens.remove(&handle);
    }

    fn time_now_ns(&self) -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn duration_timer_fires_with_context() {
        let (tx, mut rx) = mpsc::channel(8);
        let facility = TokioTimerFacility::new(tx);
        let ctx = TimerContext::QueueRetention {
            queue_id: QueueId(1),
        };
        facility
            .add_duration(Duration::from_millis(10), ctx)
            .await;

        let event = tokio::time::timeout(Duration::from_secs(1), rx.recv())
            .await
            .expect("timer should fire")
            .expect("channel open");
        assert_eq!(event.context, ctx);
    }

    #[tokio::test]
    async fn cancelled_timer_never_fires() {
        let (tx, mut rx) = mpsc::channel(8);
        let facility = TokioTimerFacility::new(tx);
        let ctx = TimerContext::QueueRetention {
            queue_id: QueueId(1),
        };
        let handle = facility
            .add_duration(Duration::from_millis(20), ctx)
            .await;
        facility.delete(handle).await;

        let result = tokio::time::timeout(Duration::from_millis(100), rx.recv()).await;
        assert!(result.is_err(), "cancelled timer must not deliver an event");
    }
}
