//! Event stream between the engine and its observers.
//!
//! The engine publishes typed [`SimEvent`]s through an [`EventSink`] it is
//! constructed with. Observers pull from their own [`EventStream`] and stop
//! observing simply by dropping it. Publishing never blocks: with no readers
//! events are discarded, and a reader that falls behind loses the oldest
//! events rather than stalling the simulation.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::entity::EntityRef;
use crate::mechanic::RepairOutcome;
use crate::rig::RigStatus;

/// Severity of a free-form log event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Info,
    Warn,
}

/// A state change or log line published by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SimEvent {
    SimulationStarted,
    SimulationStopped,
    FireStarted {
        rig: EntityRef,
        severity: u8,
    },
    StorageChanged {
        rig: EntityRef,
        storage: f64,
        capacity: f64,
    },
    /// Storage has just crossed the shipment threshold.
    ReadyForShipment {
        rig: EntityRef,
        storage: f64,
    },
    StatusChanged {
        rig: EntityRef,
        from: RigStatus,
        to: RigStatus,
    },
    RepairStarted {
        mechanic: EntityRef,
        rig: EntityRef,
    },
    /// Emitted when a repair task ends, whether it finished or was cancelled.
    RepairCompleted {
        mechanic: EntityRef,
        rig: EntityRef,
        outcome: RepairOutcome,
    },
    LoadingCompleted {
        loader: EntityRef,
        rig: EntityRef,
        amount: f64,
    },
    TransportCompleted {
        loader: EntityRef,
        amount: f64,
    },
    Log {
        level: LogLevel,
        message: String,
    },
}

/// Publishing half of the event stream. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    tx: broadcast::Sender<SimEvent>,
}

impl EventSink {
    /// Create a sink whose readers buffer up to `capacity` events each.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Publish an event to every current reader.
    pub fn emit(&self, event: SimEvent) {
        debug!(?event, "event");
        // No readers is fine: nobody is watching.
        let _ = self.tx.send(event);
    }

    /// Publish an informational log line.
    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        info!("{message}");
        let _ = self.tx.send(SimEvent::Log {
            level: LogLevel::Info,
            message,
        });
    }

    /// Publish a warning log line.
    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        warn!("{message}");
        let _ = self.tx.send(SimEvent::Log {
            level: LogLevel::Warn,
            message,
        });
    }

    /// Open a new reader that sees every event published from now on.
    #[must_use]
    pub fn subscribe(&self) -> EventStream {
        EventStream {
            rx: self.tx.subscribe(),
            skipped: 0,
        }
    }

    /// Number of live readers.
    #[must_use]
    pub fn reader_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Reading half of the event stream.
#[derive(Debug)]
pub struct EventStream {
    rx: broadcast::Receiver<SimEvent>,
    skipped: u64,
}

impl EventStream {
    /// Wait for the next event. Returns `None` once the engine is gone.
    pub async fn next(&mut self) -> Option<SimEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) => return Some(event),
                Err(broadcast::error::RecvError::Lagged(n)) => self.record_lag(n),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Take the next buffered event without waiting.
    pub fn try_next(&mut self) -> Option<SimEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) => return Some(event),
                Err(broadcast::error::TryRecvError::Lagged(n)) => self.record_lag(n),
                Err(_) => return None,
            }
        }
    }

    /// Take every buffered event without waiting.
    pub fn drain(&mut self) -> Vec<SimEvent> {
        std::iter::from_fn(|| self.try_next()).collect()
    }

    /// Total number of events this reader lost by falling behind.
    #[must_use]
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    fn record_lag(&mut self, n: u64) {
        warn!(skipped = n, "event reader lagging, oldest events dropped");
        self.skipped += n;
    }
}
