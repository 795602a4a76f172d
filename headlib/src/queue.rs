use crossbeam_channel::{Receiver, Sender};

use crate::protocol::MotorTelemetry;

/// An unbounded FIFO of telemetry snapshots, shared between the reader
/// thread (producer) and whoever displays them (consumers).
///
/// Clones share the same queue. Nothing here ever blocks.
#[derive(Debug, Clone)]
pub struct TelemetryQueue {
    tx: Sender<MotorTelemetry>,
    rx: Receiver<MotorTelemetry>,
}

impl TelemetryQueue {
    pub fn new() -> Self {
        let (tx, rx) = crossbeam_channel::unbounded();
        Self { tx, rx }
    }

    /// Add a snapshot to the back of the queue.
    pub fn push(&self, telemetry: MotorTelemetry) {
        // we hold a receiver, so the channel is never disconnected
        let _ = self.tx.send(telemetry);
    }

    /// Take the oldest snapshot, if there is one.
    pub fn try_pop(&self) -> Option<MotorTelemetry> {
        self.rx.try_recv().ok()
    }

    /// Take every snapshot queued right now, oldest first.
    ///
    /// Snapshots that arrive while draining are left for the next call,
    /// so a fast producer cannot keep a consumer here forever.
    pub fn drain(&self) -> impl Iterator<Item = MotorTelemetry> + '_ {
        let available = self.rx.len();
        self.rx.try_iter().take(available)
    }

    /// Drain the queue, keeping only the newest snapshot.
    pub fn latest(&self) -> Option<MotorTelemetry> {
        self.drain().last()
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

impl Default for TelemetryQueue {
    fn default() -> Self {
        Self::new()
    }
}
