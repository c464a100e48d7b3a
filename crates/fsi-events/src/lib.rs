//! Bounded diagnostic/telemetry event channel shared by `fsi-sim` and
//! `fsi-bin`. The simulator is single-threaded per MPI rank (no user-visible
//! threads, no async runtime), so this is a plain `std::sync::mpsc`
//! bounded channel rather than anything tokio-flavored — just enough to
//! decouple "what happened this step" from "how it gets printed/logged".

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{sync_channel, Receiver, SyncSender, TrySendError};

/// Channel capacity: generous relative to one event per simulator step: a
/// stalled consumer should surface as dropped-event telemetry, not as a
/// backpressure stall in the single-threaded step loop.
pub const EVENT_CHANNEL_CAP: usize = 1024;

pub static DOMAIN_WARNINGS_TOTAL: AtomicU64 = AtomicU64::new(0);
pub static STEPS_COMPLETED: AtomicU64 = AtomicU64::new(0);
pub static EVENTS_DROPPED: AtomicU64 = AtomicU64::new(0);

/// Per-step diagnostic and error events a `FlowSimulator` reports through
/// its event channel, matching §7's non-fatal `DomainError` and the
/// per-step diagnostics named in §4.10.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// A marker's position fell outside the global domain this step.
    /// Non-fatal: the coupling continues with clamped sampling.
    DomainWarning {
        step: u64,
        marker_index: usize,
        position: Vec<f64>,
    },
    /// End-of-step diagnostics reduced across every rank.
    StepDiagnostics {
        step: u64,
        max_vorticity: f64,
        l2_grid_deviation: f64,
    },
}

/// The sending half of the event channel, held by `FlowSimulator`.
#[derive(Clone)]
pub struct EventSender {
    tx: SyncSender<Event>,
}

impl EventSender {
    /// Sends `event`, and logs+counts a drop rather than blocking the step
    /// loop if the channel is full or the receiver has gone away —
    /// diagnostics must never be able to stall the simulation.
    pub fn send(&self, event: Event) {
        if let Event::DomainWarning { .. } = &event {
            DOMAIN_WARNINGS_TOTAL.fetch_add(1, Ordering::Relaxed);
        }
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                EVENTS_DROPPED.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Constructs a bounded event channel. The sender half is cheap to clone
/// and handed to every `ImmersedBodyFlowInteraction` a simulator owns; the
/// receiver is drained once per step by the caller (typically `fsi-bin`).
pub fn channel() -> (EventSender, Receiver<Event>) {
    let (tx, rx) = sync_channel(EVENT_CHANNEL_CAP);
    (EventSender { tx }, rx)
}

/// Reports a domain warning through both the event channel and, if this
/// rank is the simulation's master, the `tracing` logger — matching §7's
/// "non-fatal DomainError is reported via the logger on the master rank
/// only" rule.
pub fn report_domain_warning(
    sender: &EventSender,
    is_master: bool,
    step: u64,
    marker_index: usize,
    position: &[f64],
) {
    if is_master {
        tracing::warn!(
            step,
            marker_index,
            ?position,
            "marker left the global domain; sampling clamped"
        );
    }
    sender.send(Event::DomainWarning {
        step,
        marker_index,
        position: position.to_vec(),
    });
}
