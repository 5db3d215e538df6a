//! Fan-out of one chunk to a snapshot of recipients

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;

use crate::registry::{ConnectionHandle, ConnectionId};
use crate::stats::RelayMetrics;

/// Result of delivering one chunk to a snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Recipients that received the whole chunk
    pub delivered: usize,
    /// Recipients whose write failed or timed out
    pub failed: usize,
    /// Recipients already closing when their turn came
    pub skipped: usize,
}

/// Write `chunk` to every recipient, in order
///
/// A failed write is contained to its destination: the destination is asked
/// to terminate and delivery continues with the next recipient. Nothing about
/// a destination's failure reaches the sender.
pub async fn broadcast(
    sender: ConnectionId,
    recipients: &[Arc<ConnectionHandle>],
    chunk: &Bytes,
    write_timeout: Option<Duration>,
    metrics: &RelayMetrics,
) -> BroadcastOutcome {
    let mut outcome = BroadcastOutcome::default();

    for recipient in recipients {
        if !recipient.is_active() || recipient.is_terminated() {
            outcome.skipped += 1;
            continue;
        }

        match recipient.send(chunk, write_timeout).await {
            Ok(()) => {
                outcome.delivered += 1;
                metrics.chunk_relayed(chunk.len());
            }
            Err(e) => {
                outcome.failed += 1;
                metrics.write_failed();
                recipient.terminate();

                tracing::debug!(
                    sender = %sender,
                    recipient = %recipient.id(),
                    error = %e,
                    "Broadcast write failed"
                );
            }
        }
    }

    outcome
}
