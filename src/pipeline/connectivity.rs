//! Driving the pipeline from network availability
//!
//! The connectivity collaborator publishes its view of the network on a
//! `watch` channel. Streaming comes up when the camera joins a network and
//! goes down when it falls back to offline or access-point mode.

use std::fmt;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::lifecycle::Pipeline;
use crate::dispatch::DeliveryHandler;
use crate::error::Result;

/// Network availability as seen by the connectivity collaborator
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Connectivity {
    /// Station mode with an address; viewers can reach us
    Online,
    /// No usable network
    Offline,
}

impl fmt::Display for Connectivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Connectivity::Online => f.write_str("online"),
            Connectivity::Offline => f.write_str("offline"),
        }
    }
}

impl<H: DeliveryHandler> Pipeline<H> {
    /// Start on `Online`, stop on `Offline`
    pub async fn apply_connectivity(&self, status: Connectivity) -> Result<()> {
        match status {
            Connectivity::Online => self.start().await,
            Connectivity::Offline => {
                self.stop().await;
                Ok(())
            }
        }
    }

    /// Follow a connectivity channel until its sender is dropped
    ///
    /// The current value is applied immediately. Repeated or flapping
    /// updates are harmless because start and stop are idempotent.
    pub fn follow_connectivity(
        self: &Arc<Self>,
        mut status: watch::Receiver<Connectivity>,
    ) -> JoinHandle<()> {
        let pipeline = Arc::clone(self);

        tokio::spawn(async move {
            loop {
                let current = *status.borrow_and_update();
                tracing::debug!(status = %current, "Connectivity update");
                if let Err(e) = pipeline.apply_connectivity(current).await {
                    tracing::error!(status = %current, error = %e, "Failed to apply connectivity");
                }
                if status.changed().await.is_err() {
                    break;
                }
            }
            tracing::debug!("Connectivity channel closed");
        })
    }
}
