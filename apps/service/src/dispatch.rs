//! Report delivery to the current subscriber list.
//!
//! A recipient fetch failure is the only `Err` a dispatch returns.
//! Per-recipient send failures are collected in [`DispatchSummary::failures`].

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{DispatchError, StoreError, TransportError};
use crate::monitoring::Report;

/// Opaque destination identifier owned by the recipient store
pub type Recipient = String;

/// Where subscribers live
#[async_trait]
pub trait RecipientStore: Send + Sync {
    /// Subscribe a recipient, no-op if already present
    async fn add_recipient(&self, recipient: &str) -> Result<(), StoreError>;

    /// Unsubscribe a recipient, no-op if absent
    async fn remove_recipient(&self, recipient: &str) -> Result<(), StoreError>;

    /// Current subscribers in store order
    async fn list_recipients(&self) -> Result<Vec<Recipient>, StoreError>;
}

/// Message delivery channel
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, recipient: &str, text: &str) -> Result<(), TransportError>;
}

/// Timing knobs for a dispatch run
#[derive(Debug, Clone, Copy)]
pub struct DispatchConfig {
    /// Upper bound for fetching the recipient list
    pub fetch_timeout: Duration,
    /// Pause between two consecutive sends
    pub pacing: Duration,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { fetch_timeout: Duration::from_secs(5), pacing: Duration::from_millis(100) }
    }
}

/// Outcome of a dispatch run that got past the recipient fetch
#[derive(Debug, Default)]
pub struct DispatchSummary {
    pub attempted: usize,
    pub delivered: usize,
    pub failures: Vec<(Recipient, TransportError)>,
    /// Set when cancellation cut the batch short
    pub cancelled: bool,
}

pub struct Dispatcher {
    store: Arc<dyn RecipientStore>,
    transport: Arc<dyn Transport>,
    config: DispatchConfig,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn RecipientStore>,
        transport: Arc<dyn Transport>,
        config: DispatchConfig,
    ) -> Self {
        Self { store, transport, config }
    }

    /// Send `report` to every current recipient, in store order
    pub async fn dispatch_report(
        &self,
        report: &Report,
        cancel: &CancellationToken,
    ) -> Result<DispatchSummary, DispatchError> {
        let recipients = match tokio::time::timeout(self.config.fetch_timeout, self.store.list_recipients()).await {
            Ok(Ok(recipients)) => recipients,
            Ok(Err(e)) => {
                warn!("Failed to fetch recipients: {}", e);
                return Err(DispatchError::FetchRecipients(e));
            }
            Err(_) => {
                let e = StoreError::Timeout(self.config.fetch_timeout);
                warn!("Failed to fetch recipients: {}", e);
                return Err(DispatchError::FetchRecipients(e));
            }
        };

        debug!(count = recipients.len(), "Dispatching report");

        let mut summary = DispatchSummary::default();
        for (index, recipient) in recipients.iter().enumerate() {
            let proceed = if index == 0 {
                !cancel.is_cancelled()
            } else {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => false,
                    _ = tokio::time::sleep(self.config.pacing) => true,
                }
            };
            if !proceed {
                info!(remaining = recipients.len() - index, "Dispatch cancelled");
                summary.cancelled = true;
                break;
            }

            summary.attempted += 1;
            match self.transport.send(recipient, report.as_str()).await {
                Ok(()) => summary.delivered += 1,
                Err(e) => {
                    warn!(recipient = %recipient, "Error sending report: {}", e);
                    summary.failures.push((recipient.clone(), e));
                }
            }
        }

        info!(
            attempted = summary.attempted,
            delivered = summary.delivered,
            failed = summary.failures.len(),
            "Report dispatch finished"
        );
        Ok(summary)
    }
}
