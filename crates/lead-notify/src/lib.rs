//! Outbound delivery for accepted leads: one `ChannelSender` per channel
//! (email, webhook), dispatched by a ticker-driven worker that claims
//! batches from the outbox and applies the retry/backoff policy.

pub mod email;
pub mod webhook;
pub mod worker;

use async_trait::async_trait;
use lead_domain::Lead;

/// A delivery channel. Implementations are expected to be cheap to clone
/// (wrap an `Arc` internally) since the worker holds one per channel for
/// its whole lifetime.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    fn channel(&self) -> lead_domain::Channel;

    async fn send(&self, lead: &Lead) -> anyhow::Result<()>;
}

pub use email::{EmailConfig, EmailSender};
pub use webhook::{WebhookConfig, WebhookSender};
pub use worker::OutboxWorker;
