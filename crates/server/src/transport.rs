//! Chat transport seam and the inbound pump.
//!
//! The pipeline is transport-agnostic: anything that can produce
//! utterances and deliver replies plugs in here. The default binary runs
//! with the no-op transport and still serves deferred-job delivery
//! through the tick loop.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use herald_agent::runtime::{OutboundMessage, Runtime};
use herald_core::Utterance;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("transport failed to connect: {0}")]
    Connect(String),
    #[error("transport read failed: {0}")]
    Receive(String),
    #[error("transport delivery failed: {0}")]
    Deliver(String),
}

#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn connect(&self) -> Result<(), TransportError>;
    /// The next inbound utterance. `Ok(None)` means the stream is closed.
    async fn next_utterance(&self) -> Result<Option<Utterance>, TransportError>;
    async fn deliver(&self, message: &OutboundMessage) -> Result<(), TransportError>;
}

/// Accepts nothing and delivers into the void. Stands in wherever no real
/// platform is wired up.
#[derive(Default)]
pub struct NoopTransport;

#[async_trait]
impl ChatTransport for NoopTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_utterance(&self) -> Result<Option<Utterance>, TransportError> {
        Ok(None)
    }

    async fn deliver(&self, _message: &OutboundMessage) -> Result<(), TransportError> {
        Ok(())
    }
}

/// In-process transport over tokio channels. Used by tests and embedders.
pub struct ChannelTransport {
    inbound: Mutex<mpsc::Receiver<Utterance>>,
    outbound: mpsc::UnboundedSender<OutboundMessage>,
}

impl ChannelTransport {
    pub fn new() -> (Self, mpsc::Sender<Utterance>, mpsc::UnboundedReceiver<OutboundMessage>) {
        let (in_tx, in_rx) = mpsc::channel(64);
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        (Self { inbound: Mutex::new(in_rx), outbound: out_tx }, in_tx, out_rx)
    }
}

#[async_trait]
impl ChatTransport for ChannelTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        Ok(())
    }

    async fn next_utterance(&self) -> Result<Option<Utterance>, TransportError> {
        Ok(self.inbound.lock().await.recv().await)
    }

    async fn deliver(&self, message: &OutboundMessage) -> Result<(), TransportError> {
        self.outbound
            .send(message.clone())
            .map_err(|err| TransportError::Deliver(err.to_string()))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self { max_retries: 5, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl ReconnectPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Pumps utterances from the transport into the runtime and replies back
/// out. Transport failures reconnect with exponential backoff; an
/// exhausted retry budget ends the pump without crashing the process.
pub struct TransportRunner {
    transport: Arc<dyn ChatTransport>,
    runtime: Arc<Mutex<Runtime>>,
    reconnect_policy: ReconnectPolicy,
}

impl TransportRunner {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        runtime: Arc<Mutex<Runtime>>,
        reconnect_policy: ReconnectPolicy,
    ) -> Self {
        Self { transport, runtime, reconnect_policy }
    }

    pub async fn run(&self) -> Result<()> {
        for attempt in 0..=self.reconnect_policy.max_retries {
            match self.connect_and_pump().await {
                Ok(()) => return Ok(()),
                Err(transport_error) => {
                    warn!(
                        attempt,
                        max_retries = self.reconnect_policy.max_retries,
                        error = %transport_error,
                        "transport failed"
                    );
                    if attempt >= self.reconnect_policy.max_retries {
                        warn!("transport retries exhausted; continuing without inbound pump");
                        return Ok(());
                    }
                    let delay = self.reconnect_policy.backoff(attempt);
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
        Ok(())
    }

    async fn connect_and_pump(&self) -> Result<(), TransportError> {
        self.transport.connect().await?;
        info!(event_name = "system.transport.connected", "transport connected");

        while let Some(utterance) = self.transport.next_utterance().await? {
            let (replies, pending) = {
                let mut runtime = self.runtime.lock().await;
                runtime.handle(&utterance, Utc::now()).await
            };
            for text in replies {
                let message = OutboundMessage {
                    actor: utterance.actor.clone(),
                    context: utterance.context.clone(),
                    text,
                };
                self.transport.deliver(&message).await?;
            }
            if let Some(pending) = pending {
                // The provider round-trip runs with the runtime unlocked
                // so the tick loop keeps moving behind a slow model.
                let raw = pending.fetch().await;
                let outbound = {
                    let mut runtime = self.runtime.lock().await;
                    runtime.absorb_completion(pending, raw, Utc::now()).await
                };
                if let Some(message) = outbound {
                    self.transport.deliver(&message).await?;
                }
            }
        }

        debug!(event_name = "system.transport.closed", "inbound stream ended");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use chrono::Utc;
    use herald_core::config::{AppConfig, LoadOptions};
    use herald_core::Utterance;

    use crate::bootstrap::bootstrap;

    use super::{ChannelTransport, ChatTransport, ReconnectPolicy, TransportRunner};

    #[test]
    fn backoff_doubles_and_caps() {
        let policy = ReconnectPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(250));
        assert_eq!(policy.backoff(1), Duration::from_millis(500));
        assert_eq!(policy.backoff(2), Duration::from_millis(1000));
        assert_eq!(policy.backoff(10), Duration::from_millis(5000));
    }

    #[tokio::test]
    async fn channel_transport_pumps_a_reply_back_out() {
        let config = AppConfig::load(LoadOptions {
            config_path: Some("/nonexistent/herald.toml".into()),
            ..LoadOptions::default()
        })
        .unwrap();
        let app = bootstrap(config).unwrap();

        let (transport, in_tx, mut out_rx) = ChannelTransport::new();
        let transport: Arc<dyn ChatTransport> = Arc::new(transport);
        let runner = TransportRunner::new(transport, app.runtime, ReconnectPolicy::default());

        in_tx.send(Utterance::new("u-1", "c-1", "help", Utc::now())).await.unwrap();
        drop(in_tx);
        runner.run().await.unwrap();

        let reply = out_rx.recv().await.unwrap();
        assert!(reply.text.contains("send_dm"));
    }

    #[test]
    fn large_attempt_counts_do_not_overflow() {
        let policy = ReconnectPolicy {
            max_retries: 100,
            base_delay_ms: u64::MAX / 2,
            max_delay_ms: 1_000,
        };
        assert_eq!(policy.backoff(60), Duration::from_millis(1_000));
    }
}
