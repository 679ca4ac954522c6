//! Radio bridge: owns the serial link and feeds the ingest channel.
//!
//! The bridge moves through `Disconnected → Resolving → Open`. Any link
//! error drops the frame stream, marks the link `Disconnected` and retries
//! resolve/open with capped exponential backoff. Frames are pushed onto an
//! unbounded channel, so the link is never held up by the pipeline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use radiobus_bridge_framework::LinkStatus;
use tokio::sync::mpsc::UnboundedSender;

use super::LinkError;
use super::frame::RadioFrame;
use super::link::{FrameStream, LinkOpener};
use super::port::{PortInfo, PortResolver};
use crate::pipeline::IngestItem;
use crate::state::GatewayState;

/// Reconnect timing.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
    /// Give up after this many consecutive failures. `None` retries forever.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_attempts: None,
        }
    }
}

/// Delay sequence for one reconnect episode.
#[derive(Debug, Clone)]
pub struct Backoff {
    policy: ReconnectPolicy,
    next: Duration,
    attempts: u32,
}

impl Backoff {
    pub fn new(policy: ReconnectPolicy) -> Self {
        Self {
            next: policy.initial_delay,
            policy,
            attempts: 0,
        }
    }

    /// Delay before the next attempt, or `None` once attempts are exhausted.
    pub fn next_delay(&mut self) -> Option<Duration> {
        if let Some(max) = self.policy.max_attempts {
            if self.attempts >= max {
                return None;
            }
        }
        self.attempts += 1;

        let delay = self.next.min(self.policy.max_delay);
        self.next = self
            .next
            .mul_f64(self.policy.multiplier)
            .min(self.policy.max_delay);
        Some(delay)
    }

    /// Failures so far in this episode.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}

/// Bridge between the radio link and the ingest channel.
pub struct RadioBridge<R, O> {
    pattern: String,
    resolver: R,
    opener: O,
    policy: ReconnectPolicy,
    state: Arc<GatewayState>,
    tx: UnboundedSender<IngestItem>,
}

impl<R: PortResolver, O: LinkOpener> RadioBridge<R, O> {
    pub fn new(
        pattern: impl Into<String>,
        resolver: R,
        opener: O,
        policy: ReconnectPolicy,
        state: Arc<GatewayState>,
        tx: UnboundedSender<IngestItem>,
    ) -> Self {
        Self {
            pattern: pattern.into(),
            resolver,
            opener,
            policy,
            state,
            tx,
        }
    }

    /// Find the port whose hardware id matches the configured pattern.
    pub fn resolve_port(&self) -> Result<PortInfo, LinkError> {
        self.resolver.resolve(&self.pattern)
    }

    /// Open a port and start decoding frames.
    pub async fn open(&self, port: &PortInfo) -> Result<FrameStream, LinkError> {
        self.opener.open(port).await
    }

    /// Handle one frame from the link.
    ///
    /// Returns `false` once the pipeline has gone away.
    pub fn on_frame_received(&self, frame: RadioFrame) -> bool {
        let mac = frame.source_hex();
        let is_first_seen = self.state.note_address(&mac);
        if is_first_seen {
            tracing::info!(mac = %mac, "New radio heard");
        }
        self.state.health().record_frame(&mac);

        tracing::trace!(mac = %mac, bytes = frame.payload.len(), "Frame received");

        self.tx
            .send(IngestItem {
                mac_address: mac,
                payload: frame.payload,
                is_first_seen,
                received_at: Utc::now(),
            })
            .is_ok()
    }

    /// Handle a link failure.
    pub fn on_link_error(&self, error: &LinkError) {
        self.state.set_link_status(LinkStatus::Disconnected);
        tracing::warn!(error = %error, "Radio link lost");
    }

    async fn try_open(
        &self,
        candidate: Option<PortInfo>,
    ) -> Result<(PortInfo, FrameStream), LinkError> {
        let port = match candidate {
            Some(port) => port,
            None => {
                self.state.set_link_status(LinkStatus::Resolving);
                self.resolve_port()?
            }
        };
        let stream = self.open(&port).await?;
        Ok((port, stream))
    }

    /// Resolve and open until a link is up. `None` if the pipeline went away.
    async fn establish(
        &self,
        initial: Option<PortInfo>,
    ) -> Result<Option<FrameStream>, LinkError> {
        let mut backoff = Backoff::new(self.policy.clone());
        let mut candidate = initial;

        loop {
            if self.tx.is_closed() {
                return Ok(None);
            }

            match self.try_open(candidate.take()).await {
                Ok((port, stream)) => {
                    tracing::info!(
                        port = %port.name,
                        hardware_id = %port.hardware_id,
                        "Radio link open"
                    );
                    return Ok(Some(stream));
                }
                Err(e) => {
                    self.state.set_link_status(LinkStatus::Disconnected);
                    let Some(delay) = backoff.next_delay() else {
                        tracing::error!(
                            error = %e,
                            attempts = backoff.attempts(),
                            "Giving up on radio link"
                        );
                        return Err(e);
                    };
                    tracing::warn!(
                        error = %e,
                        attempt = backoff.attempts(),
                        delay_ms = delay.as_millis() as u64,
                        "Radio link unavailable, retrying"
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.tx.closed() => return Ok(None),
                    }
                }
            }
        }
    }

    /// Forward frames until the link fails (`Err`) or the pipeline is gone (`Ok`).
    async fn pump(&self, mut stream: FrameStream) -> Result<(), LinkError> {
        loop {
            tokio::select! {
                _ = self.tx.closed() => return Ok(()),
                next = stream.next() => match next {
                    Some(Ok(frame)) => {
                        if !self.on_frame_received(frame) {
                            return Ok(());
                        }
                    }
                    Some(Err(e)) => return Err(e.into()),
                    None => return Err(LinkError::Closed),
                },
            }
        }
    }

    /// Run the bridge until the ingest channel closes.
    ///
    /// `initial` is a port already resolved at startup. Returns an error
    /// only when reconnect attempts are exhausted.
    pub async fn run(self, initial: Option<PortInfo>) -> Result<(), LinkError> {
        let mut candidate = initial;
        let mut opened_before = false;

        loop {
            let Some(stream) = self.establish(candidate.take()).await? else {
                break;
            };
            if opened_before {
                self.state.health().record_reconnect();
            }
            opened_before = true;
            self.state.set_link_status(LinkStatus::Open);

            match self.pump(stream).await {
                Ok(()) => break,
                Err(e) => self.on_link_error(&e),
            }
        }

        self.state.set_link_status(LinkStatus::Disconnected);
        tracing::info!("Ingest channel closed, radio bridge stopping");
        Ok(())
    }
}
