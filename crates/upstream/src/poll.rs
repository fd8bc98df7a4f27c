//! Live poll runtime for one upstream entry: the socket task that dials
//! the peer, the ping schedule, and the per-poll pending-action slot.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;

use lattice_domain::config::UpstreamConfig;
use lattice_protocol::{WsMessage, PROTOCOL_VERSION};

use crate::action::UpstreamAction;
use crate::settings::UpstreamSettings;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Timers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Ping cadence and reconnect bounds for a poll.
#[derive(Debug, Clone)]
pub struct PollTimers {
    pub ping_initial: Duration,
    pub ping_interval: Duration,
    pub reconnect_initial: Duration,
    pub reconnect_max: Duration,
}

impl Default for PollTimers {
    fn default() -> Self {
        Self::from(&UpstreamConfig::default())
    }
}

impl From<&UpstreamConfig> for PollTimers {
    fn from(config: &UpstreamConfig) -> Self {
        Self {
            ping_initial: Duration::from_millis(config.ping_initial_ms),
            ping_interval: Duration::from_millis(config.ping_interval_ms),
            reconnect_initial: Duration::from_millis(config.reconnect_initial_ms),
            reconnect_max: Duration::from_millis(config.reconnect_max_ms),
        }
    }
}

impl PollTimers {
    /// Delay before reconnect attempt `attempt` (0-indexed): the initial
    /// delay doubles per attempt until it hits the cap, plus an offset of
    /// up to a quarter of the base so entries that lost the same peer do
    /// not redial in lockstep.
    fn reconnect_delay(&self, attempt: u32) -> Duration {
        let cap_ms = self.reconnect_max.as_millis() as u64;
        let base_ms = (self.reconnect_initial.as_millis() as u64)
            .saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX))
            .min(cap_ms);

        // Stateless per-attempt scramble (xorshift); only has to spread
        // redial instants, not be uniform.
        let mut seed = u64::from(attempt) + 1;
        seed ^= seed << 13;
        seed ^= seed >> 7;
        seed ^= seed << 17;

        let spread_ms = base_ms / 4;
        let offset_ms = if spread_ms == 0 { 0 } else { seed % spread_ms };
        Duration::from_millis(base_ms + offset_ms)
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Ping handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Seam for the periodic keep-alive. A poll configured without one uses
/// [`LinkPing`].
#[async_trait::async_trait]
pub trait PingHandler: Send + Sync + 'static {
    async fn ping(&self, outbound: &mpsc::Sender<WsMessage>);
}

/// Generic link ping: the protocol `ping` envelope with the current time.
pub struct LinkPing;

#[async_trait::async_trait]
impl PingHandler for LinkPing {
    async fn ping(&self, outbound: &mpsc::Sender<WsMessage>) {
        let _ = outbound
            .send(WsMessage::Ping {
                timestamp: Utc::now().timestamp_millis(),
            })
            .await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Poll status
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Connection status cell, written by the socket task and read by the
/// broker when listing upstreams.
#[derive(Debug, Clone, Default)]
pub struct PollStatus {
    pub connected: bool,
    pub session_id: Option<String>,
    pub connected_at: Option<DateTime<Utc>>,
    pub last_pong: Option<DateTime<Utc>>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// UpstreamPoll
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The runtime paired 1:1 with a live upstream entry.
///
/// Owns the socket task and its cancellation token; the entry holds this
/// object through the runtime node, never the other way around. Teardown
/// order is always poll → socket/ping → entry.
pub struct UpstreamPoll {
    name: String,
    settings: UpstreamSettings,
    status: Arc<RwLock<PollStatus>>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
    pending_action: Option<UpstreamAction>,
}

impl UpstreamPoll {
    /// Start the socket task for `settings` and return its handle.
    pub fn spawn(settings: UpstreamSettings, timers: PollTimers) -> Self {
        Self::spawn_with_ping(settings, timers, Arc::new(LinkPing))
    }

    pub fn spawn_with_ping(
        settings: UpstreamSettings,
        timers: PollTimers,
        ping: Arc<dyn PingHandler>,
    ) -> Self {
        let status = Arc::new(RwLock::new(PollStatus::default()));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_link(
            settings.clone(),
            timers,
            status.clone(),
            ping,
            cancel.clone(),
        ));
        Self {
            name: settings.name.clone(),
            settings,
            status,
            cancel,
            task: Some(task),
            pending_action: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn settings(&self) -> &UpstreamSettings {
        &self.settings
    }

    pub fn status(&self) -> PollStatus {
        self.status.read().clone()
    }

    pub fn pending_action(&self) -> Option<UpstreamAction> {
        self.pending_action
    }

    /// Record a deferred action. Multiple schedules between drains
    /// collapse last-writer-wins.
    pub fn set_pending_action(&mut self, action: UpstreamAction) {
        self.pending_action = Some(action);
    }

    pub fn take_pending_action(&mut self) -> Option<UpstreamAction> {
        self.pending_action.take()
    }

    /// Cancel the socket task and wait for it to unwind. An in-flight
    /// connection attempt observes the cancellation at its next suspension
    /// point and aborts cleanly.
    pub async fn shutdown(mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
        tracing::debug!(name = %self.name, "upstream poll stopped");
    }
}

impl Drop for UpstreamPoll {
    fn drop(&mut self) {
        self.cancel.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Socket task
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn run_link(
    settings: UpstreamSettings,
    timers: PollTimers,
    status: Arc<RwLock<PollStatus>>,
    ping: Arc<dyn PingHandler>,
    cancel: CancellationToken,
) {
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return;
        }

        let result = tokio::select! {
            r = connect_once(&settings, &timers, &status, &ping) => r,
            _ = cancel.cancelled() => return,
        };

        {
            let mut status = status.write();
            status.connected = false;
            status.session_id = None;
        }

        match result {
            Ok(()) => {
                tracing::info!(name = %settings.name, "upstream connection closed");
                attempt = 0;
            }
            Err(e) => {
                tracing::warn!(name = %settings.name, attempt, error = %e,
                    "upstream connection lost");
            }
        }

        let delay = timers.reconnect_delay(attempt);
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = cancel.cancelled() => return,
        }
        attempt = attempt.saturating_add(1);
    }
}

/// Single connection lifecycle: dial → hello → welcome → ping/read loop.
async fn connect_once(
    settings: &UpstreamSettings,
    timers: &PollTimers,
    status: &Arc<RwLock<PollStatus>>,
    ping: &Arc<dyn PingHandler>,
) -> Result<(), anyhow::Error> {
    tracing::info!(name = %settings.name, url = %settings.url, "dialing upstream");
    let (ws, _response) = tokio_tungstenite::connect_async(&settings.url).await?;
    let (mut sink, mut stream) = ws.split();

    let hello = WsMessage::LinkHello {
        protocol_version: PROTOCOL_VERSION,
        broker_name: settings.broker_name.clone(),
        token: (!settings.token.is_empty()).then(|| settings.token.clone()),
        group: (!settings.group.is_empty()).then(|| settings.group.clone()),
    };
    sink.send(Message::Text(serde_json::to_string(&hello)?)).await?;

    let welcome = tokio::time::timeout(Duration::from_secs(10), async {
        while let Some(Ok(msg)) = stream.next().await {
            if let Message::Text(text) = msg {
                if let Ok(WsMessage::BrokerWelcome { session_id, version }) =
                    serde_json::from_str(&text)
                {
                    return Ok((session_id, version));
                }
            }
        }
        Err(anyhow::anyhow!("connection closed before welcome"))
    })
    .await
    .map_err(|_| anyhow::anyhow!("welcome timeout"))??;

    let (session_id, peer_version) = welcome;
    tracing::info!(name = %settings.name, session_id = %session_id,
        peer_version = %peer_version, "upstream welcomed us");
    {
        let mut status = status.write();
        status.connected = true;
        status.session_id = Some(session_id);
        status.connected_at = Some(Utc::now());
    }

    // Writer task so the ping schedule and the reader never contend for
    // the sink.
    let (outbound_tx, mut outbound_rx) = mpsc::channel::<WsMessage>(64);
    let writer = tokio::spawn(async move {
        while let Some(msg) = outbound_rx.recv().await {
            let json = match serde_json::to_string(&msg) {
                Ok(json) => json,
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize outbound message");
                    continue;
                }
            };
            if sink.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    // First fire after ping_initial, then every ping_interval.
    let mut ping_timer = tokio::time::interval_at(
        tokio::time::Instant::now() + timers.ping_initial,
        timers.ping_interval,
    );
    ping_timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ping_timer.tick() => {
                ping.ping(&outbound_tx).await;
            }
            msg = stream.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<WsMessage>(&text) {
                            Ok(WsMessage::Ping { timestamp }) => {
                                let _ = outbound_tx.send(WsMessage::Pong { timestamp }).await;
                            }
                            Ok(WsMessage::Pong { .. }) => {
                                status.write().last_pong = Some(Utc::now());
                            }
                            Ok(_) => {}
                            Err(e) => {
                                tracing::debug!(name = %settings.name, error = %e,
                                    "ignoring unparseable upstream message");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        writer.abort();
                        return Err(e.into());
                    }
                }
            }
        }
    }

    writer.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> UpstreamSettings {
        UpstreamSettings {
            name: "u1".into(),
            broker_name: "edge".into(),
            url: "ws://127.0.0.1:1/conn".into(),
            token: String::new(),
            group: String::new(),
            enabled: true,
        }
    }

    #[test]
    fn reconnect_delay_grows_and_caps() {
        let timers = PollTimers::default();
        let d0 = timers.reconnect_delay(0);
        let d2 = timers.reconnect_delay(2);
        assert!(d2 > d0);
        // 60s cap + 25% jitter.
        assert!(timers.reconnect_delay(30) <= Duration::from_millis(75_000));
    }

    #[tokio::test]
    async fn pending_action_collapses_last_writer_wins() {
        let mut poll = UpstreamPoll::spawn(settings(), PollTimers::default());
        poll.set_pending_action(UpstreamAction::Stop);
        poll.set_pending_action(UpstreamAction::Delete);
        assert_eq!(poll.take_pending_action(), Some(UpstreamAction::Delete));
        assert_eq!(poll.take_pending_action(), None);
        poll.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_aborts_a_dialing_poll() {
        // Nothing listens on the URL; the task is mid connect/backoff when
        // we cancel, and shutdown must still return promptly.
        let poll = UpstreamPoll::spawn(settings(), PollTimers::default());
        tokio::time::timeout(Duration::from_secs(5), poll.shutdown())
            .await
            .expect("shutdown did not observe cancellation");
    }
}
