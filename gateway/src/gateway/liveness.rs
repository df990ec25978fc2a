//! Per-connection heartbeat and inactivity tasks.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use ppe_common::{close_code, ServerMessage};

use super::registry::{ConnectionHandle, ConnectionRegistry};
use crate::limiter::LimiterConfig;

/// Why the gateway closes a connection on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    Inactivity,
    ServiceUnavailable,
}

impl CloseReason {
    pub fn code(&self) -> u16 {
        match self {
            CloseReason::Inactivity => close_code::INACTIVITY,
            CloseReason::ServiceUnavailable => close_code::SERVICE_UNAVAILABLE,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            CloseReason::Inactivity => close_code::INACTIVITY_REASON,
            CloseReason::ServiceUnavailable => close_code::SERVICE_UNAVAILABLE_REASON,
        }
    }
}

/// Instructions delivered to a session's outbound loop.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionCommand {
    Send(ServerMessage),
    Close(CloseReason),
}

/// Heartbeat emitter and inactivity sweeper for one connection.
///
/// Both tasks only talk to the session through its command channel, so the
/// session stays the single writer of its socket.
pub struct LivenessMonitor {
    heartbeat: JoinHandle<()>,
    sweeper: JoinHandle<()>,
}

impl LivenessMonitor {
    pub fn start(
        handle: ConnectionHandle,
        registry: Arc<ConnectionRegistry>,
        limits: &LimiterConfig,
        commands: mpsc::Sender<SessionCommand>,
    ) -> Self {
        let heartbeat = tokio::spawn(heartbeat_loop(
            handle,
            registry.clone(),
            limits.heartbeat_interval,
            commands.clone(),
        ));
        let sweeper = tokio::spawn(sweep_loop(
            handle,
            registry,
            limits.sweep_interval,
            limits.inactivity_timeout,
            commands,
        ));

        Self { heartbeat, sweeper }
    }

    /// Stop both tasks and wait until they are gone.
    pub async fn shutdown(self) {
        self.heartbeat.abort();
        self.sweeper.abort();
        let _ = self.heartbeat.await;
        let _ = self.sweeper.await;
    }
}

async fn heartbeat_loop(
    handle: ConnectionHandle,
    registry: Arc<ConnectionRegistry>,
    interval: Duration,
    commands: mpsc::Sender<SessionCommand>,
) {
    let mut ticker = interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if commands
            .send(SessionCommand::Send(ServerMessage::ping()))
            .await
            .is_err()
        {
            break;
        }
        registry.record_ping(&handle).await;
        tracing::trace!(connection = %handle, "Heartbeat sent");
    }
}

async fn sweep_loop(
    handle: ConnectionHandle,
    registry: Arc<ConnectionRegistry>,
    sweep_interval: Duration,
    inactivity_timeout: Duration,
    commands: mpsc::Sender<SessionCommand>,
) {
    let mut ticker = interval_at(Instant::now() + sweep_interval, sweep_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;

        if !registry.contains(&handle).await {
            break;
        }

        let inactive = registry.scan_inactive(Instant::now(), inactivity_timeout).await;
        if inactive.contains(&handle) {
            tracing::info!(
                connection = %handle,
                timeout_secs = inactivity_timeout.as_secs_f64(),
                "Closing inactive connection"
            );
            let _ = commands
                .send(SessionCommand::Close(CloseReason::Inactivity))
                .await;
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::limiter::ResourceLimiter;
    use crate::test_util::test_limits;

    fn limits() -> LimiterConfig {
        let mut limits = test_limits();
        limits.heartbeat_interval = Duration::from_secs(10);
        limits.inactivity_timeout = Duration::from_secs(30);
        limits.sweep_interval = Duration::from_secs(5);
        limits
    }

    async fn admitted() -> (Arc<ConnectionRegistry>, ConnectionHandle) {
        let limiter = Arc::new(ResourceLimiter::new(limits()).unwrap());
        let registry = Arc::new(ConnectionRegistry::new(limiter));
        let handle = registry.admit(None).await.unwrap();
        (registry, handle)
    }

    #[test]
    fn test_close_reasons() {
        assert_eq!(CloseReason::Inactivity.code(), 1000);
        assert_eq!(CloseReason::Inactivity.reason(), "inactivity");
        assert_eq!(CloseReason::ServiceUnavailable.code(), 1011);
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_connection_is_closed() {
        let (registry, handle) = admitted().await;
        let (tx, mut rx) = mpsc::channel(16);
        let start = Instant::now();
        let monitor = LivenessMonitor::start(handle, registry.clone(), &limits(), tx);

        let mut pings = 0;
        loop {
            match rx.recv().await.unwrap() {
                SessionCommand::Send(ServerMessage::Ping { .. }) => pings += 1,
                SessionCommand::Close(reason) => {
                    assert_eq!(reason, CloseReason::Inactivity);
                    break;
                }
                other => panic!("Unexpected command: {:?}", other),
            }
        }

        // pings at 10s, 20s, 30s; closed by the first sweep past 30s
        assert_eq!(pings, 3);
        assert_eq!(start.elapsed(), Duration::from_secs(35));
        assert!(registry.entry(&handle).await.unwrap().last_ping_sent.is_some());

        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_answered_heartbeats_keep_connection_alive() {
        let (registry, handle) = admitted().await;
        let (tx, mut rx) = mpsc::channel(16);
        let monitor = LivenessMonitor::start(handle, registry.clone(), &limits(), tx);

        for _ in 0..10 {
            match rx.recv().await.unwrap() {
                SessionCommand::Send(ServerMessage::Ping { .. }) => {
                    // client answers with pong
                    registry.touch(&handle).await;
                }
                other => panic!("Unexpected command: {:?}", other),
            }
        }

        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_sweeper_stops_after_eviction() {
        let (registry, handle) = admitted().await;
        let (tx, mut rx) = mpsc::channel(16);
        let monitor = LivenessMonitor::start(handle, registry.clone(), &limits(), tx);

        registry.evict(&handle).await;
        tokio::time::sleep(Duration::from_secs(60)).await;

        while let Ok(command) = rx.try_recv() {
            assert!(matches!(command, SessionCommand::Send(ServerMessage::Ping { .. })));
        }

        monitor.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_drops_senders() {
        let (registry, handle) = admitted().await;
        let (tx, mut rx) = mpsc::channel(16);
        let monitor = LivenessMonitor::start(handle, registry, &limits(), tx);

        monitor.shutdown().await;
        assert!(rx.recv().await.is_none());
    }
}
