//! Push-Stream Registry
//!
//! Maps a client id to one open outbound stream of `PushFrame`s. The HTTP
//! layer owns the receiving half and renders it as server-sent events; every
//! other component only talks to the registry.
//!
//! Client ids are reused (a chat without one uses its session id), so each
//! registration also gets a `ConnectionId`. Work-scoped sends and closes name
//! the connection they were bound to and leave a newer stream alone.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use autoprovider_core::PushFrame;

use crate::models::config::PushConfig;

/// Result of a registry operation addressed to one client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Done,
    NoClient,
    Error,
}

/// Close reason used when a client id is registered again.
pub const REPLACED_REASON: &str = "a newer connection replaced this one";

/// Close reason used by the stale-client sweep.
pub const TIMEOUT_REASON: &str = "connection timed out";

/// One registration of a client id. The default value is never issued.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

struct ClientStream {
    tx: mpsc::UnboundedSender<PushFrame>,
    connection: ConnectionId,
    last_active: Instant,
}

/// Registry of connected push-stream clients.
pub struct PushRegistry {
    clients: DashMap<String, ClientStream>,
    next_connection: AtomicU64,
    config: PushConfig,
}

impl PushRegistry {
    pub fn new(config: PushConfig) -> Self {
        Self {
            clients: DashMap::new(),
            next_connection: AtomicU64::new(0),
            config,
        }
    }

    /// Open a stream for `client_id`.
    ///
    /// An existing stream under the same id is closed first. The returned
    /// receiver yields a `Retry` hint before anything else.
    pub fn register(&self, client_id: &str) -> (ConnectionId, mpsc::UnboundedReceiver<PushFrame>) {
        if self.clients.contains_key(client_id) {
            self.disconnect(client_id, REPLACED_REASON);
        }

        let connection = ConnectionId(self.next_connection.fetch_add(1, Ordering::Relaxed) + 1);
        let (tx, rx) = mpsc::unbounded_channel();
        let _ = tx.send(PushFrame::Retry {
            millis: self.config.retry_ms,
        });
        self.clients.insert(
            client_id.to_string(),
            ClientStream {
                tx,
                connection,
                last_active: Instant::now(),
            },
        );
        tracing::info!(client_id = %client_id, connection = connection.0, "[PushRegistry] client registered");
        (connection, rx)
    }

    /// Deliver one frame to `client_id`, provided its stream is still the
    /// one opened as `connection`.
    pub fn send(&self, frame: PushFrame, client_id: &str, connection: ConnectionId) -> SendOutcome {
        let delivered = match self.clients.get_mut(client_id) {
            Some(mut client) if client.connection == connection => {
                let ok = client.tx.send(frame).is_ok();
                if ok {
                    client.last_active = Instant::now();
                }
                ok
            }
            _ => {
                tracing::debug!(client_id = %client_id, "[PushRegistry] no open stream, frame dropped");
                return SendOutcome::NoClient;
            }
        };

        if delivered {
            SendOutcome::Done
        } else {
            // Receiver is gone: the HTTP response was dropped.
            self.clients
                .remove_if(client_id, |_, client| client.connection == connection);
            tracing::warn!(client_id = %client_id, "[PushRegistry] stream closed by peer, client removed");
            SendOutcome::Error
        }
    }

    /// Flush a close frame and end the stream of `client_id`, whichever
    /// connection holds it.
    pub fn disconnect(&self, client_id: &str, reason: &str) -> SendOutcome {
        match self.clients.remove(client_id) {
            Some((_, client)) => Self::close(client_id, client, reason),
            None => SendOutcome::NoClient,
        }
    }

    /// Like `disconnect`, but only while the stream is still `connection`.
    pub fn disconnect_connection(&self, client_id: &str, connection: ConnectionId, reason: &str) -> SendOutcome {
        match self
            .clients
            .remove_if(client_id, |_, client| client.connection == connection)
        {
            Some((_, client)) => Self::close(client_id, client, reason),
            None => SendOutcome::NoClient,
        }
    }

    fn close(client_id: &str, client: ClientStream, reason: &str) -> SendOutcome {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let _ = client.tx.send(PushFrame::close(Some(reason), &timestamp));
        tracing::info!(client_id = %client_id, reason = %reason, "[PushRegistry] client disconnected");
        SendOutcome::Done
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_active(&self, client_id: &str) -> bool {
        self.clients
            .get(client_id)
            .map(|c| !c.tx.is_closed())
            .unwrap_or(false)
    }

    /// Send a keep-alive comment to every client; drops clients whose stream is gone.
    pub fn heartbeat(&self) {
        let timestamp = chrono::Utc::now().to_rfc3339();
        let mut dead = Vec::new();
        for mut client in self.clients.iter_mut() {
            let frame = PushFrame::Heartbeat {
                timestamp: timestamp.clone(),
            };
            if client.tx.send(frame).is_ok() {
                client.last_active = Instant::now();
            } else {
                dead.push(client.key().clone());
            }
        }
        for client_id in dead {
            self.clients.remove(&client_id);
            tracing::debug!(client_id = %client_id, "[PushRegistry] heartbeat failed, client removed");
        }
    }

    /// Disconnect clients idle for longer than `timeout`. Returns how many were removed.
    pub fn sweep_stale(&self, timeout: Duration) -> usize {
        let now = Instant::now();
        let stale: Vec<String> = self
            .clients
            .iter()
            .filter(|c| now.duration_since(c.last_active) > timeout)
            .map(|c| c.key().clone())
            .collect();
        for client_id in &stale {
            tracing::info!(client_id = %client_id, "[PushRegistry] sweeping stale client");
            self.disconnect(client_id, TIMEOUT_REASON);
        }
        stale.len()
    }

    /// Start the heartbeat and stale-client sweep. Both stop when `shutdown` fires.
    pub fn spawn_maintenance(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        let heartbeat_every = Duration::from_secs(registry.config.heartbeat_secs.max(1));
        let cleanup_every = Duration::from_secs(registry.config.cleanup_secs.max(1));
        let client_timeout = Duration::from_secs(registry.config.client_timeout_secs);

        tokio::spawn(async move {
            let mut heartbeat = tokio::time::interval(heartbeat_every);
            let mut cleanup = tokio::time::interval(cleanup_every);
            // both intervals fire immediately once
            heartbeat.tick().await;
            cleanup.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = heartbeat.tick() => registry.heartbeat(),
                    _ = cleanup.tick() => {
                        registry.sweep_stale(client_timeout);
                    }
                }
            }
            tracing::debug!("[PushRegistry] maintenance stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use autoprovider_core::framing::{EVENT_CLOSE, EVENT_WORDS};

    fn registry() -> PushRegistry {
        PushRegistry::new(PushConfig::default())
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<PushFrame>) -> Vec<PushFrame> {
        let mut frames = Vec::new();
        while let Ok(frame) = rx.try_recv() {
            frames.push(frame);
        }
        frames
    }

    // ── Register / send ──

    #[test]
    fn test_register_sends_retry_first() {
        let registry = registry();
        let (connection, mut rx) = registry.register("c1");
        assert_eq!(registry.send(PushFrame::words("hi"), "c1", connection), SendOutcome::Done);

        let frames = drain(&mut rx);
        assert_eq!(frames[0], PushFrame::Retry { millis: 3000 });
        assert_eq!(frames[1].event_name(), Some(EVENT_WORDS));
        assert_eq!(registry.client_count(), 1);
        assert!(registry.is_active("c1"));
    }

    #[test]
    fn test_send_without_client() {
        let registry = registry();
        assert_eq!(
            registry.send(PushFrame::words("x"), "ghost", ConnectionId::default()),
            SendOutcome::NoClient
        );
    }

    #[test]
    fn test_send_after_receiver_dropped() {
        let registry = registry();
        let (connection, rx) = registry.register("c1");
        drop(rx);
        assert_eq!(registry.send(PushFrame::words("x"), "c1", connection), SendOutcome::Error);
        assert_eq!(registry.client_count(), 0);
    }

    // ── Disconnect ──

    #[test]
    fn test_disconnect_flushes_close_frame() {
        let registry = registry();
        let (_, mut rx) = registry.register("c1");
        assert_eq!(registry.disconnect("c1", "done"), SendOutcome::Done);
        assert_eq!(registry.disconnect("c1", "done"), SendOutcome::NoClient);

        let frames = drain(&mut rx);
        let last = frames.last().unwrap();
        assert_eq!(last.event_name(), Some(EVENT_CLOSE));
        assert!(last.data().unwrap().contains("\"reason\":\"done\""));
        // sender dropped, stream ended
        assert!(rx.try_recv().is_err());
        assert!(!registry.is_active("c1"));
    }

    #[test]
    fn test_reregister_replaces_previous_stream() {
        let registry = registry();
        let (old_connection, mut old) = registry.register("c1");
        let (connection, mut new) = registry.register("c1");
        assert_ne!(old_connection, connection);

        registry.send(PushFrame::words("fresh"), "c1", connection);
        let old_frames = drain(&mut old);
        assert_eq!(old_frames.last().unwrap().event_name(), Some(EVENT_CLOSE));
        assert!(old_frames.iter().all(|f| f.data() != Some("<words>fresh</words>")));

        let new_frames = drain(&mut new);
        assert_eq!(new_frames.last().unwrap().data(), Some("<words>fresh</words>"));
        assert_eq!(registry.client_count(), 1);
    }

    #[test]
    fn test_stale_connection_cannot_touch_newer_stream() {
        let registry = registry();
        let (old_connection, _old) = registry.register("s1");
        let (_, mut new) = registry.register("s1");
        drain(&mut new);

        assert_eq!(
            registry.send(PushFrame::words("late"), "s1", old_connection),
            SendOutcome::NoClient
        );
        assert_eq!(
            registry.disconnect_connection("s1", old_connection, "cancelled"),
            SendOutcome::NoClient
        );
        assert!(drain(&mut new).is_empty());
        assert!(registry.is_active("s1"));
    }

    // ── Maintenance ──

    #[test]
    fn test_heartbeat_reaches_clients_and_drops_dead() {
        let registry = registry();
        let (_, mut live) = registry.register("live");
        let (_, dead) = registry.register("dead");
        drop(dead);

        registry.heartbeat();
        assert!(drain(&mut live)
            .iter()
            .any(|f| matches!(f, PushFrame::Heartbeat { .. })));
        assert_eq!(registry.client_count(), 1);
    }

    #[test]
    fn test_sweep_stale_clients() {
        let registry = registry();
        let (_, mut rx) = registry.register("idle");
        assert_eq!(registry.sweep_stale(Duration::from_secs(60)), 0);
        assert_eq!(registry.sweep_stale(Duration::ZERO), 1);
        let frames = drain(&mut rx);
        assert!(frames.last().unwrap().data().unwrap().contains(TIMEOUT_REASON));
    }

    #[tokio::test]
    async fn test_maintenance_stops_on_shutdown() {
        let registry = Arc::new(registry());
        let shutdown = CancellationToken::new();
        let handle = registry.spawn_maintenance(shutdown.clone());
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
