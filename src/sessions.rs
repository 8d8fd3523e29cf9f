//! Connected-user tracking and idle detection.
//!
//! Every SFTP request records activity, which re-arms that user's single
//! idle timer. An idle timer firing only announces the fact; disconnecting
//! an idle user is an operator decision.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::events::{DisconnectCause, Event, EventBus};

pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

struct UserSession {
    handle: Option<russh::server::Handle>,
    idle_timer: JoinHandle<()>,
}

pub struct SessionRegistry {
    inner: Mutex<HashMap<String, UserSession>>,
    events: EventBus,
    idle_timeout: Duration,
}

impl SessionRegistry {
    pub fn new(events: EventBus, idle_timeout: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(HashMap::new()),
            events,
            idle_timeout,
        })
    }

    fn arm_timer(&self, username: &str) -> JoinHandle<()> {
        let events = self.events.clone();
        let username = username.to_string();
        let timeout = self.idle_timeout;
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            events.emit(Event::UserIdle {
                username,
                at_ms: chrono::Utc::now().timestamp_millis(),
            });
        })
    }

    /// Track an authenticated connection. Replaces any previous tracking for
    /// the same user, keeping an already-known SSH handle if the caller has
    /// none to offer.
    pub async fn register(&self, username: &str, handle: Option<russh::server::Handle>) {
        let timer = self.arm_timer(username);
        let mut inner = self.inner.lock().await;
        let handle = match (handle, inner.remove(username)) {
            (Some(h), Some(old)) => {
                old.idle_timer.abort();
                Some(h)
            }
            (Some(h), None) => Some(h),
            (None, Some(old)) => {
                old.idle_timer.abort();
                old.handle
            }
            (None, None) => None,
        };
        inner.insert(
            username.to_string(),
            UserSession {
                handle,
                idle_timer: timer,
            },
        );
    }

    /// Cancel the user's idle timer and arm a fresh one. Users are tracked
    /// lazily: activity from an unknown user starts tracking it.
    pub async fn record_activity(&self, username: &str) {
        let timer = self.arm_timer(username);
        let mut inner = self.inner.lock().await;
        match inner.get_mut(username) {
            Some(session) => {
                session.idle_timer.abort();
                session.idle_timer = timer;
            }
            None => {
                inner.insert(
                    username.to_string(),
                    UserSession {
                        handle: None,
                        idle_timer: timer,
                    },
                );
            }
        }
    }

    /// Session teardown: clear the idle timer, drop tracking, announce.
    /// Idempotent; only the first removal emits.
    pub async fn remove(&self, username: &str, cause: DisconnectCause) {
        let removed = self.inner.lock().await.remove(username);
        if let Some(session) = removed {
            session.idle_timer.abort();
            self.events.emit(Event::ClientDisconnected {
                username: username.to_string(),
                cause,
            });
        }
    }

    /// Close the SSH connection of one user, if connected.
    pub async fn force_disconnect(&self, username: &str) -> bool {
        let removed = self.inner.lock().await.remove(username);
        match removed {
            Some(session) => {
                session.idle_timer.abort();
                if let Some(handle) = session.handle {
                    let _ = handle
                        .disconnect(
                            russh::Disconnect::ByApplication,
                            "disconnected by operator".to_string(),
                            "en".to_string(),
                        )
                        .await;
                }
                self.events.emit(Event::ClientDisconnected {
                    username: username.to_string(),
                    cause: DisconnectCause::Forced,
                });
                true
            }
            None => false,
        }
    }

    /// Close every authenticated connection and clear all tracking.
    pub async fn disconnect_all(&self) {
        let drained: Vec<(String, UserSession)> =
            self.inner.lock().await.drain().collect();
        for (username, session) in drained {
            session.idle_timer.abort();
            if let Some(handle) = session.handle {
                let _ = handle
                    .disconnect(
                        russh::Disconnect::ByApplication,
                        "server shutting down".to_string(),
                        "en".to_string(),
                    )
                    .await;
            }
            self.events.emit(Event::ClientDisconnected {
                username,
                cause: DisconnectCause::Forced,
            });
        }
    }

    pub async fn active_count(&self) -> usize {
        self.inner.lock().await.len()
    }
}
