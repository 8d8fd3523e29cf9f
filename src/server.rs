//! SSH glue: accepts connections, authenticates them against the credential
//! registry, and routes the `sftp` subsystem channel into the request router.

use anyhow::{Context, Result};
use russh::keys::ssh_key::LineEnding;
use russh::keys::ssh_key::rand_core::OsRng;
use russh::server::{Auth, Msg, Server, Session};
use russh::{Channel, ChannelId, MethodKind, MethodSet};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::auth::AuthService;
use crate::config::Config;
use crate::events::{DisconnectCause, Event, EventBus};
use crate::namespace::UploadClock;
use crate::sessions::SessionRegistry;
use crate::sftp::SftpSession;
use crate::storage::ObjectStore;

pub struct GatewayServer {
    config: Arc<Config>,
    store: Arc<dyn ObjectStore>,
    events: EventBus,
    registry: Arc<SessionRegistry>,
    clock: Arc<UploadClock>,
    auth: Arc<AuthService>,
}

impl GatewayServer {
    pub fn new(
        config: Arc<Config>,
        store: Arc<dyn ObjectStore>,
        events: EventBus,
        registry: Arc<SessionRegistry>,
        clock: Arc<UploadClock>,
        auth: Arc<AuthService>,
    ) -> Self {
        Self {
            config,
            store,
            events,
            registry,
            clock,
            auth,
        }
    }

    pub async fn run(&mut self) -> Result<()> {
        let key = load_or_generate_host_key(&self.config.host_key_path)?;
        let ssh_config = russh::server::Config {
            auth_rejection_time: Duration::from_secs(3),
            auth_rejection_time_initial: Some(Duration::from_secs(0)),
            keys: vec![key],
            ..Default::default()
        };
        let addr = (self.config.host.clone(), self.config.port);
        tracing::info!("listening on {}:{}", self.config.host, self.config.port);
        self.run_on_address(Arc::new(ssh_config), addr)
            .await
            .context("ssh listener failed")?;
        Ok(())
    }
}

impl Server for GatewayServer {
    type Handler = ClientHandler;

    fn new_client(&mut self, peer: Option<SocketAddr>) -> ClientHandler {
        tracing::debug!(?peer, "connection accepted");
        ClientHandler {
            peer,
            config: Arc::clone(&self.config),
            store: Arc::clone(&self.store),
            events: self.events.clone(),
            registry: Arc::clone(&self.registry),
            clock: Arc::clone(&self.clock),
            auth: Arc::clone(&self.auth),
            username: None,
            errored: false,
            channels: HashMap::new(),
        }
    }

    fn handle_session_error(&mut self, error: <Self::Handler as russh::server::Handler>::Error) {
        tracing::warn!("session error: {error:#}");
    }
}

pub struct ClientHandler {
    peer: Option<SocketAddr>,
    config: Arc<Config>,
    store: Arc<dyn ObjectStore>,
    events: EventBus,
    registry: Arc<SessionRegistry>,
    clock: Arc<UploadClock>,
    auth: Arc<AuthService>,
    username: Option<String>,
    errored: bool,
    channels: HashMap<ChannelId, Channel<Msg>>,
}

impl ClientHandler {
    fn password_only() -> MethodSet {
        let mut methods = MethodSet::empty();
        methods.push(MethodKind::Password);
        methods
    }

    async fn cleanup(&self, cause: DisconnectCause) {
        if let Some(user) = &self.username {
            self.registry.remove(user, cause).await;
        }
    }

    /// Mark this connection as torn down by a channel error before handing
    /// the error back to the transport. Teardown itself happens in `Drop`,
    /// which is the last point this handler sees the session.
    fn channel_error(&mut self, err: russh::Error) -> anyhow::Error {
        self.errored = true;
        self.events.emit(Event::ClientError {
            username: self.username.clone(),
            detail: err.to_string(),
        });
        err.into()
    }
}

impl russh::server::Handler for ClientHandler {
    type Error = anyhow::Error;

    async fn auth_password(&mut self, user: &str, password: &str) -> Result<Auth, Self::Error> {
        if self.registry.active_count().await >= self.config.max_connections {
            tracing::warn!(user, "connection limit reached, rejecting authentication");
            return Ok(Auth::Reject {
                proceed_with_methods: None,
                partial_success: false,
            });
        }

        if self.auth.authenticate(user, password).await {
            if let Err(e) = self.auth.provision_home(user).await {
                tracing::error!(user, "home provisioning failed: {e}");
            }
            self.username = Some(user.to_string());
            self.events.emit(Event::Login {
                username: user.to_string(),
            });
            tracing::info!(user, peer = ?self.peer, "password authentication succeeded");
            Ok(Auth::Accept)
        } else {
            tracing::warn!(user, peer = ?self.peer, "password authentication failed");
            Ok(Auth::Reject {
                proceed_with_methods: Some(Self::password_only()),
                partial_success: false,
            })
        }
    }

    async fn channel_open_session(
        &mut self,
        channel: Channel<Msg>,
        session: &mut Session,
    ) -> Result<bool, Self::Error> {
        if let Some(user) = &self.username {
            self.registry.register(user, Some(session.handle())).await;
        }
        self.channels.insert(channel.id(), channel);
        Ok(true)
    }

    async fn subsystem_request(
        &mut self,
        channel_id: ChannelId,
        name: &str,
        session: &mut Session,
    ) -> Result<(), Self::Error> {
        if name != "sftp" {
            tracing::warn!(subsystem = name, "unsupported subsystem");
            if let Err(e) = session.channel_failure(channel_id) {
                return Err(self.channel_error(e));
            }
            return Ok(());
        }
        let (Some(username), Some(channel)) =
            (self.username.clone(), self.channels.remove(&channel_id))
        else {
            if let Err(e) = session.channel_failure(channel_id) {
                return Err(self.channel_error(e));
            }
            return Ok(());
        };

        if let Err(e) = session.channel_success(channel_id) {
            return Err(self.channel_error(e));
        }
        let sftp = SftpSession::new(
            username,
            Arc::clone(&self.store),
            self.events.clone(),
            Arc::clone(&self.clock),
            Arc::clone(&self.registry),
            Arc::clone(&self.config),
        );
        tokio::spawn(russh_sftp::server::run(channel.into_stream(), sftp));
        Ok(())
    }

    async fn channel_eof(
        &mut self,
        _channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.cleanup(DisconnectCause::ChannelEnd).await;
        Ok(())
    }

    async fn channel_close(
        &mut self,
        _channel: ChannelId,
        _session: &mut Session,
    ) -> Result<(), Self::Error> {
        self.cleanup(DisconnectCause::ChannelClose).await;
        Ok(())
    }
}

impl Drop for ClientHandler {
    fn drop(&mut self) {
        // Connection teardown without a clean channel close still clears
        // tracking; removal is idempotent so double cleanup is harmless.
        if let Some(user) = self.username.take() {
            let cause = if self.errored {
                DisconnectCause::ChannelError
            } else {
                DisconnectCause::SessionClosed
            };
            let registry = Arc::clone(&self.registry);
            if let Ok(rt) = tokio::runtime::Handle::try_current() {
                rt.spawn(async move {
                    registry.remove(&user, cause).await;
                });
            }
        }
    }
}

fn load_or_generate_host_key(path: &Path) -> Result<russh::keys::PrivateKey> {
    if path.exists() {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read host key at {}", path.display()))?;
        return russh::keys::decode_secret_key(&data, None)
            .with_context(|| format!("failed to parse host key at {}", path.display()));
    }
    tracing::warn!(
        "host key not found at {}, generating an ed25519 key",
        path.display()
    );
    let key = russh::keys::PrivateKey::random(&mut OsRng, russh::keys::Algorithm::Ed25519)
        .context("failed to generate host key")?;
    let encoded = key
        .to_openssh(LineEnding::LF)
        .context("failed to encode host key")?;
    std::fs::write(path, encoded.as_bytes())
        .with_context(|| format!("failed to persist host key at {}", path.display()))?;
    Ok(key)
}
