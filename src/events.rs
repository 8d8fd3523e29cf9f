//! Observable server events, broadcast to any number of subscribers.
//!
//! Emission is fire-and-forget: a send with no live receivers is dropped, and
//! a slow receiver lags without ever blocking the request path.

use tokio::sync::broadcast;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectCause {
    SessionClosed,
    ChannelEnd,
    ChannelClose,
    ChannelError,
    Forced,
}

impl std::fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SessionClosed => "session-close",
            Self::ChannelEnd => "channel-end",
            Self::ChannelClose => "channel-close",
            Self::ChannelError => "channel-error",
            Self::Forced => "forced",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
pub enum Event {
    Login { username: String },
    ClientError { username: Option<String>, detail: String },
    ClientDisconnected { username: String, cause: DisconnectCause },
    FileUploaded { username: String, key: String, size: u64 },
    UploadError { username: String, virtual_path: String, detail: String },
    FileDownloaded { username: String, key: String, size: u64 },
    FileDeleted { username: String, key: String },
    FileRenamed { username: String, from_key: String, to_key: String },
    DirectoryCreated { username: String, key: String },
    DirectoryDeleted { username: String, key: String },
    DirectoryChanged { username: String, prefix: String },
    DirectoryCreationBlocked { username: String, virtual_path: String },
    DirectoryDeletionBlocked { username: String, virtual_path: String },
    ProtectedDirectoryDeletionBlocked { username: String, virtual_path: String },
    ProtectedDirectoryRenameBlocked { username: String, virtual_path: String },
    UserIdle { username: String, at_ms: i64 },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Login { .. } => "login",
            Self::ClientError { .. } => "client-error",
            Self::ClientDisconnected { .. } => "client-disconnected",
            Self::FileUploaded { .. } => "file-uploaded",
            Self::UploadError { .. } => "upload-error",
            Self::FileDownloaded { .. } => "file-downloaded",
            Self::FileDeleted { .. } => "file-deleted",
            Self::FileRenamed { .. } => "file-renamed",
            Self::DirectoryCreated { .. } => "directory-created",
            Self::DirectoryDeleted { .. } => "directory-deleted",
            Self::DirectoryChanged { .. } => "directory-changed",
            Self::DirectoryCreationBlocked { .. } => "directory-creation-blocked",
            Self::DirectoryDeletionBlocked { .. } => "directory-deletion-blocked",
            Self::ProtectedDirectoryDeletionBlocked { .. } => {
                "protected-directory-deletion-blocked"
            }
            Self::ProtectedDirectoryRenameBlocked { .. } => "protected-directory-rename-blocked",
            Self::UserIdle { .. } => "user-idle",
        }
    }
}

#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<Event>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn emit(&self, event: Event) {
        tracing::debug!(event = event.name(), "emit {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
