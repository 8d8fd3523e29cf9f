//! SFTP request router: one instance per subsystem channel, translating
//! protocol verbs into policy checks and object-store calls.

use russh_sftp::protocol::{
    Attrs, Data, File, FileAttributes, Handle, Name, OpenFlags, Status, StatusCode, Version,
};
use std::collections::HashMap;
use std::sync::Arc;

use crate::auth;
use crate::config::Config;
use crate::error::GatewayError;
use crate::events::{Event, EventBus};
use crate::handles::{DirState, HandleState, HandleTable, ReadState, WriteState};
use crate::namespace::{
    self, CONSISTENCY_WINDOW, DIRECTORY_MARKER, Entry, EntryKind, LEGACY_MARKER, SETTLE_DELAY,
    UploadClock,
};
use crate::paths;
use crate::policy::{self, UserPolicy};
use crate::sessions::SessionRegistry;
use crate::storage::ObjectStore;
use crate::transfer;

enum PathClass {
    File { size: u64, modified: Option<chrono::DateTime<chrono::Utc>> },
    Directory,
    Missing,
}

pub struct SftpSession {
    username: String,
    home_prefix: String,
    policy: UserPolicy,
    store: Arc<dyn ObjectStore>,
    events: EventBus,
    clock: Arc<UploadClock>,
    registry: Arc<SessionRegistry>,
    config: Arc<Config>,
    handles: HandleTable,
    version: Option<u32>,
}

impl SftpSession {
    pub fn new(
        username: impl Into<String>,
        store: Arc<dyn ObjectStore>,
        events: EventBus,
        clock: Arc<UploadClock>,
        registry: Arc<SessionRegistry>,
        config: Arc<Config>,
    ) -> Self {
        let username = username.into();
        let home_prefix = auth::home_prefix(&config.user_base_path, &username);
        let policy = UserPolicy::new(username.clone());
        Self {
            username,
            home_prefix,
            policy,
            store,
            events,
            clock,
            registry,
            config,
            handles: HandleTable::new(),
            version: None,
        }
    }

    /// Replace the default path allow-list for this session.
    pub fn with_policy(mut self, policy: UserPolicy) -> Self {
        self.policy = policy;
        self
    }

    async fn touch(&self) {
        self.registry.record_activity(&self.username).await;
    }

    /// Normalize and admit a client path, before anything touches the store.
    fn admit(&self, raw: &str) -> Result<String, StatusCode> {
        let normalized = paths::normalize(raw).map_err(|e| e.status_code())?;
        if !self.policy.admits(&normalized) {
            tracing::debug!(user = %self.username, path = %normalized, "path not admitted");
            return Err(StatusCode::PermissionDenied);
        }
        Ok(normalized)
    }

    fn map(&self, normalized: &str) -> Result<String, StatusCode> {
        paths::map_virtual_path(&self.home_prefix, normalized).map_err(|e| e.status_code())
    }

    /// Surface a domain error to the wire, announcing store failures.
    fn surface(&self, err: GatewayError) -> StatusCode {
        if matches!(err, GatewayError::Store(_)) {
            self.events.emit(Event::ClientError {
                username: Some(self.username.clone()),
                detail: err.to_string(),
            });
        }
        err.status_code()
    }

    fn ok_status(id: u32) -> Status {
        Status {
            id,
            status_code: StatusCode::Ok,
            error_message: "Ok".to_string(),
            language_tag: "en-US".to_string(),
        }
    }

    /// LIST-based classification: marker beats exact object, exact object
    /// beats inferred directory.
    async fn classify(&self, key: &str) -> Result<PathClass, GatewayError> {
        let listed = self.store.list(key).await?;
        let marker = format!("{key}/{DIRECTORY_MARKER}");
        let legacy = format!("{key}/{LEGACY_MARKER}");
        if listed.iter().any(|o| o.key == marker || o.key == legacy) {
            return Ok(PathClass::Directory);
        }
        if let Some(exact) = listed.iter().find(|o| o.key == key) {
            return Ok(PathClass::File {
                size: exact.size,
                modified: exact.modified,
            });
        }
        let boundary = format!("{key}/");
        if listed.iter().any(|o| o.key.starts_with(&boundary)) {
            return Ok(PathClass::Directory);
        }
        Ok(PathClass::Missing)
    }

    async fn stat_path(&self, raw: &str) -> Result<FileAttributes, StatusCode> {
        let normalized = self.admit(raw)?;
        // The root of the view always exists, provisioned or not.
        if normalized == "/" {
            return Ok(dir_attrs());
        }
        let key = self.map(&normalized)?;
        match self.classify(&key).await.map_err(|e| self.surface(e))? {
            PathClass::File { size, modified } => Ok(file_attrs(size, modified)),
            PathClass::Directory => Ok(dir_attrs()),
            PathClass::Missing => Err(StatusCode::NoSuchFile),
        }
    }

    fn entry_to_file(&self, entry: &Entry) -> File {
        let is_dir = entry.kind == EntryKind::Directory;
        let attrs = if is_dir {
            dir_attrs()
        } else {
            file_attrs(entry.size, entry.modified)
        };
        File {
            filename: entry.name.clone(),
            longname: long_name(&entry.name, entry.size, is_dir, entry.modified),
            attrs,
        }
    }
}

fn file_attrs(size: u64, modified: Option<chrono::DateTime<chrono::Utc>>) -> FileAttributes {
    let mut attrs = FileAttributes {
        size: Some(size),
        permissions: Some(0o644),
        mtime: modified.map(|m| m.timestamp() as u32),
        ..Default::default()
    };
    attrs.set_regular(true);
    attrs
}

fn dir_attrs() -> FileAttributes {
    let mut attrs = FileAttributes {
        size: Some(0),
        permissions: Some(0o755),
        ..Default::default()
    };
    attrs.set_dir(true);
    attrs
}

/// Listing line shown by clients; UI-only, not meant to be parsed.
fn long_name(
    name: &str,
    size: u64,
    is_dir: bool,
    modified: Option<chrono::DateTime<chrono::Utc>>,
) -> String {
    let kind = if is_dir { 'd' } else { '-' };
    let stamp = modified
        .unwrap_or_else(chrono::Utc::now)
        .format("%m/%d/%Y %H:%M:%S");
    format!("{kind}rw-rw-rw-    1 user user {size} {stamp} {name}")
}

impl russh_sftp::server::Handler for SftpSession {
    type Error = StatusCode;

    fn unimplemented(&self) -> Self::Error {
        StatusCode::OpUnsupported
    }

    async fn init(
        &mut self,
        version: u32,
        extensions: HashMap<String, String>,
    ) -> Result<Version, Self::Error> {
        if self.version.is_some() {
            tracing::error!(user = %self.username, "duplicate SFTP init");
            return Err(StatusCode::ConnectionLost);
        }
        self.version = Some(version);
        tracing::debug!(user = %self.username, version, ?extensions, "sftp session initialized");
        Ok(Version::new())
    }

    async fn open(
        &mut self,
        id: u32,
        filename: String,
        pflags: OpenFlags,
        _attrs: FileAttributes,
    ) -> Result<Handle, Self::Error> {
        self.touch().await;
        let normalized = self.admit(&filename)?;
        let key = self.map(&normalized)?;
        tracing::debug!(user = %self.username, path = %normalized, ?pflags, "open");

        let wants_write = pflags
            .intersects(OpenFlags::WRITE | OpenFlags::CREATE | OpenFlags::TRUNCATE | OpenFlags::APPEND);

        if wants_write {
            if pflags.contains(OpenFlags::APPEND) {
                // The store only accepts whole objects.
                return Err(StatusCode::OpUnsupported);
            }
            if policy::is_managed_dir(&normalized, &self.username) {
                return Err(StatusCode::PermissionDenied);
            }
            if policy::in_managed_dir(&normalized, &self.username) {
                let name = paths::file_name(&normalized).unwrap_or_default();
                if !policy::is_pdf(name) {
                    return Err(StatusCode::PermissionDenied);
                }
            }
            let marker = format!("{key}/{DIRECTORY_MARKER}");
            match self.store.head(&marker).await {
                Ok(Some(_)) => return Err(StatusCode::NoSuchFile),
                Ok(None) => {}
                Err(e) => return Err(self.surface(GatewayError::Store(e))),
            }
            let handle = self.handles.insert(HandleState::Write(WriteState {
                virtual_path: normalized,
                key,
                buffer: Vec::new(),
            }));
            return Ok(Handle { id, handle });
        }

        let size = transfer::open_download(self.store.as_ref(), &key)
            .await
            .map_err(|e| self.surface(e))?;
        let handle = self.handles.insert(HandleState::Read(ReadState {
            virtual_path: normalized,
            key,
            size,
            read_at_eof: false,
        }));
        Ok(Handle { id, handle })
    }

    async fn read(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        len: u32,
    ) -> Result<Data, Self::Error> {
        self.touch().await;
        let store = Arc::clone(&self.store);
        let state = match self.handles.get_mut(&handle) {
            Some(HandleState::Read(state)) => state,
            Some(_) | None => return Err(StatusCode::Failure),
        };
        let was_eof = state.read_at_eof;
        let outcome = transfer::read_chunk(store.as_ref(), state, offset, len).await;
        let finished = !was_eof && state.read_at_eof;
        let (key, size) = (state.key.clone(), state.size);

        match outcome {
            Ok(Some(data)) => {
                if finished {
                    self.events.emit(Event::FileDownloaded {
                        username: self.username.clone(),
                        key,
                        size,
                    });
                }
                Ok(Data { id, data })
            }
            Ok(None) => Err(StatusCode::Eof),
            Err(e) => Err(self.surface(e)),
        }
    }

    async fn write(
        &mut self,
        id: u32,
        handle: String,
        offset: u64,
        data: Vec<u8>,
    ) -> Result<Status, Self::Error> {
        self.touch().await;
        let max_file_size = self.config.max_file_size;
        let username = self.username.clone();
        let state = match self.handles.get_mut(&handle) {
            Some(HandleState::Write(state)) => state,
            Some(_) | None => return Err(StatusCode::Failure),
        };

        let expected = state.buffer.len() as u64;
        if offset != expected {
            tracing::warn!(
                user = %username,
                path = %state.virtual_path,
                offset,
                expected,
                "non-contiguous write offset, treating as append"
            );
        }
        let before = state.buffer.len() as u64;
        state.buffer.extend_from_slice(&data);
        let after = state.buffer.len() as u64;
        if before <= max_file_size && after > max_file_size {
            tracing::warn!(
                user = %username,
                path = %state.virtual_path,
                size = after,
                "upload exceeds advisory size limit"
            );
        }
        Ok(Self::ok_status(id))
    }

    async fn close(&mut self, id: u32, handle: String) -> Result<Status, Self::Error> {
        self.touch().await;
        match self.handles.remove(&handle) {
            Some(HandleState::Write(state)) => {
                transfer::finish_upload(
                    Arc::clone(&self.store),
                    &self.clock,
                    &self.events,
                    &self.username,
                    &state.virtual_path,
                    &state.key,
                    state.buffer,
                )
                .await
                .map_err(|e| e.status_code())?;
                Ok(Self::ok_status(id))
            }
            Some(_) => Ok(Self::ok_status(id)),
            None => Err(StatusCode::Failure),
        }
    }

    async fn opendir(&mut self, id: u32, path: String) -> Result<Handle, Self::Error> {
        self.touch().await;
        let normalized = self.admit(&path)?;

        // The root of the view is synthetic and shadows any listing.
        if normalized == "/" {
            let handle = self.handles.insert(HandleState::Dir(DirState {
                virtual_path: normalized,
                entries: namespace::virtual_root_entries(&self.username),
                emitted: false,
            }));
            return Ok(Handle { id, handle });
        }

        let key = self.map(&normalized)?;
        let mut listed = self
            .store
            .list(&key)
            .await
            .map_err(|e| self.surface(GatewayError::Store(e)))?;
        if self.clock.recent(CONSISTENCY_WINDOW) {
            // A recent upload anywhere means this listing may be stale.
            tokio::time::sleep(SETTLE_DELAY).await;
            listed = self
                .store
                .list(&key)
                .await
                .map_err(|e| self.surface(GatewayError::Store(e)))?;
        }

        let boundary = format!("{key}/");
        let exists = listed
            .iter()
            .any(|o| o.key == key || o.key.starts_with(&boundary));
        if !exists {
            return Err(StatusCode::NoSuchFile);
        }

        let entries = namespace::materialize(&key, &listed);
        let handle = self.handles.insert(HandleState::Dir(DirState {
            virtual_path: normalized,
            entries,
            emitted: false,
        }));
        Ok(Handle { id, handle })
    }

    async fn readdir(&mut self, id: u32, handle: String) -> Result<Name, Self::Error> {
        self.touch().await;
        let dir = match self.handles.get_mut(&handle) {
            Some(HandleState::Dir(dir)) => dir,
            Some(_) | None => return Err(StatusCode::Failure),
        };
        if dir.emitted {
            return Err(StatusCode::Eof);
        }
        dir.emitted = true;
        if dir.entries.is_empty() {
            return Err(StatusCode::Eof);
        }
        let entries = std::mem::take(&mut dir.entries);
        let files = entries.iter().map(|e| self.entry_to_file(e)).collect();
        Ok(Name { id, files })
    }

    async fn remove(&mut self, id: u32, filename: String) -> Result<Status, Self::Error> {
        self.touch().await;
        let normalized = paths::normalize(&filename).map_err(|e| e.status_code())?;
        if policy::is_protected(&normalized, &self.username) {
            self.events.emit(Event::ProtectedDirectoryDeletionBlocked {
                username: self.username.clone(),
                virtual_path: normalized,
            });
            return Err(StatusCode::PermissionDenied);
        }
        if !self.policy.admits(&normalized) {
            return Err(StatusCode::PermissionDenied);
        }
        let key = self.map(&normalized)?;
        self.store
            .delete(&key)
            .await
            .map_err(|e| self.surface(GatewayError::Store(e)))?;
        if key.ends_with(&format!("/{DIRECTORY_MARKER}")) {
            self.events.emit(Event::DirectoryDeleted {
                username: self.username.clone(),
                key,
            });
        } else {
            self.events.emit(Event::FileDeleted {
                username: self.username.clone(),
                key,
            });
        }
        Ok(Self::ok_status(id))
    }

    async fn rename(
        &mut self,
        id: u32,
        oldpath: String,
        newpath: String,
    ) -> Result<Status, Self::Error> {
        self.touch().await;
        let old = paths::normalize(&oldpath).map_err(|e| e.status_code())?;
        let new = paths::normalize(&newpath).map_err(|e| e.status_code())?;
        for path in [&old, &new] {
            if policy::is_protected(path, &self.username) {
                self.events.emit(Event::ProtectedDirectoryRenameBlocked {
                    username: self.username.clone(),
                    virtual_path: path.clone(),
                });
                return Err(StatusCode::PermissionDenied);
            }
        }
        if !self.policy.admits(&old) || !self.policy.admits(&new) {
            return Err(StatusCode::PermissionDenied);
        }
        let from_key = self.map(&old)?;
        let to_key = self.map(&new)?;

        if let Err(e) = self.store.copy(&from_key, &to_key).await {
            self.surface(GatewayError::Store(e));
            return Err(StatusCode::Failure);
        }
        if let Err(e) = self.store.delete(&from_key).await {
            self.surface(GatewayError::Store(e));
            return Err(StatusCode::Failure);
        }
        self.events.emit(Event::FileRenamed {
            username: self.username.clone(),
            from_key,
            to_key,
        });
        Ok(Self::ok_status(id))
    }

    async fn mkdir(
        &mut self,
        _id: u32,
        path: String,
        _attrs: FileAttributes,
    ) -> Result<Status, Self::Error> {
        self.touch().await;
        // The directory layout is system-owned; clients never create one.
        let shown = paths::normalize(&path).unwrap_or(path);
        self.events.emit(Event::DirectoryCreationBlocked {
            username: self.username.clone(),
            virtual_path: shown,
        });
        Err(StatusCode::PermissionDenied)
    }

    async fn rmdir(&mut self, _id: u32, path: String) -> Result<Status, Self::Error> {
        self.touch().await;
        let shown = paths::normalize(&path).unwrap_or(path);
        if policy::is_protected(&shown, &self.username) {
            self.events.emit(Event::ProtectedDirectoryDeletionBlocked {
                username: self.username.clone(),
                virtual_path: shown,
            });
        } else {
            self.events.emit(Event::DirectoryDeletionBlocked {
                username: self.username.clone(),
                virtual_path: shown,
            });
        }
        Err(StatusCode::PermissionDenied)
    }

    async fn realpath(&mut self, id: u32, path: String) -> Result<Name, Self::Error> {
        self.touch().await;
        let normalized = paths::normalize(&path).map_err(|_| StatusCode::NoSuchFile)?;

        // Root canonicalizes even when nothing has been uploaded yet.
        if normalized == "/" {
            return Ok(Name {
                id,
                files: vec![File {
                    filename: "/".to_string(),
                    longname: "/".to_string(),
                    attrs: dir_attrs(),
                }],
            });
        }

        let key = self.map(&normalized).map_err(|_| StatusCode::NoSuchFile)?;
        let attrs = match self.classify(&key).await.map_err(|e| self.surface(e))? {
            PathClass::File { size, modified } => file_attrs(size, modified),
            PathClass::Directory => dir_attrs(),
            PathClass::Missing => return Err(StatusCode::NoSuchFile),
        };
        Ok(Name {
            id,
            files: vec![File {
                filename: normalized.clone(),
                longname: normalized,
                attrs,
            }],
        })
    }

    async fn stat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        self.touch().await;
        let attrs = self.stat_path(&path).await?;
        Ok(Attrs { id, attrs })
    }

    async fn lstat(&mut self, id: u32, path: String) -> Result<Attrs, Self::Error> {
        // No symlinks in the store; LSTAT behaves as STAT.
        self.touch().await;
        let attrs = self.stat_path(&path).await?;
        Ok(Attrs { id, attrs })
    }

    async fn fstat(&mut self, id: u32, handle: String) -> Result<Attrs, Self::Error> {
        self.touch().await;
        let attrs = match self.handles.get_mut(&handle) {
            Some(HandleState::Read(state)) => file_attrs(state.size, None),
            Some(HandleState::Write(state)) => file_attrs(state.buffer.len() as u64, None),
            Some(HandleState::Dir(_)) => dir_attrs(),
            None => return Err(StatusCode::Failure),
        };
        Ok(Attrs { id, attrs })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn long_name_renders_kind_size_and_name() {
        let stamp = chrono::DateTime::parse_from_rfc3339("2024-03-05T14:30:09Z")
            .unwrap()
            .with_timezone(&chrono::Utc);
        assert_eq!(
            long_name("jan.pdf", 1024, false, Some(stamp)),
            "-rw-rw-rw-    1 user user 1024 03/05/2024 14:30:09 jan.pdf"
        );
        assert_eq!(
            long_name("ledgers", 0, true, Some(stamp)),
            "drw-rw-rw-    1 user user 0 03/05/2024 14:30:09 ledgers"
        );
    }

    #[test]
    fn attrs_mark_kind_bits() {
        assert!(dir_attrs().is_dir());
        assert!(!file_attrs(3, None).is_dir());
        assert_eq!(file_attrs(3, None).size, Some(3));
    }
}
