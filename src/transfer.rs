//! Upload and download pipelines.
//!
//! The store only accepts whole objects, so writes buffer in memory and a
//! single PUT runs at CLOSE. The PUT executes on its own task and reports
//! through a completion channel: CLOSE waits for the result, but tearing the
//! session down mid-flight does not abort the upload.

use std::sync::Arc;
use tokio::sync::oneshot;

use crate::error::{GatewayError, Result};
use crate::events::{Event, EventBus};
use crate::handles::ReadState;
use crate::namespace::{DIRECTORY_MARKER, LEGACY_MARKER, UploadClock};
use crate::paths;
use crate::policy;
use crate::storage::ObjectStore;

/// Validate and commit a buffered upload. Called at CLOSE of a write handle;
/// does not return until the PUT has resolved.
pub async fn finish_upload(
    store: Arc<dyn ObjectStore>,
    clock: &UploadClock,
    events: &EventBus,
    username: &str,
    virtual_path: &str,
    key: &str,
    buffer: Vec<u8>,
) -> Result<()> {
    if buffer.is_empty() {
        return Err(reject(events, username, virtual_path, "empty files not allowed"));
    }
    if policy::in_managed_dir(virtual_path, username) {
        let name = paths::file_name(virtual_path).unwrap_or_default();
        if !policy::is_pdf(name) {
            return Err(reject(
                events,
                username,
                virtual_path,
                "only PDF files are accepted in this directory",
            ));
        }
    }

    let size = buffer.len() as u64;
    let (tx, rx) = oneshot::channel();
    let put_store = Arc::clone(&store);
    let put_key = key.to_string();
    tokio::spawn(async move {
        let result = put_store.put(&put_key, buffer, None).await;
        let _ = tx.send(result);
    });

    match rx.await {
        Ok(Ok(())) => {
            clock.mark();
            events.emit(Event::FileUploaded {
                username: username.to_string(),
                key: key.to_string(),
                size,
            });
            events.emit(Event::DirectoryChanged {
                username: username.to_string(),
                prefix: parent_prefix(key),
            });
            Ok(())
        }
        Ok(Err(e)) => {
            events.emit(Event::UploadError {
                username: username.to_string(),
                virtual_path: virtual_path.to_string(),
                detail: e.to_string(),
            });
            Err(GatewayError::Store(e))
        }
        Err(_) => {
            events.emit(Event::UploadError {
                username: username.to_string(),
                virtual_path: virtual_path.to_string(),
                detail: "upload task terminated".to_string(),
            });
            Err(GatewayError::Protocol("upload task terminated".to_string()))
        }
    }
}

fn reject(events: &EventBus, username: &str, virtual_path: &str, detail: &str) -> GatewayError {
    events.emit(Event::UploadError {
        username: username.to_string(),
        virtual_path: virtual_path.to_string(),
        detail: detail.to_string(),
    });
    GatewayError::UploadValidation(detail.to_string())
}

fn parent_prefix(key: &str) -> String {
    key.rsplit_once('/')
        .map(|(parent, _)| parent.to_string())
        .unwrap_or_default()
}

/// Resolve an object for reading: confirm the exact key exists and is not a
/// directory in disguise. Returns its size.
pub async fn open_download(store: &dyn ObjectStore, key: &str) -> Result<u64> {
    let listed = store.list(key).await?;
    let marker = format!("{key}/{DIRECTORY_MARKER}");
    let legacy = format!("{key}/{LEGACY_MARKER}");
    if listed.iter().any(|o| o.key == marker || o.key == legacy) {
        return Err(GatewayError::NotFound(format!("{key} is a directory")));
    }
    match listed.iter().find(|o| o.key == key) {
        Some(found) => Ok(found.size),
        None => Err(GatewayError::NotFound(key.to_string())),
    }
}

/// One ranged read. `Ok(None)` is EOF; reaching the end latches the handle
/// so later reads answer EOF without a store call.
pub async fn read_chunk(
    store: &dyn ObjectStore,
    state: &mut ReadState,
    offset: u64,
    len: u32,
) -> Result<Option<Vec<u8>>> {
    if state.read_at_eof || offset >= state.size {
        return Ok(None);
    }
    let len = (len as u64).min(state.size - offset);
    if len == 0 {
        return Ok(None);
    }
    let data = store.get_range(&state.key, offset, len).await?;
    if offset + len >= state.size {
        state.read_at_eof = true;
    }
    Ok(Some(data))
}
