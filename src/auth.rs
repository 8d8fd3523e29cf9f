//! Credential verification against the external registry, plus first-login
//! provisioning of the user's home tree.
//!
//! The registry is keyed `auth/<user>_<pass>`: a HEAD hit means the
//! credentials are valid. Inherited contract; a salted-hash directory
//! service would replace this wholesale.

use std::sync::Arc;

use crate::config::Config;
use crate::events::{Event, EventBus};
use crate::storage::{DIRECTORY_CONTENT_TYPE, ObjectStore, StoreError};

pub fn home_prefix(user_base_path: &str, username: &str) -> String {
    format!("{user_base_path}/{username}")
}

pub struct AuthService {
    store: Arc<dyn ObjectStore>,
    events: EventBus,
    config: Arc<Config>,
}

impl AuthService {
    pub fn new(store: Arc<dyn ObjectStore>, events: EventBus, config: Arc<Config>) -> Self {
        Self {
            store,
            events,
            config,
        }
    }

    /// Password check. Anything other than a clean HEAD hit is a failure;
    /// registry errors are logged and treated as rejection.
    pub async fn authenticate(&self, username: &str, password: &str) -> bool {
        let probe = format!("auth/{username}_{password}");
        match self.store.head(&probe).await {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                tracing::error!(user = username, "credential probe failed: {e}");
                false
            }
        }
    }

    /// Ensure the user's home tree is usable. The home itself stays virtual
    /// (no marker); each configured default subdirectory gets a `.directory`
    /// marker so it shows up even while empty. Idempotent.
    pub async fn provision_home(&self, username: &str) -> Result<(), StoreError> {
        if !self.config.create_default_subdirs {
            return Ok(());
        }
        let home = home_prefix(&self.config.user_base_path, username);
        for name in &self.config.default_subdirectories {
            let marker = format!("{home}/{name}/.directory");
            if self.store.head(&marker).await?.is_some() {
                continue;
            }
            let body = format!("Directory marker for {name} folder").into_bytes();
            self.store
                .put(&marker, body, Some(DIRECTORY_CONTENT_TYPE))
                .await?;
            self.events.emit(Event::DirectoryCreated {
                username: username.to_string(),
                key: marker,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    fn test_config() -> Arc<Config> {
        Arc::new(Config {
            host: "127.0.0.1".into(),
            port: 2222,
            max_connections: 100,
            user_base_path: "users".into(),
            default_subdirectories: vec!["invoices".into(), "ledgers".into()],
            create_default_subdirs: true,
            s3_bucket: "test".into(),
            s3_region: "us-east-1".into(),
            s3_endpoint: None,
            max_file_size: 104_857_600,
            allowed_extensions: Vec::new(),
            blocked_extensions: vec![".exe".into(), ".bat".into(), ".sh".into()],
            max_directory_depth: 10,
            host_key_path: "./sftpgate_host_key".into(),
            log_enabled: true,
            log_level: "info".into(),
            log_file: None,
        })
    }

    #[tokio::test]
    async fn authenticate_checks_probe_key() {
        let store = Arc::new(MemoryStore::new());
        store.insert_object("auth/alice_s3cret", b"").await;
        let auth = AuthService::new(store, EventBus::new(8), test_config());

        assert!(auth.authenticate("alice", "s3cret").await);
        assert!(!auth.authenticate("alice", "wrong").await);
        assert!(!auth.authenticate("bob", "s3cret").await);
    }

    #[tokio::test]
    async fn provisioning_writes_markers_once() {
        let store = Arc::new(MemoryStore::new());
        let events = EventBus::new(8);
        let mut rx = events.subscribe();
        let auth = AuthService::new(store.clone(), events, test_config());

        auth.provision_home("alice").await.unwrap();
        assert_eq!(
            store
                .contents("users/alice/invoices/.directory")
                .await
                .unwrap(),
            b"Directory marker for invoices folder".to_vec()
        );
        assert!(
            store
                .contents("users/alice/ledgers/.directory")
                .await
                .is_some()
        );
        assert!(matches!(rx.recv().await.unwrap(), Event::DirectoryCreated { .. }));

        // Second login: markers already present, nothing new is written.
        let ops = store.op_count();
        auth.provision_home("alice").await.unwrap();
        // Two HEAD probes, no PUTs.
        assert_eq!(store.op_count(), ops + 2);
    }

    #[tokio::test]
    async fn provisioning_disabled_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        let mut config = (*test_config()).clone();
        config.create_default_subdirs = false;
        let auth = AuthService::new(store.clone(), EventBus::new(8), Arc::new(config));
        auth.provision_home("alice").await.unwrap();
        assert_eq!(store.op_count(), 0);
    }
}
