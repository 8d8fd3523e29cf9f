//! End-to-end exercises of the SFTP request router against the in-memory
//! store: upload/download round trips, policy enforcement, directory
//! synthesis, and idle tracking.

use russh_sftp::protocol::{FileAttributes, OpenFlags, StatusCode};
use russh_sftp::server::Handler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use sftpgate::config::Config;
use sftpgate::events::{Event, EventBus};
use sftpgate::namespace::UploadClock;
use sftpgate::sessions::SessionRegistry;
use sftpgate::sftp::SftpSession;
use sftpgate::storage::{MemoryStore, ObjectStore};

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

struct Harness {
    store: Arc<MemoryStore>,
    session: SftpSession,
    rx: broadcast::Receiver<Event>,
}

fn harness(username: &str) -> Harness {
    let store = Arc::new(MemoryStore::new());
    let events = EventBus::new(64);
    let rx = events.subscribe();
    let registry = SessionRegistry::new(events.clone(), Duration::from_secs(60));
    let session = SftpSession::new(
        username,
        Arc::clone(&store) as Arc<dyn ObjectStore>,
        events,
        Arc::new(UploadClock::new()),
        registry,
        test_config(),
    );
    Harness { store, session, rx }
}

fn event_names(rx: &mut broadcast::Receiver<Event>) -> Vec<&'static str> {
    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        names.push(event.name());
    }
    names
}

#[tokio::test]
async fn upload_then_download_round_trips() {
    let mut h = harness("alice");

    let handle = h
        .session
        .open(
            1,
            "/ledgers/jan.pdf".into(),
            OpenFlags::WRITE | OpenFlags::CREATE,
            FileAttributes::default(),
        )
        .await
        .unwrap()
        .handle;

    // Buffer observed at CLOSE is the concatenation of every WRITE payload.
    let body = vec![b'x'; 1024];
    h.session
        .write(2, handle.clone(), 0, body[..400].to_vec())
        .await
        .unwrap();
    h.session
        .write(3, handle.clone(), 400, body[400..].to_vec())
        .await
        .unwrap();
    let status = h.session.close(4, handle).await.unwrap();
    assert_eq!(status.status_code, StatusCode::Ok);

    assert_eq!(
        h.store
            .contents("users/alice/ledgers/jan.pdf")
            .await
            .unwrap(),
        body
    );
    let names = event_names(&mut h.rx);
    assert!(names.contains(&"file-uploaded"));
    assert!(names.contains(&"directory-changed"));

    let handle = h
        .session
        .open(
            5,
            "/ledgers/jan.pdf".into(),
            OpenFlags::READ,
            FileAttributes::default(),
        )
        .await
        .unwrap()
        .handle;
    let first = h.session.read(6, handle.clone(), 0, 600).await.unwrap();
    let second = h.session.read(7, handle.clone(), 600, 600).await.unwrap();
    let mut got = first.data;
    got.extend_from_slice(&second.data);
    assert_eq!(got, body);

    // Latched EOF: no more data, no more store calls.
    let ops = h.store.op_count();
    assert!(matches!(
        h.session.read(8, handle.clone(), 1024, 100).await,
        Err(StatusCode::Eof)
    ));
    assert_eq!(h.store.op_count(), ops);
    assert!(event_names(&mut h.rx).contains(&"file-downloaded"));

    let status = h.session.close(9, handle).await.unwrap();
    assert_eq!(status.status_code, StatusCode::Ok);
}

#[tokio::test]
async fn non_pdf_under_ledgers_is_denied_at_open() {
    let mut h = harness("alice");
    let err = h
        .session
        .open(
            1,
            "/ledgers/notes.txt".into(),
            OpenFlags::WRITE | OpenFlags::CREATE,
            FileAttributes::default(),
        )
        .await
        .unwrap_err();
    assert_eq!(err, StatusCode::PermissionDenied);
    assert_eq!(h.store.op_count(), 0, "rejected before any store call");
}

#[tokio::test]
async fn empty_upload_fails_at_close() {
    let mut h = harness("alice");
    let handle = h
        .session
        .open(
            1,
            "/stuff.txt".into(),
            OpenFlags::WRITE | OpenFlags::CREATE,
            FileAttributes::default(),
        )
        .await
        .unwrap()
        .handle;
    let err = h.session.close(2, handle).await.unwrap_err();
    assert_eq!(err, StatusCode::Failure);
    assert!(h.store.contents("users/alice/stuff.txt").await.is_none());
    assert!(event_names(&mut h.rx).contains(&"upload-error"));
}

#[tokio::test]
async fn virtual_root_lists_exactly_three_directories() {
    let mut h = harness("alice");
    let handle = h.session.opendir(1, "/".into()).await.unwrap().handle;

    let listing = h.session.readdir(2, handle.clone()).await.unwrap();
    let names: Vec<&str> = listing.files.iter().map(|f| f.filename.as_str()).collect();
    assert_eq!(names, vec!["alice", "ledgers", "invoices"]);
    assert!(listing.files.iter().all(|f| f.attrs.is_dir()));

    // READDIR is one-shot: the second call is EOF.
    assert!(matches!(
        h.session.readdir(3, handle).await,
        Err(StatusCode::Eof)
    ));
    assert_eq!(h.store.op_count(), 0, "root synthesis needs no store call");
}

#[tokio::test]
async fn mkdir_and_rmdir_are_always_denied() {
    let mut h = harness("alice");

    let err = h
        .session
        .mkdir(1, "/ledgers/2024".into(), FileAttributes::default())
        .await
        .unwrap_err();
    assert_eq!(err, StatusCode::PermissionDenied);

    let err = h.session.rmdir(2, "/alice/scratch".into()).await.unwrap_err();
    assert_eq!(err, StatusCode::PermissionDenied);

    let err = h.session.rmdir(3, "/ledgers".into()).await.unwrap_err();
    assert_eq!(err, StatusCode::PermissionDenied);

    let names = event_names(&mut h.rx);
    assert!(names.contains(&"directory-creation-blocked"));
    assert!(names.contains(&"directory-deletion-blocked"));
    assert!(names.contains(&"protected-directory-deletion-blocked"));
    assert_eq!(h.store.op_count(), 0);
}

#[tokio::test]
async fn protected_paths_survive_remove_and_rename() {
    let mut h = harness("alice");
    h.store
        .insert_object("users/alice/ledgers/.directory", b"marker")
        .await;
    let ops = h.store.op_count();

    let err = h.session.remove(1, "/ledgers".into()).await.unwrap_err();
    assert_eq!(err, StatusCode::PermissionDenied);

    let err = h
        .session
        .remove(2, "/alice/ledgers/.directory".into())
        .await
        .unwrap_err();
    assert_eq!(err, StatusCode::PermissionDenied);

    let err = h
        .session
        .rename(3, "/ledgers".into(), "/old-ledgers".into())
        .await
        .unwrap_err();
    assert_eq!(err, StatusCode::PermissionDenied);

    assert_eq!(h.store.op_count(), ops, "store untouched");
    assert!(
        h.store
            .contents("users/alice/ledgers/.directory")
            .await
            .is_some()
    );
    let names = event_names(&mut h.rx);
    assert!(names.contains(&"protected-directory-deletion-blocked"));
    assert!(names.contains(&"protected-directory-rename-blocked"));
}

#[tokio::test]
async fn denied_paths_never_reach_the_store() {
    let mut h = harness("alice");
    let path = "/bob/secret/report.txt";

    assert_eq!(
        h.session
            .open(1, path.into(), OpenFlags::READ, FileAttributes::default())
            .await
            .unwrap_err(),
        StatusCode::PermissionDenied
    );
    assert_eq!(
        h.session.opendir(2, "/bob/secret".into()).await.unwrap_err(),
        StatusCode::PermissionDenied
    );
    assert_eq!(
        h.session.stat(3, path.into()).await.unwrap_err(),
        StatusCode::PermissionDenied
    );
    assert_eq!(
        h.session.remove(4, path.into()).await.unwrap_err(),
        StatusCode::PermissionDenied
    );
    assert_eq!(
        h.session
            .rename(5, path.into(), "/bob/secret/other.txt".into())
            .await
            .unwrap_err(),
        StatusCode::PermissionDenied
    );
    assert_eq!(h.store.op_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn listing_reflects_a_just_finished_upload() {
    let mut h = harness("alice");

    let handle = h
        .session
        .open(
            1,
            "/ledgers/jan.pdf".into(),
            OpenFlags::WRITE | OpenFlags::CREATE,
            FileAttributes::default(),
        )
        .await
        .unwrap()
        .handle;
    h.session
        .write(2, handle.clone(), 0, b"%PDF-1.4\n".to_vec())
        .await
        .unwrap();
    h.session.close(3, handle).await.unwrap();

    // Inside the consistency window the listing pays the settle delay and
    // re-lists; paused time fast-forwards the sleep.
    let handle = h.session.opendir(4, "/ledgers".into()).await.unwrap().handle;
    let listing = h.session.readdir(5, handle).await.unwrap();
    let names: Vec<&str> = listing.files.iter().map(|f| f.filename.as_str()).collect();
    assert!(names.contains(&"jan.pdf"));
}

#[tokio::test]
async fn rename_copies_then_deletes() {
    let mut h = harness("alice");
    h.store.insert_object("users/alice/a.pdf", b"body").await;

    let status = h
        .session
        .rename(1, "/a.pdf".into(), "/b.pdf".into())
        .await
        .unwrap();
    assert_eq!(status.status_code, StatusCode::Ok);
    assert!(h.store.contents("users/alice/a.pdf").await.is_none());
    assert_eq!(
        h.store.contents("users/alice/b.pdf").await.unwrap(),
        b"body".to_vec()
    );
    assert!(event_names(&mut h.rx).contains(&"file-renamed"));
}

#[tokio::test]
async fn remove_deletes_and_announces() {
    let mut h = harness("alice");
    h.store.insert_object("users/alice/old.txt", b"x").await;

    let status = h.session.remove(1, "/old.txt".into()).await.unwrap();
    assert_eq!(status.status_code, StatusCode::Ok);
    assert!(h.store.contents("users/alice/old.txt").await.is_none());
    assert!(event_names(&mut h.rx).contains(&"file-deleted"));
}

#[tokio::test]
async fn stat_classifies_files_and_directories() {
    let mut h = harness("alice");
    h.store.insert_object("users/alice/report.pdf", b"12345").await;
    h.store
        .insert_object("users/alice/marked/.directory", b"m")
        .await;
    h.store.insert_object("users/alice/inferred/a", b"1").await;
    h.store.insert_object("users/alice/inferred/b", b"2").await;

    let attrs = h.session.stat(1, "/report.pdf".into()).await.unwrap().attrs;
    assert!(!attrs.is_dir());
    assert_eq!(attrs.size, Some(5));

    let attrs = h.session.stat(2, "/marked".into()).await.unwrap().attrs;
    assert!(attrs.is_dir());

    let attrs = h.session.lstat(3, "/inferred".into()).await.unwrap().attrs;
    assert!(attrs.is_dir());

    assert_eq!(
        h.session.stat(4, "/missing".into()).await.unwrap_err(),
        StatusCode::NoSuchFile
    );
}

#[tokio::test]
async fn stat_of_root_exists_even_with_an_empty_store() {
    // No provisioning has happened; the virtual root still stats as a
    // directory, matching OPENDIR and REALPATH.
    let mut h = harness("alice");

    let attrs = h.session.stat(1, "/".into()).await.unwrap().attrs;
    assert!(attrs.is_dir());
    let attrs = h.session.lstat(2, "/".into()).await.unwrap().attrs;
    assert!(attrs.is_dir());
    assert_eq!(h.store.op_count(), 0, "root synthesis needs no store call");
}

#[tokio::test]
async fn realpath_canonicalizes_and_checks_existence() {
    let mut h = harness("alice");
    h.store.insert_object("users/alice/x.txt", b"x").await;

    // Root canonicalizes even with an empty store.
    let name = h.session.realpath(1, ".".into()).await.unwrap();
    assert_eq!(name.files[0].filename, "/");

    let name = h.session.realpath(2, "/foo/../x.txt".into()).await.unwrap();
    assert_eq!(name.files[0].filename, "/x.txt");

    assert_eq!(
        h.session.realpath(3, "/missing".into()).await.unwrap_err(),
        StatusCode::NoSuchFile
    );
}

#[tokio::test]
async fn wrong_kind_handle_access_fails() {
    let mut h = harness("alice");
    h.store.insert_object("users/alice/sub/.directory", b"m").await;

    let dir = h.session.opendir(1, "/sub".into()).await.unwrap().handle;
    assert_eq!(
        h.session.read(2, dir.clone(), 0, 10).await.unwrap_err(),
        StatusCode::Failure
    );
    assert_eq!(
        h.session.write(3, dir, 0, b"x".to_vec()).await.unwrap_err(),
        StatusCode::Failure
    );
    assert_eq!(
        h.session.close(4, "ffffffff".into()).await.unwrap_err(),
        StatusCode::Failure
    );
}

#[tokio::test]
async fn open_for_read_rejects_directories_and_missing_files() {
    let mut h = harness("alice");
    h.store.insert_object("users/alice/sub/.directory", b"m").await;

    assert_eq!(
        h.session
            .open(1, "/sub".into(), OpenFlags::READ, FileAttributes::default())
            .await
            .unwrap_err(),
        StatusCode::NoSuchFile
    );
    assert_eq!(
        h.session
            .open(2, "/nope.txt".into(), OpenFlags::READ, FileAttributes::default())
            .await
            .unwrap_err(),
        StatusCode::NoSuchFile
    );
}

#[tokio::test]
async fn append_flag_is_unsupported() {
    let mut h = harness("alice");
    assert_eq!(
        h.session
            .open(
                1,
                "/notes.txt".into(),
                OpenFlags::WRITE | OpenFlags::APPEND,
                FileAttributes::default()
            )
            .await
            .unwrap_err(),
        StatusCode::OpUnsupported
    );
}

#[tokio::test(start_paused = true)]
async fn idle_fires_after_a_quiet_minute() {
    let mut h = harness("alice");

    // Any verb records activity.
    let _ = h.session.realpath(1, "/".into()).await.unwrap();
    tokio::time::advance(Duration::from_secs(61)).await;
    tokio::task::yield_now().await;

    let names = event_names(&mut h.rx);
    assert_eq!(
        names.iter().filter(|n| **n == "user-idle").count(),
        1,
        "user-idle fires exactly once"
    );
}
