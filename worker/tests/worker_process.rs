//! Spawns the real worker binary through the host supervisor.

use flate2::Compression;
use flate2::write::GzEncoder;
use pressbox::playground::Playground;
use pressbox::{
    BootParameters, FileLockManager, HttpRequest, MountDescriptor, PressboxError,
    ProcessController, Supervisor, SupervisorOptions, WorkerLaunch, WorkerState,
};
use std::sync::Arc;
use std::time::Duration;

fn tarball(top: &str, files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder
            .append_data(&mut header, format!("{}/{}", top, name), content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn supervisor() -> Supervisor {
    Supervisor::new(
        Arc::new(ProcessController::new(env!("CARGO_BIN_EXE_pressbox-worker"))),
        SupervisorOptions {
            ready_timeout: Some(Duration::from_secs(30)),
            dispose_timeout: Some(Duration::from_secs(10)),
        },
    )
}

#[tokio::test]
async fn test_boot_request_and_dispose_real_worker() {
    let dir = tempfile::tempdir().unwrap();
    let uploads = dir.path().join("uploads");
    std::fs::create_dir_all(&uploads).unwrap();
    std::fs::write(uploads.join("photo.txt"), "mounted").unwrap();

    let mut params = BootParameters::new("http://localhost:9400");
    params.wordpress_package = Some(tarball(
        "wordpress",
        &[("index.html", "<h1>home</h1>"), ("wp-admin/index.html", "admin")],
    ));
    params.mounts_after_wp_install = vec![MountDescriptor::new(
        &uploads,
        "/wordpress/wp-content/uploads",
    )];
    params.process_id_space_length = 4;

    let playground = Playground::boot_with(
        &supervisor(),
        Arc::new(FileLockManager::new()),
        &WorkerLaunch::new(dir.path().join("site")),
        params.clone(),
        20,
    )
    .await
    .unwrap();
    assert_eq!(playground.worker().state(), WorkerState::Ready);

    let response = playground.request(HttpRequest::get("/")).await.unwrap();
    assert_eq!(response.http_status_code, 200);
    assert_eq!(response.text(), "<h1>home</h1>");

    let response = playground
        .request(HttpRequest::get("/wp-content/uploads/photo.txt"))
        .await
        .unwrap();
    assert_eq!(response.text(), "mounted");

    let response = playground
        .request_follow_redirects(HttpRequest::get("/wp-admin"))
        .await
        .unwrap();
    assert_eq!(response.text(), "admin");

    let err = playground
        .worker()
        .runtime()
        .call::<_, serde_json::Value>("boot", &params)
        .await
        .unwrap_err();
    assert!(matches!(err, PressboxError::AlreadyBooted));

    playground.dispose().await.unwrap();
    assert_eq!(playground.worker().state(), WorkerState::Terminated);
}

#[tokio::test]
async fn test_unusable_site_root_is_spawn_failure() {
    let dir = tempfile::tempdir().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"x").unwrap();

    let err = supervisor()
        .spawn(
            &WorkerLaunch::new(blocker.join("site")),
            Arc::new(pressbox::FileLockService::new(Arc::new(FileLockManager::new()))),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, PressboxError::Spawn(_)));
}
