// tests/runtime_resources.rs

#![cfg(unix)]

mod common;
use crate::common::builders::{RuntimeConfigBuilder, ServiceDefinitionBuilder};
use crate::common::{
    FakeFetcher, TestResult, init_tracing, runtime_with_fake_fetcher, with_timeout, write_file,
};

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use flate2::Compression;
use flate2::write::GzEncoder;

use devrun::build::ToolchainBuilder;
use devrun::config::{RuntimeConfig, Toolchain};
use devrun::errors::{ProcessError, RuntimeError};
use devrun::runtime::registry::artifact_path;
use devrun::runtime::{
    CreateOptions, DeleteOptions, NetworkPolicy, ReadOptions, Resource, Runtime, UpdateOptions,
};
use devrun::types::ServiceStatus;

fn in_ns(ns: &str) -> CreateOptions {
    CreateOptions {
        namespace: Some(ns.to_string()),
        ..Default::default()
    }
}

fn policy() -> Resource {
    Resource::NetworkPolicy(NetworkPolicy {
        name: "deny-all".to_string(),
        namespace: "dev".to_string(),
    })
}

fn sleeper(name: &str) -> Resource {
    ServiceDefinitionBuilder::new(name, "v1")
        .command("sleep")
        .arg("30")
        .build()
        .into()
}

async fn count(runtime: &Runtime, ns: &str) -> usize {
    runtime
        .read(ReadOptions {
            namespace: Some(ns.to_string()),
            ..Default::default()
        })
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn network_policies_are_rejected_everywhere() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;
    let (runtime, _) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());

    let err = runtime.create(policy(), CreateOptions::default()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidResource(_)), "got {:?}", err);
    let err = runtime.update(policy(), UpdateOptions::default()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidResource(_)), "got {:?}", err);
    let err = runtime.delete(policy(), DeleteOptions::default()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidResource(_)), "got {:?}", err);

    let err = runtime
        .update(Resource::Namespace("dev".to_string()), UpdateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::InvalidResource(_)), "got {:?}", err);
    Ok(())
}

#[tokio::test]
async fn namespaces_are_created_once() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let (runtime, _) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());
    let ns = Resource::Namespace("team".to_string());

    runtime.create(ns.clone(), CreateOptions::default()).await?;
    assert_eq!(count(&runtime, "team").await, 0);

    let err = runtime.create(ns, CreateOptions::default()).await.unwrap_err();
    assert!(matches!(err, RuntimeError::AlreadyExists(_)), "got {:?}", err);

    // Services land in an explicitly created namespace too.
    runtime.create(sleeper("a"), in_ns("team")).await?;
    assert_eq!(count(&runtime, "team").await, 1);

    runtime.start().await?;
    runtime.stop().await?;
    Ok(())
}

#[tokio::test]
async fn failed_create_leaves_no_namespace_behind() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let (runtime, _) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());

    let missing = ServiceDefinitionBuilder::new("ghost", "v1")
        .command("/definitely/not/a/program")
        .build();
    let err = runtime.create(missing.into(), in_ns("fresh")).await.unwrap_err();
    assert!(
        matches!(err, RuntimeError::Process(ProcessError::Spawn { .. })),
        "got {:?}",
        err
    );
    assert_eq!(count(&runtime, "fresh").await, 0);

    runtime
        .create(Resource::Namespace("fresh".to_string()), CreateOptions::default())
        .await?;
    Ok(())
}

#[tokio::test]
async fn deleting_a_namespace_stops_its_services() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let (runtime, _) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());

    runtime.create(sleeper("a"), in_ns("doomed")).await?;
    runtime.create(sleeper("b"), in_ns("doomed")).await?;
    runtime.create(sleeper("c"), in_ns("kept")).await?;
    let pids: Vec<u32> = runtime
        .read(ReadOptions {
            namespace: Some("doomed".to_string()),
            ..Default::default()
        })
        .await?
        .into_iter()
        .filter_map(|s| s.pid)
        .collect();
    assert_eq!(pids.len(), 2);

    let doomed = Resource::Namespace("doomed".to_string());
    with_timeout(runtime.delete(doomed.clone(), DeleteOptions::default())).await?;
    assert_eq!(count(&runtime, "doomed").await, 0);
    for pid in pids {
        let pid = nix::unistd::Pid::from_raw(pid as i32);
        assert!(nix::sys::signal::kill(pid, None).is_err(), "{pid} still alive");
    }

    // The other namespace is untouched, and deleting again is fine.
    assert_eq!(count(&runtime, "kept").await, 1);
    runtime.delete(doomed, DeleteOptions::default()).await?;

    runtime.start().await?;
    runtime.stop().await?;
    Ok(())
}

fn targz(files: &[(&str, &str)]) -> Vec<u8> {
    let encoder = GzEncoder::new(Vec::new(), Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, contents) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(contents.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, contents.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

#[tokio::test]
async fn uploaded_archive_is_unpacked_and_run() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let config = RuntimeConfigBuilder::new(tmp.path()).build();
    let upload_dir = config.upload_dir.clone();
    fs::create_dir_all(&upload_dir)?;
    fs::write(
        upload_dir.join("echo.tar.gz"),
        targz(&[("main.go", "package main"), ("go.mod", "module echo")]),
    )?;
    // Leftovers from an earlier upload of the same name are wiped.
    write_file(&upload_dir, "echo/stale.go", "package stale");

    let (runtime, fetcher) = runtime_with_fake_fetcher(config);
    let def = ServiceDefinitionBuilder::new("echo", "v1")
        .source("echo.tar.gz")
        .build();
    runtime.create(def.into(), in_ns("dev")).await?;

    assert!(upload_dir.join("echo").join("main.go").is_file());
    assert!(!upload_dir.join("echo").join("stale.go").exists());
    assert!(fetcher.calls().is_empty());

    let services = runtime.read(ReadOptions {
        namespace: Some("dev".to_string()),
        ..Default::default()
    });
    assert_eq!(services.await?[0].status, ServiceStatus::Running);

    runtime.start().await?;
    runtime.stop().await?;
    Ok(())
}

/// `sh` standing in for a compiler: the "binary" it writes is a shell
/// script that idles.
fn script_toolchain(tmp_dir: &Path) -> ToolchainBuilder {
    let toolchain = Toolchain {
        program: "sh".to_string(),
        build_args: vec![
            "-c".to_string(),
            r#"printf '#!/bin/sh\nexec sleep 30\n' > "$2""#.to_string(),
            "build".to_string(),
        ],
        static_link: false,
        ..Toolchain::default()
    };
    ToolchainBuilder::new("sh", toolchain, tmp_dir)
}

fn prebuilt_runtime(config: RuntimeConfig) -> Runtime {
    let tmp_dir = config.tmp_dir.clone();
    let fetcher = FakeFetcher::new(&config.source_cache_dir);
    Runtime::with_components(
        config,
        Arc::new(fetcher),
        Some(Arc::new(script_toolchain(&tmp_dir))),
    )
}

#[tokio::test]
async fn prebuild_writes_an_executable_artifact_and_runs_it() -> TestResult {
    let tmp = tempfile::tempdir()?;
    write_file(tmp.path(), "api/cmd/server/main.go", "package main");
    let config = RuntimeConfigBuilder::new(tmp.path()).prebuild(true).build();
    let artifact_dir = config.artifact_dir.clone();
    let runtime = prebuilt_runtime(config);

    let def = ServiceDefinitionBuilder::new("acme/api", "v2")
        .source(tmp.path().join("api").to_string_lossy())
        .build();
    runtime.create(def.clone().into(), in_ns("dev")).await?;

    let artifact = artifact_path(&artifact_dir, "dev", &def);
    assert_eq!(artifact, artifact_dir.join("dev-acme-api-v2"));
    assert!(fs::read_to_string(&artifact)?.contains("exec sleep 30"));
    assert_eq!(fs::metadata(&artifact)?.permissions().mode() & 0o777, 0o755);

    let info = runtime.read(ReadOptions {
        namespace: Some("dev".to_string()),
        ..Default::default()
    });
    assert_eq!(info.await?[0].status, ServiceStatus::Running);

    runtime.start().await?;
    runtime.stop().await?;
    Ok(())
}

/// A toolchain whose output is a real executable, so the previous build is
/// busy while its process runs.
fn copying_toolchain(tmp_dir: &Path) -> ToolchainBuilder {
    let toolchain = Toolchain {
        program: "sh".to_string(),
        build_args: vec![
            "-c".to_string(),
            r#"cp "$(command -v sleep)" "$2""#.to_string(),
            "build".to_string(),
        ],
        static_link: false,
        ..Toolchain::default()
    };
    ToolchainBuilder::new("sh", toolchain, tmp_dir)
}

#[tokio::test]
async fn update_replaces_a_running_prebuilt_binary() -> TestResult {
    let tmp = tempfile::tempdir()?;
    write_file(tmp.path(), "idle/main.go", "package main");
    let config = RuntimeConfigBuilder::new(tmp.path()).prebuild(true).build();
    let tmp_dir = config.tmp_dir.clone();
    let fetcher = FakeFetcher::new(&config.source_cache_dir);
    let runtime = Runtime::with_components(
        config,
        Arc::new(fetcher),
        Some(Arc::new(copying_toolchain(&tmp_dir))),
    );

    let def = ServiceDefinitionBuilder::new("idle", "v1")
        .source(tmp.path().join("idle").to_string_lossy())
        .arg("30")
        .build();
    runtime.create(def.clone().into(), in_ns("dev")).await?;
    let read_dev = || {
        runtime.read(ReadOptions {
            namespace: Some("dev".to_string()),
            ..Default::default()
        })
    };
    let before = read_dev().await?.remove(0);
    assert_eq!(before.status, ServiceStatus::Running);

    let opts = UpdateOptions {
        namespace: Some("dev".to_string()),
    };
    with_timeout(runtime.update(def.into(), opts)).await?;

    let after = read_dev().await?.remove(0);
    assert_eq!(after.status, ServiceStatus::Running);
    assert_ne!(after.pid, before.pid);
    if let Some(old) = before.pid {
        let old = nix::unistd::Pid::from_raw(old as i32);
        assert!(nix::sys::signal::kill(old, None).is_err(), "{old} still alive");
    }

    runtime.start().await?;
    runtime.stop().await?;
    Ok(())
}

#[tokio::test]
async fn prebuild_can_be_chosen_per_create() -> TestResult {
    let tmp = tempfile::tempdir()?;
    write_file(tmp.path(), "echo/main.go", "package main");
    let config = RuntimeConfigBuilder::new(tmp.path()).build();
    let artifact_dir = config.artifact_dir.clone();
    let runtime = prebuilt_runtime(config);

    let def = ServiceDefinitionBuilder::new("echo", "v1")
        .source(tmp.path().join("echo").to_string_lossy())
        .build();
    let opts = CreateOptions {
        namespace: Some("dev".to_string()),
        prebuild: Some(true),
        ..Default::default()
    };
    runtime.create(def.clone().into(), opts).await?;
    assert!(artifact_path(&artifact_dir, "dev", &def).is_file());

    runtime.start().await?;
    runtime.stop().await?;
    Ok(())
}

#[tokio::test]
async fn prebuild_without_a_toolchain_fails() -> TestResult {
    let tmp = tempfile::tempdir()?;
    write_file(tmp.path(), "echo/main.go", "package main");
    let (runtime, _) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());

    let def = ServiceDefinitionBuilder::new("echo", "v1")
        .source(tmp.path().join("echo").to_string_lossy())
        .build();
    let opts = CreateOptions {
        prebuild: Some(true),
        ..Default::default()
    };
    let err = runtime.create(def.into(), opts).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Toolchain { .. }), "got {:?}", err);
    assert!(runtime.read(ReadOptions::default()).await?.is_empty());
    Ok(())
}
