// tests/runtime_registry.rs

#![cfg(unix)]

mod common;
use crate::common::builders::{RuntimeConfigBuilder, ServiceDefinitionBuilder};
use crate::common::{
    TestResult, eventually, init_tracing, runtime_with_fake_fetcher, with_timeout, write_file,
};

use std::path::{Path, PathBuf};

use devrun::errors::RuntimeError;
use devrun::logs::LogsOptions;
use devrun::runtime::{
    CreateOptions, DeleteOptions, ReadOptions, Runtime, ServiceDefinition, ServiceInfo,
    UpdateOptions,
};
use devrun::types::ServiceStatus;

/// A local service directory holding a single entrypoint.
fn service_dir(root: &Path, name: &str) -> PathBuf {
    write_file(root, &format!("{name}/main.go"), "package main\n");
    root.join(name)
}

fn in_ns(ns: &str) -> CreateOptions {
    CreateOptions {
        namespace: Some(ns.to_string()),
        ..Default::default()
    }
}

async fn read_ns(runtime: &Runtime, ns: &str) -> Vec<ServiceInfo> {
    runtime
        .read(ReadOptions {
            namespace: Some(ns.to_string()),
            ..Default::default()
        })
        .await
        .unwrap()
}

async fn only(runtime: &Runtime, ns: &str) -> ServiceInfo {
    let mut services = read_ns(runtime, ns).await;
    assert_eq!(services.len(), 1, "expected one service, got {:?}", services);
    services.remove(0)
}

async fn settles_at(runtime: &Runtime, ns: &str, status: ServiceStatus) -> bool {
    eventually(move || async move { only(runtime, ns).await.status == status }).await
}

fn sh(name: &str, script: &str) -> ServiceDefinition {
    ServiceDefinitionBuilder::new(name, "v1")
        .command("sh")
        .arg("-c")
        .arg(script)
        .build()
}

#[tokio::test]
async fn create_runs_local_source_and_read_reports_it() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;
    let dir = service_dir(tmp.path(), "echo");
    let (runtime, fetcher) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());

    let def = ServiceDefinitionBuilder::new("echo", "v1")
        .source(dir.to_string_lossy())
        .build();
    runtime.create(def.clone().into(), in_ns("dev")).await?;

    let info = only(&runtime, "dev").await;
    assert_eq!(info.namespace, "dev");
    assert_eq!(info.definition, def);
    assert_eq!(info.status, ServiceStatus::Running);
    assert!(info.pid.is_some());
    assert!(info.started_at.is_some());
    assert!(info.error.is_none());
    assert_eq!(info.log_path, tmp.path().join("logs").join("echo.log"));
    assert!(info.log_path.is_file());

    // Local sources never reach the fetcher.
    assert!(fetcher.calls().is_empty());
    // Other namespaces stay empty.
    assert!(read_ns(&runtime, "prod").await.is_empty());

    runtime.start().await?;
    runtime.stop().await?;
    Ok(())
}

#[tokio::test]
async fn duplicate_create_is_rejected_and_keeps_the_first_process() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let dir = service_dir(tmp.path(), "echo");
    let (runtime, _) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());
    let def = ServiceDefinitionBuilder::new("echo", "v1")
        .source(dir.to_string_lossy())
        .build();

    runtime.create(def.clone().into(), in_ns("dev")).await?;
    let first = only(&runtime, "dev").await.pid;

    let err = runtime.create(def.into(), in_ns("dev")).await.unwrap_err();
    assert!(matches!(err, RuntimeError::AlreadyExists(_)), "got {:?}", err);
    assert_eq!(only(&runtime, "dev").await.pid, first);

    runtime.start().await?;
    runtime.stop().await?;
    Ok(())
}

#[tokio::test]
async fn default_namespace_applies_when_none_is_given() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let config = RuntimeConfigBuilder::new(tmp.path())
        .default_namespace("sandbox")
        .build();
    let (runtime, _) = runtime_with_fake_fetcher(config);

    runtime
        .create(sh("idle", "sleep 30").into(), CreateOptions::default())
        .await?;
    assert_eq!(only(&runtime, "sandbox").await.namespace, "sandbox");
    assert_eq!(runtime.read(ReadOptions::default()).await?.len(), 1);

    runtime.start().await?;
    runtime.stop().await?;
    Ok(())
}

#[tokio::test]
async fn read_filters_by_exact_name_and_version() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let (runtime, _) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());

    for (name, version) in [("echo", "v1"), ("echo", "v2"), ("echoes", "v1")] {
        let def = ServiceDefinitionBuilder::new(name, version)
            .command("sleep")
            .arg("30")
            .build();
        runtime.create(def.into(), in_ns("dev")).await?;
    }

    let by_name = runtime
        .read(ReadOptions {
            namespace: Some("dev".to_string()),
            name: Some("echo".to_string()),
            version: None,
        })
        .await?;
    assert_eq!(by_name.len(), 2);

    let exact = runtime
        .read(ReadOptions {
            namespace: Some("dev".to_string()),
            name: Some("echo".to_string()),
            version: Some("v2".to_string()),
        })
        .await?;
    assert_eq!(exact.len(), 1);
    assert_eq!(exact[0].definition.key(), "echo:v2");

    let empty_filters = runtime
        .read(ReadOptions {
            namespace: Some("dev".to_string()),
            name: Some(String::new()),
            version: Some(String::new()),
        })
        .await?;
    assert_eq!(empty_filters.len(), 3);

    runtime.start().await?;
    runtime.stop().await?;
    Ok(())
}

#[tokio::test]
async fn remote_source_is_fetched_at_latest() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let (runtime, fetcher) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());

    let def = ServiceDefinitionBuilder::new("svc", "latest")
        .source("acme/widgets/svc")
        .build();
    runtime.create(def.into(), in_ns("dev")).await?;

    assert_eq!(
        fetcher.calls(),
        vec![
            "clone github.com/acme/widgets".to_string(),
            "fetch github.com/acme/widgets".to_string(),
            "checkout github.com/acme/widgets latest".to_string(),
        ]
    );
    assert_eq!(only(&runtime, "dev").await.status, ServiceStatus::Running);

    runtime.start().await?;
    runtime.stop().await?;
    Ok(())
}

#[tokio::test]
async fn failed_checkout_registers_nothing() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let config = RuntimeConfigBuilder::new(tmp.path()).build();
    let fetcher = common::FakeFetcher::new(&config.source_cache_dir).failing_checkout();
    let runtime = Runtime::with_components(config, std::sync::Arc::new(fetcher), None);

    let def = ServiceDefinitionBuilder::new("svc", "v1")
        .source("acme/widgets/svc@nope")
        .build();
    let err = runtime.create(def.into(), in_ns("dev")).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Toolchain { .. }), "got {:?}", err);
    assert!(read_ns(&runtime, "dev").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn source_without_a_single_entrypoint_fails_create() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let (runtime, _) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());

    write_file(tmp.path(), "empty/README.md", "nothing to run");
    let none = ServiceDefinitionBuilder::new("empty", "v1")
        .source(tmp.path().join("empty").to_string_lossy())
        .build();
    let err = runtime.create(none.into(), in_ns("dev")).await.unwrap_err();
    assert!(matches!(err, RuntimeError::NotFound(_)), "got {:?}", err);

    write_file(tmp.path(), "multi/cmd/a/main.go", "package main");
    write_file(tmp.path(), "multi/cmd/b/main.go", "package main");
    let multi = ServiceDefinitionBuilder::new("multi", "v1")
        .source(tmp.path().join("multi").to_string_lossy())
        .build();
    let err = runtime.create(multi.into(), in_ns("dev")).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Parse(_)), "got {:?}", err);

    assert!(read_ns(&runtime, "dev").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn definition_without_command_or_source_is_rejected() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let (runtime, _) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());

    let err = runtime
        .create(ServiceDefinition::new("ghost", "v1").into(), in_ns("dev"))
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::Parse(_)), "got {:?}", err);
    Ok(())
}

#[tokio::test]
async fn crashed_service_reports_error_and_is_not_restarted() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let (runtime, _) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());

    runtime.create(sh("flaky", "exit 3").into(), in_ns("dev")).await?;
    assert!(settles_at(&runtime, "dev", ServiceStatus::Crashed).await);

    let info = only(&runtime, "dev").await;
    let error = info.error.expect("crash reason");
    assert!(error.contains('3'), "{error}");

    // No supervisor brings it back.
    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    let later = only(&runtime, "dev").await;
    assert_eq!(later.status, ServiceStatus::Crashed);
    assert_eq!(later.pid, info.pid);
    Ok(())
}

#[tokio::test]
async fn clean_exit_reads_as_stopped_and_delete_succeeds() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let (runtime, _) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());
    let def = sh("oneshot", "exit 0");

    runtime.create(def.clone().into(), in_ns("dev")).await?;
    assert!(settles_at(&runtime, "dev", ServiceStatus::Stopped).await);
    assert!(only(&runtime, "dev").await.error.is_none());

    let opts = DeleteOptions {
        namespace: Some("dev".to_string()),
    };
    runtime.delete(def.into(), opts).await?;
    assert!(read_ns(&runtime, "dev").await.is_empty());
    Ok(())
}

#[tokio::test]
async fn delete_stops_the_process_and_is_idempotent() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let (runtime, _) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());
    let def = sh("idle", "sleep 30");
    let opts = DeleteOptions {
        namespace: Some("dev".to_string()),
    };

    runtime.create(def.clone().into(), in_ns("dev")).await?;
    let pid = only(&runtime, "dev").await.pid.expect("pid") as i32;

    with_timeout(runtime.delete(def.clone().into(), opts.clone())).await?;
    assert!(read_ns(&runtime, "dev").await.is_empty());
    // The process has been reaped, so signalling it finds nothing.
    assert!(nix::sys::signal::kill(nix::unistd::Pid::from_raw(pid), None).is_err());

    runtime.delete(def.clone().into(), opts.clone()).await?;
    runtime
        .delete(
            def.into(),
            DeleteOptions {
                namespace: Some("never-created".to_string()),
            },
        )
        .await?;
    Ok(())
}

#[tokio::test]
async fn update_of_unknown_service_is_not_found() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let (runtime, _) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());

    let err = runtime
        .update(sh("ghost", "true").into(), UpdateOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::NotFound(_)), "got {:?}", err);
    Ok(())
}

#[tokio::test]
async fn update_restarts_with_a_new_process() -> TestResult {
    init_tracing();
    let tmp = tempfile::tempdir()?;
    let dir = service_dir(tmp.path(), "echo");
    let (runtime, _) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());
    let def = ServiceDefinitionBuilder::new("echo", "v1")
        .source(dir.to_string_lossy())
        .build();

    runtime.create(def.clone().into(), in_ns("dev")).await?;
    let before = only(&runtime, "dev").await;

    // An empty source keeps the registered one.
    let mut update = def.clone();
    update.source = String::new();
    let opts = UpdateOptions {
        namespace: Some("dev".to_string()),
    };
    with_timeout(runtime.update(update.into(), opts)).await?;

    let after = only(&runtime, "dev").await;
    assert_eq!(after.status, ServiceStatus::Running);
    assert_ne!(after.pid, before.pid);
    assert_eq!(after.definition.source, def.source);

    runtime.start().await?;
    runtime.stop().await?;
    Ok(())
}

#[tokio::test]
async fn update_after_exit_starts_again() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let (runtime, _) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());
    let def = sh("oneshot", "exit 0");
    runtime.create(def.clone().into(), in_ns("dev")).await?;
    assert!(settles_at(&runtime, "dev", ServiceStatus::Stopped).await);
    let before = only(&runtime, "dev").await.pid;

    // Stopping the exited process is not an error; a fresh one is forked.
    let opts = UpdateOptions {
        namespace: Some("dev".to_string()),
    };
    runtime.update(def.into(), opts).await?;
    assert_ne!(only(&runtime, "dev").await.pid, before);
    assert!(settles_at(&runtime, "dev", ServiceStatus::Stopped).await);
    Ok(())
}

#[tokio::test]
async fn env_and_secrets_reach_the_process_and_its_log() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let (runtime, _) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());
    let def = ServiceDefinitionBuilder::new("printer", "v1")
        .command("sh")
        .arg("-c")
        .arg("echo \"$MODE $TOKEN\"")
        .env("MODE=debug")
        .secret("TOKEN", "abc")
        .build();

    runtime.create(def.into(), in_ns("dev")).await?;
    let log = tmp.path().join("logs").join("printer.log");
    assert!(
        eventually(|| {
            let log = log.clone();
            async move { std::fs::read_to_string(&log).unwrap_or_default() == "debug abc\n" }
        })
        .await
    );
    Ok(())
}

#[tokio::test]
async fn logs_replay_service_output() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let (runtime, _) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());
    let def = sh("chatty", "echo hello; echo world >&2; echo done");

    let err = runtime
        .logs(&def, LogsOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, RuntimeError::NotFound(_)), "got {:?}", err);

    runtime.create(def.clone().into(), in_ns("dev")).await?;
    assert!(settles_at(&runtime, "dev", ServiceStatus::Stopped).await);
    let log = tmp.path().join("logs").join("chatty.log");
    assert!(
        eventually(|| {
            let log = log.clone();
            async move { std::fs::read_to_string(&log).unwrap_or_default().lines().count() == 3 }
        })
        .await
    );

    let opts = LogsOptions {
        stream: false,
        count: 10,
    };
    let mut stream = runtime.logs(&def, opts).await?;
    let mut lines = Vec::new();
    while let Some(record) = with_timeout(stream.recv()).await {
        lines.push(record.message);
    }
    lines.sort();
    assert_eq!(lines, vec!["done", "hello", "world"]);
    Ok(())
}

#[tokio::test]
async fn runtime_stop_stops_everything_but_keeps_registrations() -> TestResult {
    let tmp = tempfile::tempdir()?;
    let (runtime, _) = runtime_with_fake_fetcher(RuntimeConfigBuilder::new(tmp.path()).build());

    runtime.create(sh("a", "sleep 30").into(), in_ns("dev")).await?;
    runtime.create(sh("b", "sleep 30").into(), in_ns("jobs")).await?;

    // Not started yet: Stop leaves services alone.
    assert!(!runtime.is_running());
    runtime.stop().await?;
    assert_eq!(only(&runtime, "dev").await.status, ServiceStatus::Running);

    runtime.start().await?;
    runtime.start().await?;
    assert!(runtime.is_running());

    with_timeout(runtime.stop()).await?;
    assert!(!runtime.is_running());
    assert_eq!(only(&runtime, "dev").await.status, ServiceStatus::Stopped);
    assert_eq!(only(&runtime, "jobs").await.status, ServiceStatus::Stopped);

    runtime.stop().await?;
    Ok(())
}
