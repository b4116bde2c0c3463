// src/lib.rs

pub mod build;
pub mod cli;
pub mod config;
pub mod errors;
pub mod fs;
pub mod git;
pub mod logging;
pub mod logs;
pub mod process;
pub mod runtime;
pub mod source;
pub mod types;

use std::collections::BTreeSet;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{debug, error, info};

use crate::cli::CliArgs;
use crate::config::{Manifest, load_and_validate};
use crate::logs::LogsOptions;
use crate::runtime::{CreateOptions, ReadOptions, Resource, Runtime, ServiceDefinition};

/// High-level entry point used by `main.rs`.
///
/// Loads the manifest, creates every service on a fresh runtime, prints
/// their status, optionally follows their logs, and stops everything on
/// Ctrl-C.
pub async fn run(args: CliArgs) -> Result<()> {
    let manifest_path = PathBuf::from(&args.config);
    let manifest = load_and_validate(&manifest_path)
        .with_context(|| format!("loading manifest {:?}", manifest_path))?;

    if args.dry_run {
        print_dry_run(&manifest);
        return Ok(());
    }

    let runtime = Runtime::new(manifest.runtime.clone());
    runtime.start().await?;

    let mut created = Vec::new();
    for (name, svc) in &manifest.service {
        let namespace = svc.effective_namespace(&manifest.runtime).to_string();
        let def = svc.to_definition(name);
        let opts = CreateOptions {
            namespace: Some(namespace.clone()),
            output: None,
            prebuild: svc.prebuild,
        };
        match runtime.create(Resource::Service(def.clone()), opts).await {
            Ok(()) => created.push(def),
            Err(e) => error!(service = %name, namespace = %namespace, error = %e, "failed to create service"),
        }
    }

    print_status(&runtime, &manifest).await?;

    if args.follow {
        for def in &created {
            follow_logs(&runtime, def, args.tail).await;
        }
    }

    info!("running; press Ctrl-C to stop");
    tokio::signal::ctrl_c()
        .await
        .context("listening for Ctrl-C")?;

    runtime.stop().await?;
    Ok(())
}

async fn follow_logs(runtime: &Runtime, def: &ServiceDefinition, tail: u64) {
    let opts = LogsOptions {
        stream: true,
        count: tail,
    };
    let mut stream = match runtime.logs(def, opts).await {
        Ok(stream) => stream,
        Err(e) => {
            error!(service = %def.name, error = %e, "cannot follow logs");
            return;
        }
    };
    let name = def.name.clone();
    tokio::spawn(async move {
        while let Some(record) = stream.recv().await {
            println!("[{}] {}", name, record.message);
        }
        if let Some(e) = stream.error() {
            error!(service = %name, error = %e, "log stream ended with error");
        }
    });
}

async fn print_status(runtime: &Runtime, manifest: &Manifest) -> Result<()> {
    let namespaces: BTreeSet<&str> = manifest
        .service
        .values()
        .map(|svc| svc.effective_namespace(&manifest.runtime))
        .collect();

    println!(
        "{:<12} {:<20} {:<12} {:<10} {:>8}",
        "NAMESPACE", "NAME", "VERSION", "STATUS", "PID"
    );
    for ns in namespaces {
        let services = runtime
            .read(ReadOptions {
                namespace: Some(ns.to_string()),
                ..Default::default()
            })
            .await?;
        for info in services {
            let pid = info.pid.map(|p| p.to_string()).unwrap_or_else(|| "-".into());
            println!(
                "{:<12} {:<20} {:<12} {:<10} {:>8}",
                info.namespace, info.definition.name, info.definition.version, info.status, pid
            );
            if let Some(err) = info.error {
                println!("    error: {err}");
            }
        }
    }
    Ok(())
}

fn print_dry_run(manifest: &Manifest) {
    let rt = &manifest.runtime;
    println!("devrun dry-run");
    println!("  runtime.log_dir = {:?}", rt.log_dir);
    println!("  runtime.source_cache_dir = {:?}", rt.source_cache_dir);
    println!("  runtime.work_dir = {:?}", rt.work_dir);
    println!("  runtime.catalog = {}", rt.catalog);
    println!("  runtime.prebuild = {}", rt.prebuild);
    println!("  runtime.toolchain.program = {}", rt.toolchain.program);
    println!();

    println!("services ({}):", manifest.service.len());
    for (name, svc) in manifest.service.iter() {
        println!("  - {name}");
        println!("      namespace: {}", svc.effective_namespace(rt));
        println!("      version: {}", svc.version);
        if !svc.source.is_empty() {
            println!("      source: {}", svc.source);
        }
        if let Some(ref cmd) = svc.command {
            println!("      command: {cmd}");
        }
        if !svc.args.is_empty() {
            println!("      args: {:?}", svc.args);
        }
        if !svc.env.is_empty() {
            println!("      env: {:?}", svc.env);
        }
        if !svc.secrets.is_empty() {
            let keys: Vec<&String> = svc.secrets.keys().collect();
            println!("      secrets: {:?}", keys);
        }
        if let Some(prebuild) = svc.prebuild {
            println!("      prebuild: {prebuild}");
        }
    }

    debug!("dry-run complete (nothing started)");
}
