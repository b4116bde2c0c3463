// src/runtime/registry.rs

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tempfile::NamedTempFile;
use tokio::sync::RwLock;
use tokio::task;
use tracing::{debug, info, warn};

use crate::build::archive::pack_dir;
use crate::build::{BuildArtifact, Builder, ToolchainBuilder};
use crate::config::RuntimeConfig;
use crate::errors::{ProcessError, Result, RuntimeError};
use crate::fs::RealFileSystem;
use crate::git::{self, Fetcher};
use crate::logs::{LogStream, LogsOptions, log_file_path};
use crate::process::Executable;
use crate::runtime::{
    CreateOptions, DeleteOptions, ReadOptions, Resource, RunningService, ServiceDefinition,
    ServiceInfo, UpdateOptions,
};
use crate::source::{SourceLocator, entrypoint, upload};
use crate::types::ArchiveKind;

type Namespaces = HashMap<String, BTreeMap<String, RunningService>>;

/// Local, single-node service runtime.
///
/// All services live in one `namespace -> key -> RunningService` map behind
/// a single read/write lock. Every mutation holds the write lock for the
/// whole map, so a concurrent Read sees a service either fully present or
/// absent. Fetching and building happen before the lock is taken.
#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    fetcher: Arc<dyn Fetcher>,
    builder: Option<Arc<dyn Builder>>,
    namespaces: RwLock<Namespaces>,
    running: AtomicBool,
}

impl Runtime {
    /// Build a runtime, probing the machine for a fetcher and a toolchain.
    ///
    /// A missing toolchain is not an error here; only prebuilt Creates need
    /// it.
    pub fn new(config: RuntimeConfig) -> Self {
        let fetcher = git::new_fetcher(&config.source_cache_dir);
        let builder: Option<Arc<dyn Builder>> =
            match ToolchainBuilder::locate(config.toolchain.clone(), &config.tmp_dir) {
                Ok(builder) => Some(Arc::new(builder)),
                Err(e) => {
                    debug!(error = %e, "no build toolchain; prebuild unavailable");
                    None
                }
            };
        Self::with_components(config, fetcher, builder)
    }

    /// Build a runtime around explicit collaborators.
    pub fn with_components(
        config: RuntimeConfig,
        fetcher: Arc<dyn Fetcher>,
        builder: Option<Arc<dyn Builder>>,
    ) -> Self {
        Self {
            config,
            fetcher,
            builder,
            namespaces: RwLock::new(HashMap::new()),
            running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn namespace_or_default(&self, namespace: Option<&str>) -> String {
        match namespace {
            Some(ns) if !ns.is_empty() => ns.to_string(),
            _ => self.config.default_namespace.clone(),
        }
    }

    /// Register a service (forking it immediately) or an empty namespace.
    pub async fn create(&self, resource: Resource, opts: CreateOptions) -> Result<()> {
        match resource {
            Resource::Service(def) => self.create_service(def, opts).await,
            Resource::Namespace(ns) => {
                let mut namespaces = self.namespaces.write().await;
                if namespaces.contains_key(&ns) {
                    return Err(RuntimeError::AlreadyExists(format!("namespace '{}'", ns)));
                }
                info!(namespace = %ns, "namespace created");
                namespaces.insert(ns, BTreeMap::new());
                Ok(())
            }
            Resource::NetworkPolicy(_) => Err(unsupported("create", "networkpolicy")),
        }
    }

    async fn create_service(&self, def: ServiceDefinition, opts: CreateOptions) -> Result<()> {
        let namespace = self.namespace_or_default(opts.namespace.as_deref());
        let key = def.key();

        if self.contains(&namespace, &key).await {
            return Err(already_exists(&namespace, &key));
        }

        let prebuild = opts.prebuild.unwrap_or(self.config.prebuild);
        let exe = self.resolve(&namespace, &def, &def.source, prebuild).await?;
        let log_path = log_file_path(&self.config.log_dir, &def.name);
        let mut service = RunningService::new(&namespace, def, exe, log_path, opts.output)
            .with_prebuild(prebuild);

        let mut namespaces = self.namespaces.write().await;
        // Another Create may have won while the source was prepared.
        if namespaces
            .get(&namespace)
            .is_some_and(|services| services.contains_key(&key))
        {
            return Err(already_exists(&namespace, &key));
        }
        // The namespace only comes into being once the service is running.
        service.start().await?;
        namespaces
            .entry(namespace.clone())
            .or_default()
            .insert(key.clone(), service);

        info!(namespace = %namespace, service = %key, "service created");
        Ok(())
    }

    /// List services of one namespace, filtered by exact name and version.
    pub async fn read(&self, opts: ReadOptions) -> Result<Vec<ServiceInfo>> {
        let namespace = self.namespace_or_default(opts.namespace.as_deref());
        let namespaces = self.namespaces.read().await;
        let Some(services) = namespaces.get(&namespace) else {
            return Ok(Vec::new());
        };

        let keep = |filter: &Option<String>, value: &str| match filter.as_deref() {
            None | Some("") => true,
            Some(f) => f == value,
        };

        Ok(services
            .values()
            .filter(|s| keep(&opts.name, &s.definition().name))
            .filter(|s| keep(&opts.version, &s.definition().version))
            .map(RunningService::info)
            .collect())
    }

    /// Stop the service, rebind it to the definition's source, and start it
    /// again.
    pub async fn update(&self, resource: Resource, opts: UpdateOptions) -> Result<()> {
        let def = match resource {
            Resource::Service(def) => def,
            other => return Err(unsupported("update", other.kind())),
        };
        let namespace = self.namespace_or_default(opts.namespace.as_deref());
        let key = def.key();

        let (current, prebuild) = {
            let namespaces = self.namespaces.read().await;
            let service = namespaces
                .get(&namespace)
                .and_then(|services| services.get(&key))
                .ok_or_else(|| not_found(&namespace, &key))?;
            (service.definition().clone(), service.prebuild())
        };

        // An empty source keeps the current one.
        let source = if def.source.is_empty() {
            current.source.clone()
        } else {
            def.source
        };
        let exe = self.resolve(&namespace, &current, &source, prebuild).await?;

        let mut namespaces = self.namespaces.write().await;
        let service = namespaces
            .get_mut(&namespace)
            .and_then(|services| services.get_mut(&key))
            .ok_or_else(|| not_found(&namespace, &key))?;

        tolerate_exited(service.stop().await)?;
        service.rebind(source, exe);
        service.start().await?;

        info!(namespace = %namespace, service = %key, "service updated");
        Ok(())
    }

    /// Stop and forget a service, or every service of a namespace. Absent
    /// targets are not an error.
    pub async fn delete(&self, resource: Resource, opts: DeleteOptions) -> Result<()> {
        match resource {
            Resource::Service(def) => {
                let namespace = self.namespace_or_default(opts.namespace.as_deref());
                let key = def.key();
                let mut namespaces = self.namespaces.write().await;
                let Some(services) = namespaces.get_mut(&namespace) else {
                    return Ok(());
                };
                let Some(service) = services.get_mut(&key) else {
                    return Ok(());
                };
                if service.is_running() {
                    tolerate_exited(service.stop().await)?;
                }
                services.remove(&key);
                info!(namespace = %namespace, service = %key, "service deleted");
                Ok(())
            }
            Resource::Namespace(ns) => {
                let mut namespaces = self.namespaces.write().await;
                let Some(mut services) = namespaces.remove(&ns) else {
                    return Ok(());
                };
                for (key, service) in services.iter_mut() {
                    if let Err(e) = tolerate_exited(service.stop().await) {
                        warn!(namespace = %ns, service = %key, error = %e, "failed to stop service");
                    }
                }
                info!(namespace = %ns, services = services.len(), "namespace deleted");
                Ok(())
            }
            Resource::NetworkPolicy(_) => Err(unsupported("delete", "networkpolicy")),
        }
    }

    /// Stream a service's log file.
    pub async fn logs(&self, service: &ServiceDefinition, opts: LogsOptions) -> Result<LogStream> {
        let path = log_file_path(&self.config.log_dir, &service.name);
        LogStream::open(&service.name, path, opts, self.config.average_line_bytes).await
    }

    /// Mark the runtime as running. Idempotent.
    pub async fn start(&self) -> Result<()> {
        let _namespaces = self.namespaces.write().await;
        if !self.running.swap(true, Ordering::SeqCst) {
            info!("runtime started");
        }
        Ok(())
    }

    /// Stop every tracked service in every namespace. Services stay
    /// registered. A no-op unless the runtime is running.
    pub async fn stop(&self) -> Result<()> {
        let mut namespaces = self.namespaces.write().await;
        if !self.running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        for (ns, services) in namespaces.iter_mut() {
            for (key, service) in services.iter_mut() {
                debug!(namespace = %ns, service = %key, "stopping service");
                if let Err(e) = tolerate_exited(service.stop().await) {
                    warn!(namespace = %ns, service = %key, error = %e, "failed to stop service");
                }
            }
        }
        info!("runtime stopped");
        Ok(())
    }

    async fn contains(&self, namespace: &str, key: &str) -> bool {
        self.namespaces
            .read()
            .await
            .get(namespace)
            .is_some_and(|services| services.contains_key(key))
    }

    /// Turn a definition and source into the command to fork.
    async fn resolve(
        &self,
        namespace: &str,
        def: &ServiceDefinition,
        source: &str,
        prebuild: bool,
    ) -> Result<Executable> {
        let source_dir = self.prepare_source(source).await?;
        let mut exe = Executable {
            program: String::new(),
            args: def.args.clone(),
            env: def.environment(),
            dir: source_dir.clone(),
        };

        if let Some(command) = &def.command {
            exe.program = command.clone();
            return Ok(exe);
        }

        let Some(dir) = source_dir else {
            return Err(RuntimeError::Parse(format!(
                "service '{}' has neither a command nor a source",
                def.key()
            )));
        };
        let toolchain = &self.config.toolchain;
        let entrypoint = match &def.entrypoint {
            Some(ep) => ep.clone(),
            None => entrypoint::locate(&RealFileSystem, &dir, &toolchain.entrypoint_file)?,
        };
        exe.dir = Some(entrypoint::working_dir(&dir, &entrypoint));

        if prebuild {
            let artifact = self.prebuild(namespace, def, source, dir, entrypoint).await?;
            exe.program = artifact.binary_path.to_string_lossy().into_owned();
        } else {
            exe.program = toolchain.program.clone();
            exe.args = toolchain
                .run_args
                .iter()
                .chain(def.args.iter())
                .cloned()
                .collect();
        }
        debug!(service = %def.key(), program = %exe.program, dir = ?exe.dir, "resolved command");
        Ok(exe)
    }

    /// Bring a source onto disk and return its directory.
    ///
    /// Uploaded archives are unpacked, local paths used in place, and remote
    /// locators checked out into the source cache at their ref (`latest`
    /// when none is given).
    async fn prepare_source(&self, source: &str) -> Result<Option<PathBuf>> {
        if source.trim().is_empty() {
            return Ok(None);
        }

        if let Some(archive) = upload::uploaded_archive(&self.config.upload_dir, source) {
            let dir = blocking(move || upload::unpack_upload(&archive)).await?;
            return Ok(Some(dir));
        }

        let mut locator = SourceLocator::parse_local(
            &RealFileSystem,
            &self.config.work_dir,
            source,
            &self.config.catalog,
        )?;
        if locator.local {
            return Ok(locator.full_path);
        }

        let fetcher = Arc::clone(&self.fetcher);
        let dir = blocking(move || git::checkout_source(fetcher.as_ref(), &mut locator)).await?;
        Ok(Some(dir))
    }

    /// Compile the source directory and write the binary into the artifact
    /// directory.
    async fn prebuild(
        &self,
        namespace: &str,
        def: &ServiceDefinition,
        source: &str,
        dir: PathBuf,
        entrypoint: PathBuf,
    ) -> Result<BuildArtifact> {
        let Some(builder) = self.builder.clone() else {
            return Err(RuntimeError::toolchain(
                self.config.toolchain.program.clone(),
                "toolchain not found; cannot prebuild",
            ));
        };
        let target = artifact_path(&self.config.artifact_dir, namespace, def);
        let out = target.clone();

        blocking(move || {
            let src = pack_dir(&dir)?;
            let bytes = builder.build(&src, ArchiveKind::Tar, Some(entrypoint.as_path()))?;
            write_executable(&out, &bytes)
        })
        .await?;

        info!(service = %def.key(), artifact = ?target, "prebuilt service");
        Ok(BuildArtifact {
            name: def.key(),
            binary_path: target,
            source_ref: source.to_string(),
            kind: ArchiveKind::Tar,
        })
    }
}

/// `<artifact_dir>/<namespace>-<name>-<version>`, with `/` in the name
/// replaced by `-`.
pub fn artifact_path(artifact_dir: &Path, namespace: &str, def: &ServiceDefinition) -> PathBuf {
    artifact_dir.join(format!(
        "{}-{}-{}",
        namespace,
        def.name.replace('/', "-"),
        def.version
    ))
}

/// Write the binary next to `path` and rename it into place.
///
/// The previous binary may still be executing; overwriting it in place fails
/// with ETXTBSY on Linux, while a rename leaves the running inode alone.
fn write_executable(path: &Path, bytes: &[u8]) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let mut staged = NamedTempFile::new_in(parent)?;
    staged.write_all(bytes)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        staged
            .as_file()
            .set_permissions(fs::Permissions::from_mode(0o755))?;
    }
    staged.persist(path).map_err(|e| e.error)?;
    Ok(())
}

/// Run blocking fetch/build work off the async threads.
async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    task::spawn_blocking(f)
        .await
        .map_err(|e| RuntimeError::Other(anyhow::anyhow!("blocking task failed: {}", e)))?
}

/// Stopping a process that is already gone is success.
fn tolerate_exited(result: Result<()>) -> Result<()> {
    match result {
        Err(RuntimeError::Process(ProcessError::NoSuchProcess(pid))) => {
            debug!(pid, "process already exited");
            Ok(())
        }
        other => other,
    }
}

fn unsupported(op: &str, kind: &str) -> RuntimeError {
    RuntimeError::InvalidResource(format!("cannot {} a {}", op, kind))
}

fn already_exists(namespace: &str, key: &str) -> RuntimeError {
    RuntimeError::AlreadyExists(format!("service {} in namespace '{}'", key, namespace))
}

fn not_found(namespace: &str, key: &str) -> RuntimeError {
    RuntimeError::NotFound(format!("service {} in namespace '{}'", key, namespace))
}
