//! Shared fixtures: scripted deducer, maybe-source, and driver mocks.
//!
//! A [`SourceScript`] describes what one fake source looks like (its URL,
//! where it exists, which versions it exposes) and records every driver
//! invocation made against it, including the order of calls and the maximum
//! number of driver operations that were ever in flight at once.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::path::PathBuf;
use std::sync::atomic::AtomicUsize;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use quarry::AnalyzerInfo;
use quarry::Deducer;
use quarry::Deduction;
use quarry::Error;
use quarry::ExistenceLocation;
use quarry::Lock;
use quarry::Manifest;
use quarry::MaybeSource;
use quarry::Package;
use quarry::PackageTree;
use quarry::PairedVersion;
use quarry::ProjectAnalyzer;
use quarry::ProjectRoot;
use quarry::Result;
use quarry::Revision;
use quarry::Source;
use quarry::SourceCache;

/// Per-operation invocation counters plus ordering/concurrency observation.
#[derive(Default)]
pub struct Recorder {
    pub try_source: AtomicUsize,
    pub check_existence: AtomicUsize,
    pub list_versions: AtomicUsize,
    pub sync_local: AtomicUsize,
    pub get_manifest_and_lock: AtomicUsize,
    pub list_packages: AtomicUsize,
    pub export_version_to: AtomicUsize,
    pub revision_present_in: AtomicUsize,
    /// Driver operations in the order they were entered.
    pub order: Mutex<Vec<String>>,
    /// Destinations handed to `export_version_to`.
    pub exports: Mutex<Vec<PathBuf>>,
    active: AtomicUsize,
    max_active: AtomicUsize,
}

impl Recorder {
    fn enter(&self, op: &str) {
        self.order.lock().push(op.to_string());
        let now_active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now_active, Ordering::SeqCst);
    }

    fn exit(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
    }

    /// The largest number of driver operations ever simultaneously active.
    pub fn max_active(&self) -> usize {
        self.max_active.load(Ordering::SeqCst)
    }

    pub fn ordered_ops(&self) -> Vec<String> {
        self.order.lock().clone()
    }
}

/// Everything a fake source is scripted to report.
pub struct SourceScript {
    pub url: String,
    pub exists_upstream: bool,
    pub exists_locally: bool,
    /// What `list_versions` reports.
    pub versions: Mutex<Vec<PairedVersion>>,
    /// Revisions `revision_present_in` reports as locally present.
    pub local_revisions: Mutex<Vec<Revision>>,
    /// How long every driver operation takes.
    pub driver_delay: Duration,
    /// When set, `try_source` fails with this driver message.
    pub fail_try: Option<String>,
    pub recorder: Recorder,
}

impl SourceScript {
    pub fn new(url: impl Into<String>) -> SourceScript {
        SourceScript {
            url: url.into(),
            exists_upstream: true,
            exists_locally: true,
            versions: Mutex::new(Vec::new()),
            local_revisions: Mutex::new(Vec::new()),
            driver_delay: Duration::ZERO,
            fail_try: None,
            recorder: Recorder::default(),
        }
    }

    pub fn with_versions(
        url: impl Into<String>,
        versions: Vec<PairedVersion>,
    ) -> SourceScript {
        let script = SourceScript::new(url);
        *script.versions.lock() = versions;
        script
    }
}

/// Driver over a [`SourceScript`].
pub struct ScriptedSource {
    script: Arc<SourceScript>,
}

impl ScriptedSource {
    /// Record entry, pace the operation, and observe cancellation.
    async fn run_op(&self, token: &CancellationToken, op: &str) -> Result<()> {
        self.script.recorder.enter(op);
        let outcome = tokio::select! {
            _ = tokio::time::sleep(self.script.driver_delay) => Ok(()),
            _ = token.cancelled() => Err(Error::Cancelled {
                operation: op.to_string(),
            }),
        };
        self.script.recorder.exit();
        outcome
    }
}

#[async_trait]
impl Source for ScriptedSource {
    async fn check_existence(
        &self,
        token: &CancellationToken,
        location: ExistenceLocation,
    ) -> bool {
        self.script
            .recorder
            .check_existence
            .fetch_add(1, Ordering::SeqCst);
        if self.run_op(token, "check_existence").await.is_err() {
            return false;
        }
        match location {
            ExistenceLocation::Upstream => self.script.exists_upstream,
            ExistenceLocation::Local => self.script.exists_locally,
        }
    }

    async fn list_versions(&self, token: &CancellationToken) -> Result<Vec<PairedVersion>> {
        self.script
            .recorder
            .list_versions
            .fetch_add(1, Ordering::SeqCst);
        self.run_op(token, "list_versions").await?;
        Ok(self.script.versions.lock().clone())
    }

    async fn sync_local(&self, token: &CancellationToken) -> Result<()> {
        self.script.recorder.sync_local.fetch_add(1, Ordering::SeqCst);
        self.run_op(token, "sync_local").await
    }

    async fn get_manifest_and_lock(
        &self,
        token: &CancellationToken,
        root: &ProjectRoot,
        rev: &Revision,
        analyzer: &dyn ProjectAnalyzer,
    ) -> Result<(Manifest, Lock)> {
        self.script
            .recorder
            .get_manifest_and_lock
            .fetch_add(1, Ordering::SeqCst);
        self.run_op(token, "get_manifest_and_lock").await?;

        // Deterministic, distinguishable payload per (root, rev, analyzer).
        let mut manifest = Manifest::default();
        manifest
            .constraints
            .insert(root.to_string(), format!("{}@{}", analyzer.info(), rev));
        Ok((manifest, Lock::default()))
    }

    async fn list_packages(
        &self,
        token: &CancellationToken,
        root: &ProjectRoot,
        rev: &Revision,
    ) -> Result<PackageTree> {
        self.script
            .recorder
            .list_packages
            .fetch_add(1, Ordering::SeqCst);
        self.run_op(token, "list_packages").await?;

        let mut tree = PackageTree {
            import_root: root.to_string(),
            packages: Default::default(),
        };
        tree.packages.insert(
            root.to_string(),
            Package {
                name: rev.to_string(),
                imports: vec![],
            },
        );
        Ok(tree)
    }

    async fn export_version_to(
        &self,
        token: &CancellationToken,
        _rev: &Revision,
        dest: &Path,
    ) -> Result<()> {
        self.script
            .recorder
            .export_version_to
            .fetch_add(1, Ordering::SeqCst);
        self.run_op(token, "export_version_to").await?;
        self.script.recorder.exports.lock().push(dest.to_path_buf());
        Ok(())
    }

    async fn revision_present_in(
        &self,
        token: &CancellationToken,
        rev: &Revision,
    ) -> Result<bool> {
        self.script
            .recorder
            .revision_present_in
            .fetch_add(1, Ordering::SeqCst);
        self.run_op(token, "revision_present_in").await?;
        Ok(self.script.local_revisions.lock().contains(rev))
    }
}

/// Maybe-source that always settles on the scripted driver and URL.
pub struct ScriptedMaybe {
    script: Arc<SourceScript>,
}

impl ScriptedMaybe {
    pub fn new(script: Arc<SourceScript>) -> Self {
        ScriptedMaybe { script }
    }
}

#[async_trait]
impl MaybeSource for ScriptedMaybe {
    async fn try_source(
        &self,
        _token: &CancellationToken,
        _cache_dir: &Path,
        _cache: Arc<dyn SourceCache>,
    ) -> Result<(Box<dyn Source>, String)> {
        self.script.recorder.try_source.fetch_add(1, Ordering::SeqCst);
        self.script
            .recorder
            .order
            .lock()
            .push("try_source".to_string());

        if let Some(message) = &self.script.fail_try {
            return Err(Error::Driver {
                message: message.clone(),
            });
        }

        Ok((
            Box::new(ScriptedSource {
                script: Arc::clone(&self.script),
            }),
            self.script.url.clone(),
        ))
    }
}

/// Deducer handing out scripted maybe-sources by normalized name.
#[derive(Default)]
pub struct ScriptedDeducer {
    pub delay: Duration,
    pub calls: AtomicUsize,
    scripts: Mutex<HashMap<String, Arc<SourceScript>>>,
}

impl ScriptedDeducer {
    pub fn new(delay: Duration) -> Self {
        ScriptedDeducer {
            delay,
            ..ScriptedDeducer::default()
        }
    }

    /// Script `name` to resolve to the given source.
    pub fn script(&self, name: impl Into<String>, script: Arc<SourceScript>) {
        self.scripts.lock().insert(name.into(), script);
    }
}

#[async_trait]
impl Deducer for ScriptedDeducer {
    async fn deduce_root_path(&self, name: &str) -> Result<Deduction> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;

        match self.scripts.lock().get(name).cloned() {
            Some(script) => Ok(Deduction {
                root: ProjectRoot(name.to_string()),
                maybe: Box::new(ScriptedMaybe::new(script)),
            }),
            None => Err(Error::Deduction {
                name: name.to_string(),
                message: "no scripted source".to_string(),
            }),
        }
    }
}

/// Fixed-identity analyzer for cache-key purposes.
pub struct TestAnalyzer {
    info: AnalyzerInfo,
}

impl TestAnalyzer {
    pub fn new(name: &str, version: u32) -> Self {
        TestAnalyzer {
            info: AnalyzerInfo {
                name: name.to_string(),
                version,
            },
        }
    }
}

impl ProjectAnalyzer for TestAnalyzer {
    fn info(&self) -> AnalyzerInfo {
        self.info.clone()
    }
}

pub fn branch(name: &str) -> quarry::UnpairedVersion {
    quarry::UnpairedVersion::Branch(name.to_string())
}

pub fn semver(name: &str) -> quarry::UnpairedVersion {
    quarry::UnpairedVersion::Semver(name.to_string())
}

pub fn rev(id: &str) -> Revision {
    Revision::from(id)
}
