//! Per-source serialized facade with readiness tracking and cache
//! interposition.
//!
//! A [`SourceGateway`] mediates every operation against one source. A single
//! lock is held for the full duration of each public call, so side effects
//! on the source's on-disk working copy are strictly ordered. Before doing
//! its work, each operation declares the [`SourceState`] readiness it needs;
//! the gateway lazily fills the gap between the current state and the
//! declared requirement, one bit at a time, low to high.

use std::fmt;
use std::ops::BitOr;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::info;

use crate::cache::MemoryCache;
use crate::cache::SourceCache;
use crate::calls::CallManager;
use crate::calls::CallType;
use crate::error::Error;
use crate::error::NoLocalExistenceSnafu;
use crate::error::NoUpstreamExistenceSnafu;
use crate::error::Result;
use crate::error::VersionNotFoundSnafu;
use crate::project::Lock;
use crate::project::Manifest;
use crate::project::PackageTree;
use crate::project::ProjectAnalyzer;
use crate::project::ProjectInfo;
use crate::project::ProjectRoot;
use crate::source::ExistenceLocation;
use crate::source::MaybeSource;
use crate::source::Source;
use crate::version::Revision;
use crate::version::Version;

/// A set of readiness flags describing what has been verified or loaded
/// about a source.
///
/// Flags only ever accumulate over a gateway's life. Each flag's
/// acquisition step presupposes the flags below it, so acquisition always
/// walks bits in increasing order.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
pub struct SourceState(u32);

impl SourceState {
    /// No readiness established yet.
    pub const NONE: SourceState = SourceState(0);
    /// The driver has been constructed and a canonical URL resolved.
    pub const SETUP: SourceState = SourceState(1);
    /// Upstream existence has been verified.
    pub const EXISTS_UPSTREAM: SourceState = SourceState(1 << 1);
    /// Local working-copy existence has been verified.
    pub const EXISTS_LOCALLY: SourceState = SourceState(1 << 2);
    /// The version list has been fetched and the cache's version map is
    /// current.
    pub const HAS_LATEST_VERSION_LIST: SourceState = SourceState(1 << 3);
    /// The local working copy has been synced with upstream.
    pub const HAS_LATEST_LOCALLY: SourceState = SourceState(1 << 4);

    const FLAG_NAMES: [(SourceState, &'static str); 5] = [
        (SourceState::SETUP, "SETUP"),
        (SourceState::EXISTS_UPSTREAM, "EXISTS_UPSTREAM"),
        (SourceState::EXISTS_LOCALLY, "EXISTS_LOCALLY"),
        (SourceState::HAS_LATEST_VERSION_LIST, "HAS_LATEST_VERSION_LIST"),
        (SourceState::HAS_LATEST_LOCALLY, "HAS_LATEST_LOCALLY"),
    ];

    /// Whether every flag in `wanted` is present in `self`.
    pub fn contains(self, wanted: SourceState) -> bool {
        self.0 & wanted.0 == wanted.0
    }

    /// Whether no flag is set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// The flags in `wanted` that are absent from `self`.
    fn missing_from(self, wanted: SourceState) -> SourceState {
        SourceState(!self.0 & wanted.0)
    }

    /// The individual flags present in `self`, lowest bit first.
    fn flags(self) -> impl Iterator<Item = SourceState> {
        Self::FLAG_NAMES
            .into_iter()
            .map(|(flag, _)| flag)
            .filter(move |flag| self.contains(*flag))
    }
}

impl BitOr for SourceState {
    type Output = SourceState;

    fn bitor(self, rhs: SourceState) -> SourceState {
        SourceState(self.0 | rhs.0)
    }
}

impl fmt::Debug for SourceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("NONE");
        }
        let mut first = true;
        for (flag, name) in Self::FLAG_NAMES {
            if self.contains(flag) {
                if !first {
                    f.write_str("|")?;
                }
                f.write_str(name)?;
                first = false;
            }
        }
        Ok(())
    }
}

/// Mutable interior of a gateway; guarded by the serializing lock.
struct GatewayInner {
    state: SourceState,
    src: Option<Box<dyn Source>>,
    url: Option<String>,
}

impl GatewayInner {
    /// The instantiated driver and its canonical URL.
    ///
    /// Only meaningful once [`SourceState::SETUP`] has been acquired; the
    /// caller establishes that first.
    fn driver(&self) -> (&dyn Source, &str) {
        let src = self
            .src
            .as_deref()
            .expect("source driver is constructed during setup");
        let url = self
            .url
            .as_deref()
            .expect("source URL is resolved during setup");
        (src, url)
    }
}

/// Serialized facade over one source.
///
/// All public operations acquire the gateway's single lock for their entire
/// duration; operations on one gateway are therefore linearizable with
/// respect to each other, and at most one task ever touches the source's
/// working directory at a time.
pub struct SourceGateway {
    cache_dir: PathBuf,
    maybe: Box<dyn MaybeSource>,
    cache: Arc<dyn SourceCache>,
    calls: Arc<CallManager>,
    inner: Mutex<GatewayInner>,
}

impl std::fmt::Debug for SourceGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SourceGateway")
            .field("cache_dir", &self.cache_dir)
            .finish_non_exhaustive()
    }
}

impl SourceGateway {
    /// Create a gateway over the given maybe-source, backed by an in-memory
    /// cache.
    pub fn new(
        maybe: Box<dyn MaybeSource>,
        calls: Arc<CallManager>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        Self::with_cache(maybe, calls, cache_dir, Arc::new(MemoryCache::new()))
    }

    /// Create a gateway with a caller-supplied cache backend.
    pub fn with_cache(
        maybe: Box<dyn MaybeSource>,
        calls: Arc<CallManager>,
        cache_dir: impl Into<PathBuf>,
        cache: Arc<dyn SourceCache>,
    ) -> Self {
        SourceGateway {
            cache_dir: cache_dir.into(),
            maybe,
            cache,
            calls,
            inner: Mutex::new(GatewayInner {
                state: SourceState::NONE,
                src: None,
                url: None,
            }),
        }
    }

    /// The readiness currently established for this source.
    pub async fn state(&self) -> SourceState {
        self.inner.lock().await.state
    }

    /// Bring the local working copy up to date with upstream.
    pub async fn sync_local(&self, token: &CancellationToken) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.require(
            &mut inner,
            token,
            SourceState::SETUP | SourceState::HAS_LATEST_LOCALLY,
        )
        .await
        .map_err(|(_, err)| err)
    }

    /// Whether the source exists at all: upstream preferred, local working
    /// copy as fallback.
    pub async fn check_existence(&self, token: &CancellationToken) -> bool {
        let mut inner = self.inner.lock().await;
        if self
            .require(
                &mut inner,
                token,
                SourceState::SETUP | SourceState::EXISTS_UPSTREAM,
            )
            .await
            .is_ok()
        {
            return true;
        }

        self.require(
            &mut inner,
            token,
            SourceState::SETUP | SourceState::EXISTS_LOCALLY,
        )
        .await
        .is_ok()
    }

    /// Write the tree at `version` to `dest`.
    pub async fn export_version_to(
        &self,
        token: &CancellationToken,
        version: &Version,
        dest: &Path,
    ) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.require(
            &mut inner,
            token,
            SourceState::SETUP | SourceState::EXISTS_LOCALLY,
        )
        .await
        .map_err(|(_, err)| err)?;

        let rev = self.convert_to_revision(&mut inner, token, version).await?;
        let (src, url) = inner.driver();
        let guard = self
            .calls
            .setup_call(token, url, CallType::ExportVersion)?;
        src.export_version_to(guard.token(), &rev, dest).await
    }

    /// The manifest and lock at `version`, as extracted by `analyzer`.
    ///
    /// Served from the cache when the (revision, analyzer) pair has been
    /// analyzed before; otherwise extracted by the driver and recorded.
    pub async fn get_manifest_and_lock(
        &self,
        token: &CancellationToken,
        root: &ProjectRoot,
        version: &Version,
        analyzer: &dyn ProjectAnalyzer,
    ) -> Result<(Manifest, Lock)> {
        let mut inner = self.inner.lock().await;
        let rev = self.convert_to_revision(&mut inner, token, version).await?;

        let key = analyzer.info();
        if let Some(cached) = self.cache.get_project_info(&rev, &key) {
            return Ok((cached.manifest, cached.lock));
        }

        self.require(&mut inner, token, SourceState::SETUP)
            .await
            .map_err(|(_, err)| err)?;

        let (src, url) = inner.driver();
        let guard = self
            .calls
            .setup_call(token, url, CallType::GetManifestAndLock)?;
        let (manifest, lock) = src
            .get_manifest_and_lock(guard.token(), root, &rev, analyzer)
            .await?;

        self.cache.set_project_info(
            &rev,
            &key,
            ProjectInfo {
                manifest: manifest.clone(),
                lock: lock.clone(),
            },
        );
        Ok((manifest, lock))
    }

    /// The package tree at `version`.
    ///
    /// Served from the cache when the revision has been enumerated before.
    pub async fn list_packages(
        &self,
        token: &CancellationToken,
        root: &ProjectRoot,
        version: &Version,
    ) -> Result<PackageTree> {
        let mut inner = self.inner.lock().await;
        let rev = self.convert_to_revision(&mut inner, token, version).await?;

        if let Some(cached) = self.cache.get_package_tree(&rev) {
            return Ok(cached);
        }

        self.require(&mut inner, token, SourceState::SETUP)
            .await
            .map_err(|(_, err)| err)?;

        let (src, url) = inner.driver();
        let guard = self.calls.setup_call(token, url, CallType::ListPackages)?;
        let tree = src.list_packages(guard.token(), root, &rev).await?;

        self.cache.set_package_tree(&rev, tree.clone());
        Ok(tree)
    }

    /// Every version the source exposes, paired with its revision.
    pub async fn list_versions(&self, token: &CancellationToken) -> Result<Vec<Version>> {
        let mut inner = self.inner.lock().await;
        self.require(
            &mut inner,
            token,
            SourceState::SETUP
                | SourceState::EXISTS_UPSTREAM
                | SourceState::HAS_LATEST_VERSION_LIST,
        )
        .await
        .map_err(|(_, err)| err)?;

        Ok(self.cache.get_all_versions())
    }

    /// Whether `rev` is present in the source.
    ///
    /// A revision the cache has ever observed is trusted to be present;
    /// otherwise the local working copy is consulted.
    pub async fn revision_present_in(
        &self,
        token: &CancellationToken,
        rev: &Revision,
    ) -> Result<bool> {
        let mut inner = self.inner.lock().await;
        self.require(
            &mut inner,
            token,
            SourceState::SETUP | SourceState::EXISTS_LOCALLY,
        )
        .await
        .map_err(|(_, err)| err)?;

        if self.cache.get_versions_for(rev).is_some() {
            return Ok(true);
        }

        let (src, url) = inner.driver();
        let guard = self
            .calls
            .setup_call(token, url, CallType::RevisionPresent)?;
        src.revision_present_in(guard.token(), rev).await
    }

    /// The canonical URL the source settled on.
    pub async fn source_url(&self, token: &CancellationToken) -> Result<String> {
        let mut inner = self.inner.lock().await;
        self.require(
            &mut inner,
            token,
            SourceState::SETUP | SourceState::EXISTS_LOCALLY,
        )
        .await
        .map_err(|(_, err)| err)?;

        Ok(inner.driver().1.to_owned())
    }

    /// Resolve `version` to a revision.
    ///
    /// Four authorities can hold an opinion on a version→revision binding:
    /// upstream, the local working copy, this cache, and the caller's own
    /// input. A binding already recorded in the cache wins even if stale, so
    /// a caller pinned to a specific (version, revision) pair observes
    /// consistent behavior; correcting a stale pin is an intentional act by
    /// the caller, never an automatic one here.
    async fn convert_to_revision(
        &self,
        inner: &mut GatewayInner,
        token: &CancellationToken,
        version: &Version,
    ) -> Result<Revision> {
        if let Some(rev) = self.cache.to_revision(version) {
            return Ok(rev);
        }

        if inner.state.contains(SourceState::HAS_LATEST_VERSION_LIST) {
            // The version list is current and holds no match; a reload
            // cannot help.
            return VersionNotFoundSnafu {
                version: version.to_string(),
            }
            .fail();
        }

        // The version list may be out of date; the version might show up
        // after loading it.
        self.require(
            inner,
            token,
            SourceState::SETUP | SourceState::HAS_LATEST_VERSION_LIST,
        )
        .await
        .map_err(|(_, err)| err)?;

        match self.cache.to_revision(version) {
            Some(rev) => Ok(rev),
            None => VersionNotFoundSnafu {
                version: version.to_string(),
            }
            .fail(),
        }
    }

    /// Establish every flag in `wanted` that is not yet set, lowest bit
    /// first.
    ///
    /// On failure, flags acquired so far stay set and the offending flag is
    /// returned alongside the error; the remaining flags are not attempted.
    async fn require(
        &self,
        inner: &mut GatewayInner,
        token: &CancellationToken,
        wanted: SourceState,
    ) -> Result<(), (SourceState, Error)> {
        let todo = inner.state.missing_from(wanted);

        for flag in todo.flags() {
            let step = self.acquire(inner, token, flag).await;
            if let Err(err) = step {
                return Err((flag, err));
            }

            inner.state = inner.state | flag;
            debug!(state = ?inner.state, acquired = ?flag, "source readiness advanced");
        }

        Ok(())
    }

    /// Perform the acquisition step for a single readiness flag.
    async fn acquire(
        &self,
        inner: &mut GatewayInner,
        token: &CancellationToken,
        flag: SourceState,
    ) -> Result<()> {
        match flag {
            SourceState::SETUP => {
                let (src, url) = self
                    .maybe
                    .try_source(token, &self.cache_dir, Arc::clone(&self.cache))
                    .await?;
                info!(url = %url, "source driver set up");
                inner.src = Some(src);
                inner.url = Some(url);
                Ok(())
            }
            SourceState::EXISTS_UPSTREAM => {
                let (src, url) = inner.driver();
                let guard = self
                    .calls
                    .setup_call(token, url, CallType::CheckExistence)?;
                if src
                    .check_existence(guard.token(), ExistenceLocation::Upstream)
                    .await
                {
                    Ok(())
                } else {
                    NoUpstreamExistenceSnafu { url }.fail()
                }
            }
            SourceState::EXISTS_LOCALLY => {
                let (src, url) = inner.driver();
                let guard = self
                    .calls
                    .setup_call(token, url, CallType::CheckExistence)?;
                if src
                    .check_existence(guard.token(), ExistenceLocation::Local)
                    .await
                {
                    Ok(())
                } else {
                    NoLocalExistenceSnafu { url }.fail()
                }
            }
            SourceState::HAS_LATEST_VERSION_LIST => {
                let (src, url) = inner.driver();
                let guard = self.calls.setup_call(token, url, CallType::ListVersions)?;
                let versions = src.list_versions(guard.token()).await?;
                // Full-list reload: replace the symbolic bindings wholesale.
                self.cache.store_version_map(&versions, true);
                Ok(())
            }
            SourceState::HAS_LATEST_LOCALLY => {
                let (src, url) = inner.driver();
                let guard = self.calls.setup_call(token, url, CallType::SyncLocal)?;
                src.sync_local(guard.token()).await
            }
            _ => unreachable!("readiness flags are acquired one bit at a time"),
        }
    }
}
