//! External interfaces the core consumes.
//!
//! The core never talks to a VCS, the network, or the filesystem itself.
//! It drives implementations of these traits: a [`Deducer`] turns an
//! identifier into a [`Deduction`], the deduction's [`MaybeSource`] probes
//! candidates until one works, and the resulting [`Source`] driver performs
//! all I/O against the working copy and upstream.
//!
//! Every driver call receives a cancellation token combining the caller's
//! own signal with the call manager's lifetime signal; implementations are
//! expected to observe it at their own suspension points.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::cache::SourceCache;
use crate::error::Result;
use crate::project::Lock;
use crate::project::Manifest;
use crate::project::PackageTree;
use crate::project::ProjectAnalyzer;
use crate::project::ProjectRoot;
use crate::version::PairedVersion;
use crate::version::Revision;

/// Which of a source's two homes an existence probe asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExistenceLocation {
    /// The remote repository.
    Upstream,
    /// The on-disk working copy under the cache directory.
    Local,
}

/// The capability set of an instantiated source driver.
#[async_trait]
pub trait Source: Send + Sync {
    /// Whether the source exists at `location`.
    async fn check_existence(
        &self,
        token: &CancellationToken,
        location: ExistenceLocation,
    ) -> bool;

    /// The versions the source currently exposes, each paired with the
    /// revision it resolves to.
    async fn list_versions(&self, token: &CancellationToken) -> Result<Vec<PairedVersion>>;

    /// Bring the local working copy up to date with upstream.
    async fn sync_local(&self, token: &CancellationToken) -> Result<()>;

    /// Extract the manifest and lock at `rev` using `analyzer`.
    async fn get_manifest_and_lock(
        &self,
        token: &CancellationToken,
        root: &ProjectRoot,
        rev: &Revision,
        analyzer: &dyn ProjectAnalyzer,
    ) -> Result<(Manifest, Lock)>;

    /// Enumerate the packages present at `rev`.
    async fn list_packages(
        &self,
        token: &CancellationToken,
        root: &ProjectRoot,
        rev: &Revision,
    ) -> Result<PackageTree>;

    /// Write the tree at `rev` to `dest`.
    async fn export_version_to(
        &self,
        token: &CancellationToken,
        rev: &Revision,
        dest: &Path,
    ) -> Result<()>;

    /// Whether `rev` is present in the local working copy.
    async fn revision_present_in(&self, token: &CancellationToken, rev: &Revision) -> Result<bool>;
}

/// A candidate source location that may or may not work.
///
/// Probing settles on a concrete driver and the canonical URL it operates
/// on. The probe receives the gateway's cache handle so an implementation
/// that learns version data while probing may record it opportunistically.
#[async_trait]
pub trait MaybeSource: Send + Sync {
    /// Probe candidates and return the driver that works, along with the
    /// canonical URL it settled on.
    async fn try_source(
        &self,
        token: &CancellationToken,
        cache_dir: &Path,
        cache: Arc<dyn SourceCache>,
    ) -> Result<(Box<dyn Source>, String)>;
}

/// The outcome of deducing an identifier: the project root the identifier
/// falls under, and the capability to construct its source.
pub struct Deduction {
    /// The deduced project root.
    pub root: ProjectRoot,
    /// The maybe-source capability for the root.
    pub maybe: Box<dyn MaybeSource>,
}

/// Maps a normalized identifier to a candidate source descriptor.
#[async_trait]
pub trait Deducer: Send + Sync {
    /// Deduce the root path and source capability for `name`.
    ///
    /// Failures are surfaced to every caller waiting on the identifier and
    /// are never cached, so externally driven retry policies work.
    async fn deduce_root_path(&self, name: &str) -> Result<Deduction>;
}
