//! Per-source cache of revision-indexed data.
//!
//! Each source gateway owns one [`SourceCache`] recording everything learned
//! about its source: manifest/lock pairs per analyzer, package trees, and the
//! version↔revision bindings. [`MemoryCache`] is the default process-scoped
//! implementation; a persistent backend can be swapped in behind the same
//! trait without the gateway noticing.
//!
//! All entries are append-only, on the assumption that revisions are
//! permanent. The one exception is the bulk invalidation performed by
//! [`SourceCache::store_version_map`] with `flush` set: symbolic bindings are
//! replaced wholesale, but the record of which revisions exist is kept.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::project::AnalyzerInfo;
use crate::project::PackageTree;
use crate::project::ProjectInfo;
use crate::version::PairedVersion;
use crate::version::Revision;
use crate::version::UnpairedVersion;
use crate::version::Version;

/// Storage and retrieval of data about a single source.
///
/// Methods are synchronous: the cache is always consulted from a task that
/// already holds the owning gateway's serializing lock, so an implementation
/// only needs enough internal locking to be safely shareable.
pub trait SourceCache: Send + Sync {
    /// Record the manifest and lock extracted from `rev` by the analyzer
    /// identified by `analyzer`.
    fn set_project_info(&self, rev: &Revision, analyzer: &AnalyzerInfo, info: ProjectInfo);

    /// The manifest and lock previously recorded for `rev` under `analyzer`.
    fn get_project_info(&self, rev: &Revision, analyzer: &AnalyzerInfo) -> Option<ProjectInfo>;

    /// Record the package tree enumerated at `rev`.
    fn set_package_tree(&self, rev: &Revision, tree: PackageTree);

    /// The package tree previously recorded for `rev`.
    fn get_package_tree(&self, rev: &Revision) -> Option<PackageTree>;

    /// Record the bindings between the given paired versions' symbolic names
    /// and their revisions.
    ///
    /// With `flush` set, existing symbolic bindings are purged first:
    /// revisions lose their pairings but remain recorded as existing, since
    /// revisions are immutable and permanent. Without `flush`, entries
    /// accumulate; the cache does not de-duplicate repeated appends, so
    /// callers that re-store a full list choose `flush`.
    fn store_version_map(&self, versions: &[PairedVersion], flush: bool);

    /// The symbolic versions recorded against `rev`.
    ///
    /// `Some(vec![])` means the revision is known but currently has no
    /// pairings; `None` means the revision has never been observed.
    fn get_versions_for(&self, rev: &Revision) -> Option<Vec<UnpairedVersion>>;

    /// Every version pair currently known, materialized as paired versions.
    /// Order is unspecified.
    fn get_all_versions(&self) -> Vec<Version>;

    /// The revision bound to the given symbolic version.
    fn get_revision_for(&self, version: &UnpairedVersion) -> Option<Revision>;

    /// Coerce `version` to a revision using the information it carries plus
    /// the recorded bindings.
    fn to_revision(&self, version: &Version) -> Option<Revision>;

    /// Coerce `version` to a symbolic version using the information it
    /// carries plus the recorded bindings.
    ///
    /// When a revision has several symbolic names, whichever was recorded
    /// first is returned.
    fn to_unpaired(&self, version: &Version) -> Option<UnpairedVersion>;
}

#[derive(Default)]
struct Maps {
    infos: HashMap<AnalyzerInfo, HashMap<Revision, ProjectInfo>>,
    ptrees: HashMap<Revision, PackageTree>,
    v_map: HashMap<UnpairedVersion, Revision>,
    // Authoritative set of revisions ever observed. Every ptrees key, every
    // inner infos key, and every v_map value must also be keyed here.
    r_map: HashMap<Revision, Vec<UnpairedVersion>>,
}

/// In-memory [`SourceCache`] guarded by a single readers/writer lock.
#[derive(Default)]
pub struct MemoryCache {
    maps: RwLock<Maps>,
}

impl MemoryCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl SourceCache for MemoryCache {
    fn set_project_info(&self, rev: &Revision, analyzer: &AnalyzerInfo, info: ProjectInfo) {
        let mut maps = self.maps.write();
        maps.infos
            .entry(analyzer.clone())
            .or_default()
            .insert(rev.clone(), info);
        maps.r_map.entry(rev.clone()).or_default();
    }

    fn get_project_info(&self, rev: &Revision, analyzer: &AnalyzerInfo) -> Option<ProjectInfo> {
        let maps = self.maps.read();
        maps.infos.get(analyzer)?.get(rev).cloned()
    }

    fn set_package_tree(&self, rev: &Revision, tree: PackageTree) {
        let mut maps = self.maps.write();
        maps.ptrees.insert(rev.clone(), tree);
        maps.r_map.entry(rev.clone()).or_default();
    }

    fn get_package_tree(&self, rev: &Revision) -> Option<PackageTree> {
        self.maps.read().ptrees.get(rev).cloned()
    }

    fn store_version_map(&self, versions: &[PairedVersion], flush: bool) {
        let mut maps = self.maps.write();
        if flush {
            for pairings in maps.r_map.values_mut() {
                pairings.clear();
            }
            maps.v_map.clear();
        }

        for pv in versions {
            let unpaired = pv.unpair().clone();
            let rev = pv.underlying().clone();
            maps.v_map.insert(unpaired.clone(), rev.clone());
            maps.r_map.entry(rev).or_default().push(unpaired);
        }
    }

    fn get_versions_for(&self, rev: &Revision) -> Option<Vec<UnpairedVersion>> {
        self.maps.read().r_map.get(rev).cloned()
    }

    fn get_all_versions(&self) -> Vec<Version> {
        let maps = self.maps.read();
        maps.v_map
            .iter()
            .map(|(unpaired, rev)| Version::Paired(unpaired.is(rev.clone())))
            .collect()
    }

    fn get_revision_for(&self, version: &UnpairedVersion) -> Option<Revision> {
        self.maps.read().v_map.get(version).cloned()
    }

    fn to_revision(&self, version: &Version) -> Option<Revision> {
        match version {
            Version::Revision(rev) => Some(rev.clone()),
            Version::Paired(pv) => Some(pv.underlying().clone()),
            Version::Unpaired(unpaired) => self.maps.read().v_map.get(unpaired).cloned(),
        }
    }

    fn to_unpaired(&self, version: &Version) -> Option<UnpairedVersion> {
        match version {
            Version::Unpaired(unpaired) => Some(unpaired.clone()),
            Version::Paired(pv) => Some(pv.unpair().clone()),
            Version::Revision(rev) => self
                .maps
                .read()
                .r_map
                .get(rev)
                .and_then(|pairings| pairings.first().cloned()),
        }
    }
}
