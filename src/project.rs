//! Project identity and per-revision payloads.
//!
//! A project is named by its [`ProjectRoot`]; callers address it through a
//! [`ProjectIdentifier`], which may carry an explicit source location that
//! overrides the root for network purposes. The payloads extracted from a
//! checked-out revision are the [`Manifest`]/[`Lock`] pair (together a
//! [`ProjectInfo`]) and the [`PackageTree`].

use std::collections::BTreeMap;
use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::version::Revision;
use crate::version::UnpairedVersion;

/// The import-path root under which a project's packages live.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectRoot(pub String);

impl fmt::Display for ProjectRoot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectRoot {
    fn from(root: &str) -> Self {
        ProjectRoot(root.to_owned())
    }
}

/// How a caller names a project: the root, plus an optional explicit source
/// location used instead of the root when resolving where to fetch from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ProjectIdentifier {
    /// The project's import-path root.
    pub root: ProjectRoot,
    /// An explicit source location overriding the root, if any.
    pub source: Option<String>,
}

impl ProjectIdentifier {
    /// Identify a project by its root alone.
    pub fn new(root: impl Into<String>) -> Self {
        ProjectIdentifier {
            root: ProjectRoot(root.into()),
            source: None,
        }
    }

    /// Identify a project by its root with an explicit source location.
    pub fn with_source(root: impl Into<String>, source: impl Into<String>) -> Self {
        ProjectIdentifier {
            root: ProjectRoot(root.into()),
            source: Some(source.into()),
        }
    }

    /// The name under which source resolution is keyed: the explicit source
    /// when present, the root otherwise.
    pub fn normalized_source(&self) -> &str {
        self.source.as_deref().unwrap_or(&self.root.0)
    }
}

/// The hashable identity of a [`ProjectAnalyzer`].
///
/// Two analyzers with the same info are interchangeable for caching: the
/// manifest and lock they extract from a given revision are assumed equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct AnalyzerInfo {
    /// The analyzer's name.
    pub name: String,
    /// The analyzer's version; bumped whenever its extraction rules change.
    pub version: u32,
}

impl fmt::Display for AnalyzerInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.v{}", self.name, self.version)
    }
}

/// Extracts manifest and lock data from a checked-out revision.
///
/// The core never reads a working copy itself; it passes the analyzer down
/// to the source driver and keys cached results by [`AnalyzerInfo`].
pub trait ProjectAnalyzer: Send + Sync {
    /// The identity under which this analyzer's results are cached.
    fn info(&self) -> AnalyzerInfo;
}

/// A project's declared dependency constraints, as read from its manifest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Manifest {
    /// Constraint expression per depended-upon project root.
    pub constraints: BTreeMap<String, String>,
}

/// One pinned project inside a [`Lock`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockedProject {
    /// The pinned project's root.
    pub root: ProjectRoot,
    /// The revision the pin resolves to.
    pub revision: Revision,
    /// The symbolic version the pin was made at, when one was recorded.
    pub version: Option<UnpairedVersion>,
}

/// A project's lock: the transitively pinned set of its dependencies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    /// The pinned projects.
    pub pins: Vec<LockedProject>,
}

/// The manifest/lock pair produced by analyzing one revision with one
/// analyzer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectInfo {
    /// The declared constraints.
    pub manifest: Manifest,
    /// The pinned dependency set, when the revision carries one.
    pub lock: Lock,
}

/// One package inside a [`PackageTree`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    /// The package's name.
    pub name: String,
    /// Import paths this package depends on.
    pub imports: Vec<String>,
}

/// Structured enumeration of the packages present at one revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageTree {
    /// The root all package paths are relative to.
    pub import_root: String,
    /// Packages keyed by their path under the root.
    pub packages: BTreeMap<String, Package>,
}
