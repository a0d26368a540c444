//! Version and revision identities for sources.
//!
//! Sources expose their history through three shapes: a bare [`Revision`],
//! a symbolic [`UnpairedVersion`] (branch, tag, or semver tag), and a
//! [`PairedVersion`] binding a symbolic name to the revision it currently
//! resolves to. [`Version`] is the closed sum of the three.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

/// An opaque, immutable identifier of a concrete source snapshot, such as a
/// commit hash.
///
/// Revisions are assumed permanent: once observed, a revision never changes
/// meaning, which is what makes per-revision caching sound.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Revision(String);

impl Revision {
    /// Create a revision from its identifier.
    pub fn new(id: impl Into<String>) -> Self {
        Revision(id.into())
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Revision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Revision {
    fn from(id: &str) -> Self {
        Revision(id.to_owned())
    }
}

impl From<String> for Revision {
    fn from(id: String) -> Self {
        Revision(id)
    }
}

/// A symbolic version name with no revision bound to it.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum UnpairedVersion {
    /// A branch name, e.g. `main`.
    Branch(String),
    /// A tag that is not a semantic version.
    Tag(String),
    /// A semantic-version tag, e.g. `v1.2.3`.
    Semver(String),
}

impl UnpairedVersion {
    /// The symbolic name itself, without shape information.
    pub fn name(&self) -> &str {
        match self {
            UnpairedVersion::Branch(name) => name,
            UnpairedVersion::Tag(name) => name,
            UnpairedVersion::Semver(name) => name,
        }
    }

    /// Bind this symbolic name to the revision it currently resolves to.
    pub fn is(&self, revision: Revision) -> PairedVersion {
        PairedVersion {
            version: self.clone(),
            revision,
        }
    }
}

impl fmt::Display for UnpairedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A symbolic version together with the revision it currently resolves to.
///
/// The binding reflects what some authority (upstream, local mirror, or a
/// caller-supplied pin) reported at the time it was recorded; it is not
/// re-validated on read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PairedVersion {
    version: UnpairedVersion,
    revision: Revision,
}

impl PairedVersion {
    /// The revision this version resolves to.
    pub fn underlying(&self) -> &Revision {
        &self.revision
    }

    /// The symbolic name, with the binding stripped.
    pub fn unpair(&self) -> &UnpairedVersion {
        &self.version
    }
}

impl fmt::Display for PairedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.version, self.revision)
    }
}

/// Any of the three version shapes a caller may present.
///
/// The sum is closed; every consumer matches exhaustively, so there is no
/// "unknown variant" path to defend against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Version {
    /// A bare revision.
    Revision(Revision),
    /// A symbolic name without a bound revision.
    Unpaired(UnpairedVersion),
    /// A symbolic name bound to a revision.
    Paired(PairedVersion),
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Version::Revision(r) => r.fmt(f),
            Version::Unpaired(u) => u.fmt(f),
            Version::Paired(p) => p.unpair().fmt(f),
        }
    }
}

impl From<Revision> for Version {
    fn from(r: Revision) -> Self {
        Version::Revision(r)
    }
}

impl From<UnpairedVersion> for Version {
    fn from(u: UnpairedVersion) -> Self {
        Version::Unpaired(u)
    }
}

impl From<PairedVersion> for Version {
    fn from(p: PairedVersion) -> Self {
        Version::Paired(p)
    }
}
