//! Source coordination and caching core for a dependency-management engine.
//!
//! The crate mediates all access to external *sources*, the remote
//! repositories from which project metadata, version lists, and package
//! trees are drawn, so that:
//!
//! - concurrent callers asking about the same logical source share one
//!   gateway and one serialized stream of side effects against its on-disk
//!   working area;
//! - expensive operations (network fetches, repository analyses) run once
//!   and land in a per-source cache of revisions, manifests, locks, package
//!   trees, and version→revision bindings;
//! - each source is progressively brought up through a declared set of
//!   readiness states, and each operation declares exactly the readiness it
//!   needs;
//! - long-running calls are observable and cancellable as a group through a
//!   shared lifetime signal.
//!
//! The actual I/O (deduction, VCS and network access, working-copy
//! analysis) lives behind the traits in [`source`] and
//! [`project::ProjectAnalyzer`]; the core owns no CLI, wire format, or
//! persistent state.
//!
//! # Usage
//!
//! ```ignore
//! use std::sync::Arc;
//!
//! use quarry::{CallManager, ProjectIdentifier, SourceCoordinator};
//! use tokio_util::sync::CancellationToken;
//!
//! let shutdown = CancellationToken::new();
//! let calls = Arc::new(CallManager::new(shutdown.clone()));
//! let coordinator = SourceCoordinator::new(calls, deducer, "/var/cache/quarry");
//!
//! let gateway = coordinator
//!     .source_gateway_for(&shutdown, &ProjectIdentifier::new("github.com/x/y"))
//!     .await?;
//! let versions = gateway.list_versions(&shutdown).await?;
//! ```

#![warn(missing_docs)]

pub mod cache;
pub mod calls;
pub mod coordinator;
mod error;
pub mod gateway;
pub mod project;
pub mod source;
pub mod version;

pub use cache::MemoryCache;
pub use cache::SourceCache;
pub use calls::CallGuard;
pub use calls::CallManager;
pub use calls::CallStats;
pub use calls::CallType;
pub use coordinator::SourceCoordinator;
pub use error::Error;
pub use error::Result;
pub use gateway::SourceGateway;
pub use gateway::SourceState;
pub use project::AnalyzerInfo;
pub use project::Lock;
pub use project::LockedProject;
pub use project::Manifest;
pub use project::Package;
pub use project::PackageTree;
pub use project::ProjectInfo;
pub use project::ProjectAnalyzer;
pub use project::ProjectIdentifier;
pub use project::ProjectRoot;
pub use source::Deducer;
pub use source::Deduction;
pub use source::ExistenceLocation;
pub use source::MaybeSource;
pub use source::Source;
pub use version::PairedVersion;
pub use version::Revision;
pub use version::UnpairedVersion;
pub use version::Version;
