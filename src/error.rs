//! Error types for source coordination.

use snafu::Snafu;

/// Convenience alias for results carrying [`Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the coordination core.
///
/// The enum is `Clone` so that one failure can be broadcast to every caller
/// coalesced onto the same in-flight resolution. Not-found and deduction
/// failures are never cached; a later attempt after upstream repair runs
/// the full path again.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    /// A requested version is absent from the source's freshly loaded
    /// version list.
    #[snafu(display("version \"{version}\" does not exist in source"))]
    VersionNotFound {
        /// The symbolic or revision name as presented by the caller.
        version: String,
    },

    /// The source could not be found upstream.
    #[snafu(display("{url} does not exist upstream"))]
    NoUpstreamExistence {
        /// The resolved source URL.
        url: String,
    },

    /// The source has no local working copy.
    #[snafu(display("{url} does not exist in the local cache"))]
    NoLocalExistence {
        /// The resolved source URL.
        url: String,
    },

    /// The call manager's lifetime signal fired before the call could be
    /// registered.
    #[snafu(display("call manager lifetime has been cancelled"))]
    Shutdown,

    /// An in-flight operation observed cancellation and unwound.
    #[snafu(display("{operation} was cancelled"))]
    Cancelled {
        /// The operation that was cut short.
        operation: String,
    },

    /// The underlying source driver failed (transport, VCS, or filesystem).
    #[snafu(display("source driver failure: {message}"))]
    Driver {
        /// The driver's description of the failure.
        message: String,
    },

    /// No source could be deduced for an identifier.
    #[snafu(display("cannot deduce a source for \"{name}\": {message}"))]
    Deduction {
        /// The normalized identifier that failed to resolve.
        name: String,
        /// The deducer's description of the failure.
        message: String,
    },
}
