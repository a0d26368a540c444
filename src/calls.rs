//! Lifecycle, cancellation, and metering for outbound calls.
//!
//! Every expensive operation against a source (network fetch, repository
//! analysis) registers with the [`CallManager`] before it runs. Registration
//! yields a [`CallGuard`] carrying a token that fires when *either* the
//! caller's own token or the manager's lifetime token is cancelled, so the
//! whole process can be shut down as a group while individual callers keep
//! their own deadlines.
//!
//! Calls are keyed by `(name, type)`. Overlapping registrations of the same
//! key share one clock: the count is incremented, and only the final
//! completion folds the elapsed time into the per-type aggregate.

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use std::time::Instant;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::Result;
use crate::error::ShutdownSnafu;

/// The closed set of outbound call shapes the core performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallType {
    /// Metadata lookup over HTTP during source deduction.
    HttpMetadata,
    /// Listing the versions a source exposes.
    ListVersions,
    /// Extracting the manifest and lock from a revision.
    GetManifestAndLock,
    /// Enumerating the packages present at a revision.
    ListPackages,
    /// Syncing the local working copy with upstream.
    SyncLocal,
    /// Probing a source for existence.
    CheckExistence,
    /// Exporting a revision's tree to a destination.
    ExportVersion,
    /// Checking whether a revision is present locally.
    RevisionPresent,
}

/// The identity of an in-flight call: who it is against, and what it does.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallInfo {
    /// The source (or identifier) the call targets.
    pub name: String,
    /// The operation being performed.
    pub typ: CallType,
}

/// Completed-call aggregate for one [`CallType`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallStats {
    /// How many distinct call keys of this type have fully completed.
    pub completed: u64,
    /// Wall-clock time accumulated across those completions.
    pub total_duration: Duration,
}

#[derive(Debug)]
struct TimeCount {
    count: u32,
    start: Instant,
}

#[derive(Debug, Default)]
struct Tables {
    running: HashMap<CallInfo, TimeCount>,
    ran: HashMap<CallType, CallStats>,
}

/// Registers, deduplicates, and meters outbound calls, and carries the
/// process-wide cancellation signal they all share.
pub struct CallManager {
    lifetime: CancellationToken,
    tables: Arc<Mutex<Tables>>,
}

impl CallManager {
    /// Create a manager whose lifetime is a child of `parent`: cancelling
    /// `parent` cancels every call registered here.
    pub fn new(parent: CancellationToken) -> Self {
        CallManager {
            lifetime: parent.child_token(),
            tables: Arc::new(Mutex::new(Tables::default())),
        }
    }

    /// Atomically register a call and derive its cancellation token.
    ///
    /// The returned guard's token fires when either `caller` or the
    /// manager's lifetime token is cancelled. Dropping the guard completes
    /// the call: intermediate drops for a shared key only decrement the
    /// count, the final drop stops the clock and updates [`CallStats`].
    ///
    /// Fails with [`Error::Shutdown`](crate::Error::Shutdown) when the
    /// lifetime token has already been cancelled. Cancellation *after*
    /// registration does not fail; the caller observes it through the
    /// returned token.
    pub fn setup_call(
        &self,
        caller: &CancellationToken,
        name: impl Into<String>,
        typ: CallType,
    ) -> Result<CallGuard> {
        let info = CallInfo {
            name: name.into(),
            typ,
        };

        {
            let mut tables = self.tables.lock();
            if self.lifetime.is_cancelled() {
                return ShutdownSnafu.fail();
            }

            match tables.running.entry(info.clone()) {
                Entry::Occupied(mut active) => active.get_mut().count += 1,
                Entry::Vacant(slot) => {
                    slot.insert(TimeCount {
                        count: 1,
                        start: Instant::now(),
                    });
                }
            }
        }

        debug!(name = %info.name, call_type = ?info.typ, "registered outbound call");

        // Combined cancellation: a fresh token with two parents, realized as
        // a forwarder task selecting on both. The guard aborts the forwarder
        // on drop so it cannot leak.
        let combined = CancellationToken::new();
        let forwarder = tokio::spawn({
            let caller = caller.clone();
            let lifetime = self.lifetime.clone();
            let combined = combined.clone();
            async move {
                tokio::select! {
                    _ = caller.cancelled() => combined.cancel(),
                    _ = lifetime.cancelled() => combined.cancel(),
                    _ = combined.cancelled() => {}
                }
            }
        });

        Ok(CallGuard {
            token: combined,
            tables: Arc::clone(&self.tables),
            info,
            forwarder,
        })
    }

    /// A clone of the manager's lifetime token.
    pub fn lifetime_token(&self) -> CancellationToken {
        self.lifetime.clone()
    }

    /// Cancel the lifetime token, cancelling every outstanding call and
    /// failing all future registrations.
    pub fn cancel_all(&self) {
        self.lifetime.cancel();
    }

    /// How many registrations of `(name, typ)` are currently active.
    pub fn in_flight(&self, name: &str, typ: CallType) -> u32 {
        let tables = self.tables.lock();
        tables
            .running
            .get(&CallInfo {
                name: name.to_owned(),
                typ,
            })
            .map_or(0, |active| active.count)
    }

    /// Completed-call aggregate for `typ`.
    pub fn stats(&self, typ: CallType) -> CallStats {
        self.tables.lock().ran.get(&typ).copied().unwrap_or_default()
    }
}

/// RAII completion handle for one registered call.
///
/// Carries the combined cancellation token the underlying operation must
/// respect. Dropping the guard completes the call.
#[derive(Debug)]
pub struct CallGuard {
    token: CancellationToken,
    tables: Arc<Mutex<Tables>>,
    info: CallInfo,
    forwarder: JoinHandle<()>,
}

impl CallGuard {
    /// The token the metered operation must watch: fires on either the
    /// caller's cancellation or the manager's lifetime cancellation.
    pub fn token(&self) -> &CancellationToken {
        &self.token
    }
}

impl Drop for CallGuard {
    fn drop(&mut self) {
        self.forwarder.abort();

        let mut tables = self.tables.lock();
        let Some(active) = tables.running.get_mut(&self.info) else {
            // Guards pair every registration with exactly one completion, so
            // an unmatched completion is an invariant violation.
            panic!(
                "call manager: completed call {}/{:?} that was never registered",
                self.info.name, self.info.typ
            );
        };

        if active.count > 1 {
            // More registrations are pending on this key; don't stop the
            // clock yet.
            active.count -= 1;
        } else {
            let elapsed = active.start.elapsed();
            tables.running.remove(&self.info);
            let stats = tables.ran.entry(self.info.typ).or_default();
            stats.completed += 1;
            stats.total_duration += elapsed;
            debug!(
                name = %self.info.name,
                call_type = ?self.info.typ,
                elapsed_ms = elapsed.as_millis() as u64,
                "outbound call completed"
            );
        }
    }
}
