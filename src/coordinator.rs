//! Identifier→gateway resolution with request coalescing.
//!
//! Many identifiers can name one source (`github.com/x/y` and
//! `https://github.com/x/y` resolve to the same repository), and the on-disk
//! working area for a source must only ever have one writer. The coordinator
//! therefore delivers exactly one [`SourceGateway`] per *resolved URL*, no
//! matter how many identifiers alias it or how many callers ask at once:
//! concurrent requests for the same identifier fold onto a single in-flight
//! resolution, and aliases that race to the same URL collapse onto whichever
//! gateway landed first.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::calls::CallManager;
use crate::calls::CallType;
use crate::error::Result;
use crate::gateway::SourceGateway;
use crate::project::ProjectIdentifier;
use crate::source::Deducer;

type Waiter = oneshot::Sender<Result<Arc<SourceGateway>>>;

#[derive(Default)]
struct SrcMaps {
    // One gateway per resolved source URL.
    srcs: HashMap<String, Arc<SourceGateway>>,
    // Normalized identifier → resolved URL. Several names may map to one URL.
    name_to_url: HashMap<String, String>,
}

struct Shared {
    calls: Arc<CallManager>,
    deducer: Arc<dyn Deducer>,
    cache_dir: PathBuf,
    srcs: RwLock<SrcMaps>,
    // In-flight resolutions: normalized identifier → waiters to satisfy.
    // At most one resolution per identifier is ever running.
    proto: Mutex<HashMap<String, Vec<Waiter>>>,
}

/// Resolves project identifiers to live source gateways.
///
/// Cheap to clone; clones share all state. Multiple coordinators may
/// coexist, each with its own cache directory; there is no process-global
/// state.
#[derive(Clone)]
pub struct SourceCoordinator {
    shared: Arc<Shared>,
}

impl SourceCoordinator {
    /// Create a coordinator over the given call manager, deducer, and cache
    /// directory.
    pub fn new(
        calls: Arc<CallManager>,
        deducer: Arc<dyn Deducer>,
        cache_dir: impl Into<PathBuf>,
    ) -> Self {
        SourceCoordinator {
            shared: Arc::new(Shared {
                calls,
                deducer,
                cache_dir: cache_dir.into(),
                srcs: RwLock::new(SrcMaps::default()),
                proto: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The gateway for the source `id` names, constructing it if this is the
    /// first request for the source.
    ///
    /// Concurrent calls for the same identifier share one resolution;
    /// failures are broadcast to every waiter and never cached.
    pub async fn source_gateway_for(
        &self,
        token: &CancellationToken,
        id: &ProjectIdentifier,
    ) -> Result<Arc<SourceGateway>> {
        let name = id.normalized_source().to_owned();

        {
            let maps = self.shared.srcs.read();
            if let Some(url) = maps.name_to_url.get(&name) {
                if let Some(gateway) = maps.srcs.get(url) {
                    return Ok(Arc::clone(gateway));
                }
            }
        }

        // Slow path: hand the rest to a worker and wait for it to report.
        // The worker runs to completion even if this caller goes away, so a
        // late-folding waiter is never left hanging.
        let (tx, rx) = oneshot::channel();
        let this = self.clone();
        let token = token.clone();
        let worker_name = name.clone();
        tokio::spawn(async move { this.resolve(token, worker_name, tx).await });

        rx.await
            .expect("resolution worker always reports a result")
    }

    /// Cancel the call-manager lifetime, cancelling every outstanding call
    /// and failing all future registrations.
    pub fn release(&self) {
        self.shared.calls.cancel_all();
    }

    /// The resolved URL recorded for `id`, if resolution has completed.
    pub fn resolved_url_for(&self, id: &ProjectIdentifier) -> Option<String> {
        self.shared
            .srcs
            .read()
            .name_to_url
            .get(id.normalized_source())
            .cloned()
    }

    /// How many distinct source gateways currently exist.
    pub fn gateway_count(&self) -> usize {
        self.shared.srcs.read().srcs.len()
    }

    /// Coalescing worker: either fold onto the resolution that already owns
    /// `name`, or become the owner and broadcast the outcome.
    async fn resolve(&self, token: CancellationToken, name: String, waiter: Waiter) {
        {
            let mut proto = self.shared.proto.lock();
            if let Some(waiters) = proto.get_mut(&name) {
                // Another worker owns this name; fold in and let it satisfy
                // us.
                waiters.push(waiter);
                return;
            }
            proto.insert(name.clone(), vec![waiter]);
        }

        let outcome = self.materialize(&token, &name).await;
        if let Err(err) = &outcome {
            debug!(name = %name, error = %err, "source resolution failed");
        }

        // Broadcast under the proto lock and remove the key before releasing
        // it, so no late joiner can attach to a completed entry.
        let mut proto = self.shared.proto.lock();
        let waiters = proto
            .remove(&name)
            .expect("owning worker holds the waiter list until broadcast");
        for waiter in waiters {
            let _ = waiter.send(outcome.clone());
        }
    }

    /// Deduce, construct, and install the gateway for `name`.
    async fn materialize(
        &self,
        token: &CancellationToken,
        name: &str,
    ) -> Result<Arc<SourceGateway>> {
        let deduction = {
            let _call = self
                .shared
                .calls
                .setup_call(token, name, CallType::HttpMetadata)?;
            self.shared.deducer.deduce_root_path(name).await?
        };

        // A gateway for this name may have slid into the maps between the
        // caller's fast-path check and this worker getting scheduled.
        {
            let maps = self.shared.srcs.read();
            if let Some(url) = maps.name_to_url.get(name) {
                let gateway = maps
                    .srcs
                    .get(url)
                    .expect("a recorded name mapping always has its gateway installed");
                return Ok(Arc::clone(gateway));
            }
        }

        let gateway = Arc::new(SourceGateway::new(
            deduction.maybe,
            Arc::clone(&self.shared.calls),
            self.shared.cache_dir.clone(),
        ));

        // The normalized name is usually not the source URL (github.com/x/y
        // vs. https://github.com/x/y), and every alias must land on the one
        // gateway registered at the URL to keep disk access single-writer.
        // Forcing source_url() settles the URL via the setup transition.
        let url = gateway.source_url(token).await?;

        let mut maps = self.shared.srcs.write();
        maps.name_to_url.insert(name.to_owned(), url.clone());

        if let Some(existing) = maps.srcs.get(&url) {
            // A sibling alias raced ahead and installed its gateway first;
            // discard ours and share the winner.
            debug!(name = %name, url = %url, "alias collapsed onto existing gateway");
            return Ok(Arc::clone(existing));
        }

        debug!(name = %name, url = %url, "gateway installed");
        maps.srcs.insert(url, Arc::clone(&gateway));
        Ok(gateway)
    }
}
