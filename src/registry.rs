//! Config-driven adapter lifecycle.
//!
//! The registry owns every running [`Adapter`]. `apply` diffs a new
//! configuration against what is live, starts and stops adapters to match,
//! and installs a fresh route table when anything changed. The router only
//! ever sees whole tables, never intermediate states.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::adapters::{codec_for, Adapter, InboundSink};
use crate::config::{PlatformSection, SwitchboardConfig};
use crate::connection::ConnectionSettings;
use crate::router::{MessageRouter, RouteTable};
use crate::transport::{TransportError, TransportFactory};
use crate::types::Platform;

/// One running adapter plus the section it was built from.
///
/// The stored section is what `apply` diffs against, so credential rotation
/// and option changes are detected without asking the adapter anything.
#[derive(Debug)]
struct LiveAdapter {
    adapter: Arc<Adapter>,
    section: PlatformSection,
}

/// Outcome of one [`AdapterRegistry::apply`] call, by platform.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplySummary {
    /// Route table generation after the apply.
    pub generation: u64,
    /// Platforms that got a brand-new adapter.
    pub started: Vec<Platform>,
    /// Platforms whose adapter was torn down and rebuilt.
    pub replaced: Vec<Platform>,
    /// Platforms whose adapter was torn down and not rebuilt.
    pub stopped: Vec<Platform>,
    /// Platforms left exactly as they were.
    pub unchanged: Vec<Platform>,
    /// Platforms whose adapter could not be constructed.
    pub failed: Vec<Platform>,
}

impl ApplySummary {
    /// Whether this apply changed the set of running adapters.
    pub fn changed(&self) -> bool {
        !self.started.is_empty()
            || !self.replaced.is_empty()
            || !self.stopped.is_empty()
            || !self.failed.is_empty()
    }
}

/// Constructs and destroys adapters as configuration changes.
///
/// Single writer of the router's route table. All mutation happens under
/// one async lock, so overlapping `apply` calls serialize.
pub struct AdapterRegistry {
    router: Arc<MessageRouter>,
    factory: Box<dyn TransportFactory>,
    live: Mutex<HashMap<Platform, LiveAdapter>>,
    generation: AtomicU64,
}

impl AdapterRegistry {
    /// Registry with no running adapters.
    pub fn new(router: Arc<MessageRouter>, factory: Box<dyn TransportFactory>) -> Self {
        Self {
            router,
            factory,
            live: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    /// Bring the set of running adapters in line with `config`.
    ///
    /// Newly enabled platforms get a fresh adapter; disabled ones are shut
    /// down; section changes (credentials, gateway) tear down and rebuild.
    /// A platform whose adapter cannot be constructed is reported in
    /// [`ApplySummary::failed`] and does not stop the others from applying.
    /// The route table is swapped once, at the end, and only if something
    /// changed.
    pub async fn apply(&self, config: &SwitchboardConfig) -> ApplySummary {
        let settings = ConnectionSettings::from_config(config);
        let mut live = self.live.lock().await;
        let mut summary = ApplySummary::default();

        for platform in Platform::ALL {
            let section = config.platforms.section(platform);
            match (live.contains_key(&platform), section.enabled()) {
                (true, true) => {
                    let current_matches = live
                        .get(&platform)
                        .is_some_and(|entry| entry.section == section);
                    if current_matches {
                        summary.unchanged.push(platform);
                        continue;
                    }
                    if let Some(old) = live.remove(&platform) {
                        info!(platform = %platform, "section changed, restarting adapter");
                        old.adapter.shutdown().await;
                    }
                    match self.build(platform, &section, settings) {
                        Ok(entry) => {
                            live.insert(platform, entry);
                            summary.replaced.push(platform);
                        }
                        Err(e) => {
                            error!(platform = %platform, error = %e, "failed to rebuild adapter");
                            summary.failed.push(platform);
                        }
                    }
                }
                (true, false) => {
                    if let Some(old) = live.remove(&platform) {
                        info!(platform = %platform, "platform disabled, stopping adapter");
                        old.adapter.shutdown().await;
                    }
                    summary.stopped.push(platform);
                }
                (false, true) => match self.build(platform, &section, settings) {
                    Ok(entry) => {
                        info!(platform = %platform, "adapter started");
                        live.insert(platform, entry);
                        summary.started.push(platform);
                    }
                    Err(e) => {
                        error!(platform = %platform, error = %e, "failed to start adapter");
                        summary.failed.push(platform);
                    }
                },
                (false, false) => {}
            }
        }

        if summary.changed() {
            let generation = self.next_generation();
            summary.generation = generation;
            self.router
                .install_table(RouteTable::new(generation, snapshot(&live)));
            info!(
                generation,
                started = ?summary.started,
                replaced = ?summary.replaced,
                stopped = ?summary.stopped,
                failed = ?summary.failed,
                "configuration applied"
            );
        } else {
            summary.generation = self.generation.load(Ordering::Acquire);
            debug!("configuration unchanged, route table kept");
        }
        summary
    }

    /// Stop every adapter and install an empty route table.
    ///
    /// The table goes first so no new send reaches an adapter mid-teardown.
    /// Returns once every connection is closed.
    pub async fn shutdown(&self) {
        let mut live = self.live.lock().await;
        info!(adapters = live.len(), "stopping all adapters");
        let generation = self.next_generation();
        self.router
            .install_table(RouteTable::new(generation, HashMap::new()));
        for (platform, entry) in live.drain() {
            entry.adapter.shutdown().await;
            info!(platform = %platform, "adapter stopped");
        }
    }

    fn build(
        &self,
        platform: Platform,
        section: &PlatformSection,
        settings: ConnectionSettings,
    ) -> Result<LiveAdapter, TransportError> {
        let transport = self.factory.create(platform, section)?;
        let adapter = Arc::new(Adapter::start(
            codec_for(platform),
            transport,
            settings,
            Arc::clone(&self.router) as Arc<dyn InboundSink>,
        ));
        Ok(LiveAdapter {
            adapter,
            section: section.clone(),
        })
    }

    fn next_generation(&self) -> u64 {
        self.generation.fetch_add(1, Ordering::AcqRel).wrapping_add(1)
    }
}

fn snapshot(live: &HashMap<Platform, LiveAdapter>) -> HashMap<Platform, Arc<Adapter>> {
    live.iter()
        .map(|(platform, entry)| (*platform, Arc::clone(&entry.adapter)))
        .collect()
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("generation", &self.generation.load(Ordering::Acquire))
            .finish_non_exhaustive()
    }
}
