//! Reconciliation driver: merges manager queues and endpoint listings into
//! the record store, advances the per-torrent lifecycle, feeds the transfer
//! executors, and retires torrents once their manager has ingested them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, timeout};
use tracing::{debug, error, info, warn};
use transferarr_config::Tunables;
use transferarr_core::{
    DownloadClient, EndpointTorrentState, InfoHash, ManagerKind, MediaManager, QueueItem,
    TorrentRecord, TorrentSnapshot, TorrentState,
};
use transferarr_store::RecordRegistry;
use transferarr_transfer::{CopyJob, TransferExecutor};

use crate::error::{AppError, AppResult};

/// One configured endpoint with its resolved client.
pub struct NamedEndpoint {
    /// Endpoint name from configuration.
    pub name: String,
    /// Client implementation.
    pub client: Arc<dyn DownloadClient>,
}

/// Listings fetched once per tick, keyed by endpoint name. Endpoints whose
/// `list()` failed this tick are absent.
type Listings = HashMap<String, HashMap<InfoHash, TorrentSnapshot>>;

struct Retirement {
    hash: InfoHash,
    queue_id: String,
    manager_kind: ManagerKind,
    home_client: String,
}

#[derive(Default)]
struct TickOutcome {
    enqueues: Vec<(usize, CopyJob)>,
    retirements: Vec<Retirement>,
    /// Worker slots claimed during this pass, per executor. Enqueues happen
    /// after the pass, so capacity checks must count decisions already made.
    reserved: Vec<usize>,
}

impl TickOutcome {
    fn for_executors(count: usize) -> Self {
        Self {
            reserved: vec![0; count],
            ..Self::default()
        }
    }
}

/// The reconciliation driver. One long-lived value owns the endpoints,
/// adapters, and executors; collaborators observe records through the shared
/// registry.
pub struct TorrentManager {
    endpoints: Vec<NamedEndpoint>,
    adapters: Vec<Arc<dyn MediaManager>>,
    executors: Vec<TransferExecutor>,
    registry: Arc<RecordRegistry>,
    tunables: Tunables,
}

impl TorrentManager {
    /// Wire the driver with its collaborators. Endpoint order is the order
    /// used to resolve a torrent's home when several clients report it.
    #[must_use]
    pub fn new(
        endpoints: Vec<NamedEndpoint>,
        adapters: Vec<Arc<dyn MediaManager>>,
        executors: Vec<TransferExecutor>,
        registry: Arc<RecordRegistry>,
        tunables: Tunables,
    ) -> Self {
        Self {
            endpoints,
            adapters,
            executors,
            registry,
            tunables,
        }
    }

    /// Shared record registry, for concurrent observers.
    #[must_use]
    pub fn registry(&self) -> &Arc<RecordRegistry> {
        &self.registry
    }

    /// Run the reconciliation loop until the shutdown signal fires or the
    /// state store becomes unwritable.
    ///
    /// # Errors
    ///
    /// Returns an error when the state snapshot cannot be persisted.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> AppResult<()> {
        let mut ticker = tokio::time::interval(self.tunables.tick_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            endpoints = self.endpoints.len(),
            adapters = self.adapters.len(),
            connections = self.executors.len(),
            "reconciliation loop started"
        );
        loop {
            tokio::select! {
                _ = ticker.tick() => self.tick().await?,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("shutdown requested; reconciliation loop stopping");
                        return Ok(());
                    }
                }
            }
        }
    }

    /// Stop the executors, waiting out in-flight copies up to the deadline.
    pub async fn shutdown(self, deadline: Duration) {
        for executor in self.executors {
            executor.shutdown(deadline).await;
        }
    }

    /// One reconciliation pass: ingest queues, locate records, drop stale
    /// ones, advance the lifecycle, persist, then run the side effects the
    /// pass decided on.
    ///
    /// # Errors
    ///
    /// Returns an error when the state snapshot cannot be persisted.
    pub async fn tick(&self) -> AppResult<()> {
        let queues = self.poll_queues().await;
        let listings = self.poll_listings().await;

        let outcome = self.reconcile(&queues, &listings);
        self.registry.persist_if_dirty().map_err(AppError::store)?;

        for (index, job) in outcome.enqueues {
            let executor = &self.executors[index];
            let hash = job.hash.clone();
            if executor.try_enqueue(job) {
                debug!(connection = %executor.profile().name, hash = %hash, "copy job enqueued");
            } else {
                // The record stays in its copying state; next tick retries.
                debug!(connection = %executor.profile().name, hash = %hash, "executor busy; copy deferred");
            }
        }

        self.retire(outcome.retirements).await;
        self.registry.persist_if_dirty().map_err(AppError::store)?;
        Ok(())
    }

    async fn poll_queues(&self) -> Vec<(ManagerKind, Vec<QueueItem>)> {
        let mut queues = Vec::with_capacity(self.adapters.len());
        for adapter in &self.adapters {
            let kind = adapter.kind();
            match timeout(self.tunables.call_timeout(), adapter.queue()).await {
                Ok(Ok(items)) => queues.push((kind, items)),
                Ok(Err(err)) => {
                    warn!(kind = %kind, error = %err, transient = err.is_transient(), "manager queue unavailable this tick");
                }
                Err(_elapsed) => {
                    warn!(kind = %kind, "manager queue call timed out");
                }
            }
        }
        queues
    }

    async fn poll_listings(&self) -> Listings {
        let mut listings = Listings::with_capacity(self.endpoints.len());
        for endpoint in &self.endpoints {
            match timeout(self.tunables.call_timeout(), endpoint.client.list()).await {
                Ok(Ok(snapshot)) => {
                    listings.insert(endpoint.name.clone(), snapshot);
                }
                Ok(Err(err)) => {
                    warn!(endpoint = %endpoint.name, error = %err, transient = err.is_transient(), "endpoint listing unavailable this tick");
                }
                Err(_elapsed) => {
                    warn!(endpoint = %endpoint.name, "endpoint listing timed out");
                }
            }
        }
        listings
    }

    fn reconcile(
        &self,
        queues: &[(ManagerKind, Vec<QueueItem>)],
        listings: &Listings,
    ) -> TickOutcome {
        // A missed locate only counts when every endpoint answered; a
        // failed listing must not march records towards deletion.
        let all_listed = listings.len() == self.endpoints.len();

        self.registry.with_records(|records, changed| {
            for (kind, items) in queues {
                for item in items {
                    ingest_item(records, *kind, item, changed);
                }
            }

            let mut outcome = TickOutcome::for_executors(self.executors.len());
            let mut stale = Vec::new();
            for (hash, record) in records.iter_mut() {
                if record.state == TorrentState::Error {
                    // Surfaced until an operator intervenes.
                    continue;
                }
                self.advance_record(record, listings, all_listed, changed, &mut outcome);
                if record.unclaimed_count >= self.tunables.unclaimed_limit {
                    stale.push(hash.clone());
                }
            }

            for hash in stale {
                if let Some(record) = records.remove(&hash) {
                    *changed = true;
                    warn!(
                        hash = %hash,
                        name = %record.name,
                        misses = record.unclaimed_count,
                        "dropping record never located on any client"
                    );
                }
            }
            outcome
        })
    }

    fn advance_record(
        &self,
        record: &mut TorrentRecord,
        listings: &Listings,
        all_listed: bool,
        changed: &mut bool,
        outcome: &mut TickOutcome,
    ) {
        if record.state == TorrentState::Copying && self.copy_inflight(&record.hash) {
            // The worker owns this record until its job resolves.
            return;
        }

        let Some((endpoint_name, snapshot)) = self.locate(&record.hash, listings) else {
            if all_listed {
                mark_unclaimed(record, changed);
            }
            return;
        };
        reset_unclaimed(record, changed);

        match record.state {
            TorrentState::ManagerQueued | TorrentState::Unclaimed => {
                rebind_home(record, endpoint_name, changed);
                if let Some((target_name, target_snapshot)) =
                    self.target_sighting(&record.hash, endpoint_name, listings)
                {
                    // Already cross-seeded on a routed target endpoint;
                    // bind it and skip the copy path entirely.
                    if record.target_client != target_name {
                        record.target_client = target_name.to_string();
                        *changed = true;
                    }
                    info!(
                        hash = %record.hash,
                        home = %record.home_client,
                        target = %record.target_client,
                        "torrent already present on target; no copy needed"
                    );
                    set_state(record, target_snapshot.state.as_target(), changed);
                } else {
                    set_state(record, snapshot.state.as_home(), changed);
                }
            }
            state if state.is_home() => {
                rebind_home(record, endpoint_name, changed);
                if state == TorrentState::HomeSeeding
                    && snapshot.state == EndpointTorrentState::Seeding
                {
                    self.try_start_copy(record, snapshot, changed, outcome);
                } else {
                    set_state(record, snapshot.state.as_home(), changed);
                }
            }
            TorrentState::Copying => {
                rebind_home(record, endpoint_name, changed);
                self.requeue_copy(record, snapshot, outcome);
            }
            TorrentState::Copied => {
                record.settle_ticks = record.settle_ticks.saturating_add(1);
                if let Some(snapshot) = self.target_snapshot(record, listings) {
                    set_state(record, snapshot.state.as_target(), changed);
                }
            }
            state if state.is_target() => {
                record.settle_ticks = record.settle_ticks.saturating_add(1);
                match (
                    listings.contains_key(&record.target_client),
                    self.target_snapshot(record, listings),
                ) {
                    (true, Some(snapshot)) => {
                        set_state(record, snapshot.state.as_target(), changed);
                        if record.state == TorrentState::TargetSeeding
                            && record.settle_ticks >= self.tunables.post_ingest_ticks
                        {
                            outcome.retirements.push(Retirement {
                                hash: record.hash.clone(),
                                queue_id: record.manager_queue_id.clone(),
                                manager_kind: record.manager_kind,
                                home_client: record.home_client.clone(),
                            });
                        }
                    }
                    (true, None) => {
                        // The target dropped it; hunt for a home again and
                        // let the copy path converge.
                        set_state(record, TorrentState::Unclaimed, changed);
                    }
                    (false, _) => {}
                }
            }
            // Error records were filtered out before advancing.
            _ => {}
        }
    }

    fn try_start_copy(
        &self,
        record: &mut TorrentRecord,
        snapshot: &TorrentSnapshot,
        changed: &mut bool,
        outcome: &mut TickOutcome,
    ) {
        let Some((index, executor)) =
            self.find_connection(&record.home_client, &record.target_client)
        else {
            debug!(
                hash = %record.hash,
                home = %record.home_client,
                "no connection from home endpoint; torrent stays seeding"
            );
            return;
        };
        if executor.is_inflight(&record.hash)
            || outcome.reserved[index] >= executor.available_slots()
        {
            return;
        }
        outcome.reserved[index] += 1;

        if record.target_client != executor.profile().to {
            record.target_client = executor.profile().to.clone();
            *changed = true;
        }
        record.settle_ticks = 0;
        set_state(record, TorrentState::Copying, changed);
        outcome.enqueues.push((index, copy_job(record, snapshot)));
    }

    /// Re-enqueue a copying record whose job is not in flight: the process
    /// restarted mid-copy, or the previous attempt failed within its retry
    /// budget.
    fn requeue_copy(
        &self,
        record: &TorrentRecord,
        snapshot: &TorrentSnapshot,
        outcome: &mut TickOutcome,
    ) {
        let Some((index, executor)) =
            self.find_connection(&record.home_client, &record.target_client)
        else {
            warn!(
                hash = %record.hash,
                home = %record.home_client,
                target = %record.target_client,
                "copying record has no matching connection"
            );
            return;
        };
        if outcome.reserved[index] < executor.available_slots() {
            outcome.reserved[index] += 1;
            outcome.enqueues.push((index, copy_job(record, snapshot)));
        }
    }

    async fn retire(&self, retirements: Vec<Retirement>) {
        for retirement in retirements {
            let Some(adapter) = self
                .adapters
                .iter()
                .find(|adapter| adapter.kind() == retirement.manager_kind)
            else {
                warn!(
                    hash = %retirement.hash,
                    kind = %retirement.manager_kind,
                    "no adapter configured for record's manager"
                );
                continue;
            };

            let ready = match timeout(
                self.tunables.call_timeout(),
                adapter.ready_to_remove(&retirement.queue_id),
            )
            .await
            {
                Ok(Ok(ready)) => ready,
                Ok(Err(err)) => {
                    warn!(hash = %retirement.hash, error = %err, "ingest check failed; retrying next tick");
                    continue;
                }
                Err(_elapsed) => {
                    warn!(hash = %retirement.hash, "ingest check timed out");
                    continue;
                }
            };
            if !ready {
                continue;
            }

            let Some(home) = self.endpoint(&retirement.home_client) else {
                warn!(
                    hash = %retirement.hash,
                    home = %retirement.home_client,
                    "home endpoint vanished from configuration"
                );
                continue;
            };
            match timeout(
                self.tunables.call_timeout(),
                home.remove(&retirement.hash, true),
            )
            .await
            {
                Ok(Ok(())) => {
                    info!(
                        hash = %retirement.hash,
                        home = %retirement.home_client,
                        "torrent ingested by manager; removed from home and retired"
                    );
                    self.registry.with_records(|records, changed| {
                        if records.remove(&retirement.hash).is_some() {
                            *changed = true;
                        }
                    });
                }
                Ok(Err(err)) => {
                    warn!(hash = %retirement.hash, error = %err, "home removal failed; retrying next tick");
                }
                Err(_elapsed) => {
                    warn!(hash = %retirement.hash, "home removal timed out");
                }
            }
        }
    }

    fn locate<'a>(
        &'a self,
        hash: &InfoHash,
        listings: &'a Listings,
    ) -> Option<(&'a str, &'a TorrentSnapshot)> {
        for endpoint in &self.endpoints {
            if let Some(snapshot) = listings
                .get(&endpoint.name)
                .and_then(|listing| listing.get(hash))
            {
                return Some((endpoint.name.as_str(), snapshot));
            }
        }
        None
    }

    fn target_snapshot<'a>(
        &self,
        record: &TorrentRecord,
        listings: &'a Listings,
    ) -> Option<&'a TorrentSnapshot> {
        listings
            .get(&record.target_client)
            .and_then(|listing| listing.get(&record.hash))
    }

    /// Locate sub-rule: an endpoint other than the home that reports the
    /// hash becomes the target when a connection routes there from the
    /// home. Lets a torrent that is already cross-seeded retire without a
    /// copy.
    fn target_sighting<'a>(
        &'a self,
        hash: &InfoHash,
        home: &str,
        listings: &'a Listings,
    ) -> Option<(&'a str, &'a TorrentSnapshot)> {
        for endpoint in &self.endpoints {
            if endpoint.name == home {
                continue;
            }
            let Some(snapshot) = listings
                .get(&endpoint.name)
                .and_then(|listing| listing.get(hash))
            else {
                continue;
            };
            let routed = self.executors.iter().any(|executor| {
                executor.profile().from == home && executor.profile().to == endpoint.name
            });
            if routed {
                return Some((endpoint.name.as_str(), snapshot));
            }
        }
        None
    }

    fn find_connection(&self, home: &str, target: &str) -> Option<(usize, &TransferExecutor)> {
        self.executors.iter().enumerate().find(|(_, executor)| {
            executor.profile().from == home
                && (target.is_empty() || executor.profile().to == target)
        })
    }

    fn endpoint(&self, name: &str) -> Option<&Arc<dyn DownloadClient>> {
        self.endpoints
            .iter()
            .find(|endpoint| endpoint.name == name)
            .map(|endpoint| &endpoint.client)
    }

    fn copy_inflight(&self, hash: &InfoHash) -> bool {
        self.executors
            .iter()
            .any(|executor| executor.is_inflight(hash))
    }
}

fn ingest_item(
    records: &mut std::collections::BTreeMap<InfoHash, TorrentRecord>,
    kind: ManagerKind,
    item: &QueueItem,
    changed: &mut bool,
) {
    match records.get_mut(&item.hash) {
        Some(record) => {
            if record.name != item.name && !item.name.is_empty() {
                record.name = item.name.clone();
                *changed = true;
            }
            if record.manager_queue_id != item.queue_id {
                record.manager_queue_id = item.queue_id.clone();
                *changed = true;
            }
            if record.manager_kind != kind {
                record.manager_kind = kind;
                *changed = true;
            }
        }
        None => {
            info!(hash = %item.hash, name = %item.name, kind = %kind, "tracking new torrent");
            records.insert(
                item.hash.clone(),
                TorrentRecord::queued(
                    item.hash.clone(),
                    item.name.clone(),
                    kind,
                    item.queue_id.clone(),
                ),
            );
            *changed = true;
        }
    }
}

fn copy_job(record: &TorrentRecord, snapshot: &TorrentSnapshot) -> CopyJob {
    CopyJob {
        hash: record.hash.clone(),
        name: record.name.clone(),
        files: snapshot.files.clone(),
        total_bytes: snapshot.total_bytes,
    }
}

fn set_state(record: &mut TorrentRecord, to: TorrentState, changed: &mut bool) {
    if record.state == to {
        return;
    }
    if record.state.permits(to) {
        debug!(hash = %record.hash, from = ?record.state, to = ?to, "state transition");
        record.state = to;
        *changed = true;
    } else {
        error!(
            hash = %record.hash,
            from = ?record.state,
            to = ?to,
            "transition outside the lifecycle table rejected"
        );
    }
}

fn mark_unclaimed(record: &mut TorrentRecord, changed: &mut bool) {
    record.unclaimed_count = record.unclaimed_count.saturating_add(1);
    if !record.home_client.is_empty() {
        record.home_client.clear();
    }
    set_state(record, TorrentState::Unclaimed, changed);
    *changed = true;
    debug!(
        hash = %record.hash,
        misses = record.unclaimed_count,
        "torrent not located on any client"
    );
}

fn reset_unclaimed(record: &mut TorrentRecord, changed: &mut bool) {
    if record.unclaimed_count != 0 {
        record.unclaimed_count = 0;
        *changed = true;
    }
}

fn rebind_home(record: &mut TorrentRecord, endpoint_name: &str, changed: &mut bool) {
    if record.home_client != endpoint_name {
        record.home_client = endpoint_name.to_string();
        *changed = true;
    }
}
