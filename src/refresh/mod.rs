//! Cache refresh coordination.
//!
//! One coordinator owns all snapshot writes. Per tenant the lifecycle is
//! `NoCache -> ColdLoading -> Ready`, with `Ready -> BackgroundRefreshing ->
//! Ready` loops afterwards. Cold loads block the caller under a bounded
//! timeout; background refreshes are single-flight, have no deadline, and
//! report failures through a mailbox instead of propagating.
//!
//! Cancellation is cooperative: tokens are checked before every state
//! mutation, and a canceled refresh never commits. Once a commit has begun
//! it runs to completion so the snapshot and its index never diverge.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::Utc;
use parking_lot::Mutex;

use crate::backend::CatalogBackend;
use crate::catalog::{CacheSnapshot, CourseRecord};
use crate::config::CacheConfig;
use crate::error::{EngineError, Result};
use crate::search::VectorIndex;
use crate::storage::CacheStore;

/// Cooperative cancellation flag shared between a caller and a refresh.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

/// Milestones reported to the caller during a blocking cold load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadProgress {
    FetchStarted,
    FetchCompleted { count: usize },
    IndexBuilt,
}

/// Per-tenant cache lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CachePhase {
    #[default]
    NoCache,
    ColdLoading,
    Ready,
    BackgroundRefreshing,
}

/// Session-scoped staleness guard.
///
/// Each tenant's snapshot age is checked at most once per session, so a hot
/// UI path does not re-trigger refresh decisions on every access. Owned and
/// injected rather than global, which keeps tenants and test harnesses
/// isolated.
#[derive(Debug, Default)]
pub struct RefreshState {
    checked: Mutex<HashSet<String>>,
}

impl RefreshState {
    /// True the first time a tenant is seen this session.
    pub fn should_check(&self, tenant: &str) -> bool {
        self.checked.lock().insert(tenant.to_string())
    }

    pub fn forget(&self, tenant: &str) {
        self.checked.lock().remove(tenant);
    }

    pub fn reset(&self) {
        self.checked.lock().clear();
    }
}

/// A background refresh failure waiting to be surfaced.
#[derive(Debug)]
pub struct BackgroundFailure {
    pub tenant: String,
    pub error: EngineError,
}

type ProgressFn<'a> = Option<&'a (dyn Fn(LoadProgress) + Send + Sync)>;

/// Sole writer of cache snapshots and their derived vector indexes.
pub struct RefreshCoordinator<B> {
    store: Arc<CacheStore>,
    backend: Arc<B>,
    cfg: CacheConfig,
    session: RefreshState,
    phases: Mutex<HashMap<String, CachePhase>>,
    indexes: Mutex<HashMap<String, Arc<VectorIndex>>>,
    refreshing: Mutex<HashSet<String>>,
    background_cancels: Mutex<HashMap<String, CancelToken>>,
    background_error: Mutex<Option<BackgroundFailure>>,
}

impl<B: CatalogBackend> RefreshCoordinator<B> {
    #[must_use]
    pub fn new(store: Arc<CacheStore>, backend: Arc<B>, cfg: CacheConfig) -> Arc<Self> {
        Arc::new(Self {
            store,
            backend,
            cfg,
            session: RefreshState::default(),
            phases: Mutex::new(HashMap::new()),
            indexes: Mutex::new(HashMap::new()),
            refreshing: Mutex::new(HashSet::new()),
            background_cancels: Mutex::new(HashMap::new()),
            background_error: Mutex::new(None),
        })
    }

    /// Whether a committed snapshot exists for the tenant.
    #[must_use]
    pub fn has_cached_data(&self, tenant: &str) -> bool {
        self.cfg.enabled && self.store.has_cached_data(tenant)
    }

    /// Current lifecycle phase for a tenant.
    #[must_use]
    pub fn phase(&self, tenant: &str) -> CachePhase {
        if let Some(phase) = self.phases.lock().get(tenant) {
            return *phase;
        }
        if self.has_cached_data(tenant) {
            CachePhase::Ready
        } else {
            CachePhase::NoCache
        }
    }

    /// The single entry point consumers call for catalog data.
    ///
    /// With a committed snapshot present this returns it immediately; in
    /// background mode a stale snapshot additionally triggers at most one
    /// single-flight refresh per session. Without a snapshot this blocks on
    /// a cold load regardless of mode, bounded by the configured timeout.
    pub async fn get_or_load(
        self: &Arc<Self>,
        tenant: &str,
        progress: ProgressFn<'_>,
        cancel: &CancelToken,
        background: bool,
    ) -> Result<Vec<CourseRecord>> {
        if self.cfg.enabled {
            if let Some(snapshot) = self.store.read_snapshot(tenant) {
                // A cache-hit read must not mask an in-flight refresh.
                if self.phase(tenant) != CachePhase::BackgroundRefreshing {
                    self.set_phase(tenant, CachePhase::Ready);
                }
                self.index_for(&snapshot);

                if background && self.session.should_check(tenant) {
                    let stale = snapshot
                        .age(Utc::now())
                        .to_std()
                        .is_ok_and(|age| age > self.cfg.freshness);
                    if stale {
                        tracing::info!(tenant, "snapshot stale, scheduling background refresh");
                        self.spawn_background_refresh(tenant);
                    }
                }

                return Ok(snapshot.records);
            }
        }

        self.cold_load(tenant, progress, cancel).await
    }

    async fn cold_load(
        self: &Arc<Self>,
        tenant: &str,
        progress: ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> Result<Vec<CourseRecord>> {
        self.set_phase(tenant, CachePhase::ColdLoading);

        let outcome = tokio::time::timeout(
            self.cfg.cold_load_timeout,
            self.fetch_and_commit(tenant, progress, cancel),
        )
        .await;

        match outcome {
            Ok(Ok(records)) => {
                self.set_phase(tenant, CachePhase::Ready);
                Ok(records)
            }
            Ok(Err(err)) => {
                self.set_phase(tenant, CachePhase::NoCache);
                Err(err)
            }
            Err(_) => {
                self.set_phase(tenant, CachePhase::NoCache);
                Err(EngineError::Timeout(format!(
                    "cold load for {tenant} exceeded {:?}",
                    self.cfg.cold_load_timeout
                )))
            }
        }
    }

    /// Fetch the full catalog and commit it as the tenant's snapshot.
    ///
    /// The token is checked after the fetch and before any state mutation;
    /// once the commit starts it runs to completion so the durable snapshot
    /// and the in-memory index never diverge.
    async fn fetch_and_commit(
        &self,
        tenant: &str,
        progress: ProgressFn<'_>,
        cancel: &CancelToken,
    ) -> Result<Vec<CourseRecord>> {
        if cancel.is_canceled() {
            return Err(EngineError::Canceled);
        }
        emit(progress, LoadProgress::FetchStarted);

        let records = self.backend.list_courses(tenant).await?;
        emit(progress, LoadProgress::FetchCompleted { count: records.len() });

        if cancel.is_canceled() {
            return Err(EngineError::Canceled);
        }

        let snapshot = CacheSnapshot::new(tenant, records, Utc::now());
        self.commit(&snapshot)?;
        emit(progress, LoadProgress::IndexBuilt);

        Ok(snapshot.records)
    }

    fn commit(&self, snapshot: &CacheSnapshot) -> Result<()> {
        if self.cfg.enabled {
            self.store
                .write_snapshot(&snapshot.tenant, &snapshot.records, snapshot.last_updated)?;
        }
        let index = Arc::new(VectorIndex::build(&snapshot.records, snapshot.last_updated));
        self.indexes.lock().insert(snapshot.tenant.clone(), index);
        Ok(())
    }

    /// Index for this snapshot, rebuilt if the cached one was built from an
    /// older snapshot. A stale index is never returned.
    pub fn index_for(&self, snapshot: &CacheSnapshot) -> Arc<VectorIndex> {
        let mut indexes = self.indexes.lock();
        if let Some(index) = indexes.get(&snapshot.tenant) {
            if index.built_from() == Some(snapshot.last_updated) {
                return Arc::clone(index);
            }
        }
        let index = Arc::new(VectorIndex::build(&snapshot.records, snapshot.last_updated));
        indexes.insert(snapshot.tenant.clone(), Arc::clone(&index));
        index
    }

    /// Read the committed snapshot, if any.
    #[must_use]
    pub fn snapshot(&self, tenant: &str) -> Option<CacheSnapshot> {
        if !self.cfg.enabled {
            return None;
        }
        self.store.read_snapshot(tenant)
    }

    /// Schedule a single-flight background refresh. A second call for the
    /// same tenant while one is in flight is a no-op.
    pub fn spawn_background_refresh(self: &Arc<Self>, tenant: &str) {
        if !self.refreshing.lock().insert(tenant.to_string()) {
            tracing::debug!(tenant, "background refresh already in flight");
            return;
        }

        let cancel = CancelToken::new();
        self.background_cancels
            .lock()
            .insert(tenant.to_string(), cancel.clone());
        self.set_phase(tenant, CachePhase::BackgroundRefreshing);

        let this = Arc::clone(self);
        let tenant = tenant.to_string();
        tokio::spawn(async move {
            let result = this.refresh_once(&tenant, &cancel).await;
            this.refreshing.lock().remove(&tenant);
            this.background_cancels.lock().remove(&tenant);

            match result {
                Ok(()) => {
                    this.set_phase(&tenant, CachePhase::Ready);
                    tracing::info!(tenant, "background refresh committed");
                }
                Err(err) if err.is_canceled() => {
                    // A cancel may have come from clear(); recompute the
                    // phase from the committed snapshot instead of assuming
                    // one still exists.
                    let phase = if this.has_cached_data(&tenant) {
                        CachePhase::Ready
                    } else {
                        CachePhase::NoCache
                    };
                    this.set_phase(&tenant, phase);
                    tracing::debug!(tenant, "background refresh canceled before commit");
                }
                Err(error) => {
                    this.set_phase(&tenant, CachePhase::Ready);
                    tracing::warn!(tenant, %error, "background refresh failed");
                    *this.background_error.lock() = Some(BackgroundFailure { tenant, error });
                }
            }
        });
    }

    /// One refresh cycle: incremental when the backend supports it and a
    /// snapshot exists to merge into, otherwise a full re-fetch with
    /// whole-snapshot replacement.
    async fn refresh_once(&self, tenant: &str, cancel: &CancelToken) -> Result<()> {
        let existing = self.snapshot(tenant);

        let merged = if let Some(existing) = &existing {
            match self
                .backend
                .list_updates_since(tenant, existing.last_updated)
                .await?
            {
                Some(updates) => Some(merge_updates(&existing.records, updates)),
                None => None,
            }
        } else {
            None
        };

        let records = match merged {
            Some(records) => records,
            None => self.backend.list_courses(tenant).await?,
        };

        if cancel.is_canceled() {
            return Err(EngineError::Canceled);
        }

        let snapshot = CacheSnapshot::new(tenant, records, Utc::now());
        self.commit(&snapshot)
    }

    /// Cancel any in-flight background refresh for the tenant.
    pub fn cancel_background_refresh(&self, tenant: &str) {
        if let Some(token) = self.background_cancels.lock().get(tenant) {
            token.cancel();
        }
    }

    /// Take the pending background failure, if any. Consuming it dismisses
    /// the notice.
    #[must_use]
    pub fn take_background_error(&self) -> Option<BackgroundFailure> {
        self.background_error.lock().take()
    }

    /// Explicit retry affordance after a background failure.
    pub fn retry_background_refresh(self: &Arc<Self>, tenant: &str) {
        self.background_error.lock().take();
        self.spawn_background_refresh(tenant);
    }

    /// Drop the tenant's durable snapshot, its index, and session state.
    pub fn clear(&self, tenant: &str) -> Result<()> {
        self.cancel_background_refresh(tenant);
        self.store.clear_tenant(tenant)?;
        self.indexes.lock().remove(tenant);
        self.phases.lock().remove(tenant);
        self.session.forget(tenant);
        Ok(())
    }

    /// Reset the session staleness guard, as a new session would.
    pub fn reset_session(&self) {
        self.session.reset();
    }

    fn set_phase(&self, tenant: &str, phase: CachePhase) {
        self.phases.lock().insert(tenant.to_string(), phase);
    }
}

fn emit(progress: ProgressFn<'_>, event: LoadProgress) {
    if let Some(callback) = progress {
        callback(event);
    }
}

/// Merge incremental updates into an existing record set by `class_code`:
/// whole-record replacement for known codes, append for new ones.
fn merge_updates(existing: &[CourseRecord], updates: Vec<CourseRecord>) -> Vec<CourseRecord> {
    let mut merged = existing.to_vec();
    let positions: HashMap<String, usize> = merged
        .iter()
        .enumerate()
        .map(|(i, r)| (r.class_code.clone(), i))
        .collect();

    for update in updates {
        match positions.get(&update.class_code) {
            Some(&i) => merged[i] = update,
            None => merged.push(update),
        }
    }
    merged
}
