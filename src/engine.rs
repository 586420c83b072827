//! Top-level facade tying the store, coordinator, and search pipeline
//! together behind the surface consumers call.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::backend::CatalogBackend;
use crate::catalog::{CourseRecord, SearchQuerySpec, SearchResponse};
use crate::config::Config;
use crate::error::{EngineError, Result};
use crate::refresh::{BackgroundFailure, CachePhase, CancelToken, LoadProgress, RefreshCoordinator};
use crate::search::{Embedder, SearchEngine, TenantFilterConfig};
use crate::storage::CacheStore;

/// Summary of a tenant's cache state.
#[derive(Debug, Clone, Serialize)]
pub struct TenantStatus {
    pub tenant: String,
    pub cached: bool,
    pub phase: String,
    pub total_classes: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

/// Catalog cache plus hybrid search, scoped to one store and one backend.
pub struct CatalogEngine<B, E: Embedder> {
    coordinator: Arc<RefreshCoordinator<B>>,
    search: SearchEngine<E>,
    tenant_filters: Mutex<HashMap<String, TenantFilterConfig>>,
}

impl<B: CatalogBackend, E: Embedder> CatalogEngine<B, E> {
    #[must_use]
    pub fn new(store: Arc<CacheStore>, backend: Arc<B>, embedder: E, config: &Config) -> Self {
        Self {
            coordinator: RefreshCoordinator::new(store, backend, config.cache.clone()),
            search: SearchEngine::new(embedder, config.search.clone()),
            tenant_filters: Mutex::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn has_cached_data(&self, tenant: &str) -> bool {
        self.coordinator.has_cached_data(tenant)
    }

    /// Install the tenant's attribute filter configuration. Searches for a
    /// tenant without one ignore all attribute filters.
    pub fn set_tenant_filters(&self, tenant: &str, filters: TenantFilterConfig) {
        self.tenant_filters.lock().insert(tenant.to_string(), filters);
    }

    /// Fetch-or-serve entry point; see
    /// [`RefreshCoordinator::get_or_load`] for the mode semantics.
    pub async fn get_or_load(
        &self,
        tenant: &str,
        progress: Option<&(dyn Fn(LoadProgress) + Send + Sync)>,
        cancel: &CancelToken,
        background: bool,
    ) -> Result<Vec<CourseRecord>> {
        self.coordinator
            .get_or_load(tenant, progress, cancel, background)
            .await
    }

    /// Search the committed snapshot. Requires cached data; callers load
    /// first via [`Self::get_or_load`].
    pub async fn search(&self, tenant: &str, spec: &SearchQuerySpec) -> Result<SearchResponse> {
        let snapshot = self
            .coordinator
            .snapshot(tenant)
            .ok_or_else(|| EngineError::CacheMiss(tenant.to_string()))?;
        let index = self.coordinator.index_for(&snapshot);
        let filters = self
            .tenant_filters
            .lock()
            .get(tenant)
            .cloned()
            .unwrap_or_default();

        self.search.search(&snapshot, &index, &filters, spec).await
    }

    /// Force a background refresh regardless of snapshot age.
    pub fn refresh_in_background(&self, tenant: &str) {
        self.coordinator.spawn_background_refresh(tenant);
    }

    #[must_use]
    pub fn take_background_error(&self) -> Option<BackgroundFailure> {
        self.coordinator.take_background_error()
    }

    pub fn retry_background_refresh(&self, tenant: &str) {
        self.coordinator.retry_background_refresh(tenant);
    }

    pub fn clear(&self, tenant: &str) -> Result<()> {
        self.tenant_filters.lock().remove(tenant);
        self.coordinator.clear(tenant)
    }

    #[must_use]
    pub fn status(&self, tenant: &str) -> TenantStatus {
        let snapshot = self.coordinator.snapshot(tenant);
        let phase = match self.coordinator.phase(tenant) {
            CachePhase::NoCache => "no_cache",
            CachePhase::ColdLoading => "cold_loading",
            CachePhase::Ready => "ready",
            CachePhase::BackgroundRefreshing => "background_refreshing",
        };
        TenantStatus {
            tenant: tenant.to_string(),
            cached: snapshot.is_some(),
            phase: phase.to_string(),
            total_classes: snapshot.as_ref().map_or(0, |s| s.total_classes),
            last_updated: snapshot.map(|s| s.last_updated),
        }
    }
}
