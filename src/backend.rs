//! Backend collaborator contract and the JSON file backend.
//!
//! The coordinator only depends on the [`CatalogBackend`] trait; the wire
//! format behind it is not the engine's concern. [`JsonBackend`] serves a
//! multi-tenant catalog from a local JSON file and stands in for the remote
//! service in the CLI and in tests.

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::catalog::CourseRecord;
use crate::error::{EngineError, Result};
use crate::search::TenantFilterConfig;

/// Abstract catalog source, keyed by tenant schema name.
pub trait CatalogBackend: Send + Sync + 'static {
    /// Full catalog fetch; used for cold loads and full refreshes.
    fn list_courses(&self, tenant: &str) -> impl Future<Output = Result<Vec<CourseRecord>>> + Send;

    /// Single-course lookup by class code.
    fn fetch_course(
        &self,
        tenant: &str,
        class_code: &str,
    ) -> impl Future<Output = Result<Option<CourseRecord>>> + Send;

    /// Incremental fetch of records changed since `since`. `Ok(None)` means
    /// the backend does not support incremental sync and the coordinator
    /// falls back to a full re-fetch.
    fn list_updates_since(
        &self,
        tenant: &str,
        since: DateTime<Utc>,
    ) -> impl Future<Output = Result<Option<Vec<CourseRecord>>>> + Send {
        let _ = (tenant, since);
        std::future::ready(Ok(None))
    }
}

#[derive(Debug, Deserialize)]
struct TenantDocument {
    #[serde(default)]
    courses: Vec<CourseRecord>,
    #[serde(default)]
    filters: TenantFilterConfig,
}

/// File-based backend: one JSON document mapping tenant schema names to
/// their course arrays and filter configurations.
pub struct JsonBackend {
    path: PathBuf,
}

impl JsonBackend {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The file is re-read on every call, mirroring a remote fetch: edits to
    /// the catalog file show up on the next refresh without a restart.
    async fn load(&self) -> Result<HashMap<String, TenantDocument>> {
        let raw = tokio::fs::read_to_string(&self.path).await?;
        Ok(serde_json::from_str(&raw)?)
    }

    async fn tenant(&self, tenant: &str) -> Result<TenantDocument> {
        let mut documents = self.load().await?;
        documents
            .remove(tenant)
            .ok_or_else(|| EngineError::UnknownTenant(tenant.to_string()))
    }

    /// Tenant-defined attribute filter configuration.
    pub async fn filter_specs(&self, tenant: &str) -> Result<TenantFilterConfig> {
        Ok(self.tenant(tenant).await?.filters)
    }
}

impl CatalogBackend for JsonBackend {
    async fn list_courses(&self, tenant: &str) -> Result<Vec<CourseRecord>> {
        let document = self.tenant(tenant).await?;
        tracing::debug!(tenant, count = document.courses.len(), "loaded catalog file");
        Ok(document.courses)
    }

    async fn fetch_course(&self, tenant: &str, class_code: &str) -> Result<Option<CourseRecord>> {
        let document = self.tenant(tenant).await?;
        Ok(document
            .courses
            .into_iter()
            .find(|record| record.class_code == class_code))
    }
}
