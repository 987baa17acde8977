//! MySQL backend for the canonical pipeline run table.

use crate::config::DatabaseConfig;
use crate::error::StoreError;
use crate::store::CanonicalStore;
use crate::types::PipelineRunId;
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlSslMode};
use sqlx::Row;
use std::collections::HashSet;
use std::time::Duration;
use tracing::debug;

const PIPELINE_RUN_IDS_QUERY: &str = "SELECT id FROM pipeline_runs";

pub struct MySqlCanonicalStore {
    pool: MySqlPool,
}

impl MySqlCanonicalStore {
    /// Connect to the relational store described by `config`.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self, StoreError> {
        let mut options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .username(&config.username)
            .database(&config.name)
            .ssl_mode(if config.require_tls {
                MySqlSslMode::Required
            } else {
                MySqlSslMode::Preferred
            });
        if let Some(password) = &config.password {
            options = options.password(password);
        }

        let pool = MySqlPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect_with(options)
            .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl CanonicalStore for MySqlCanonicalStore {
    async fn list_all_pipeline_run_ids(&self) -> Result<HashSet<PipelineRunId>, StoreError> {
        let mut ids = HashSet::new();
        let mut rows = sqlx::query(PIPELINE_RUN_IDS_QUERY).fetch(&self.pool);
        while let Some(row) = rows.try_next().await? {
            let id: i64 = row.try_get("id")?;
            ids.insert(PipelineRunId::from(id));
        }
        debug!(count = ids.len(), "Loaded canonical pipeline run ids");
        Ok(ids)
    }
}
