//! HTTP implementation of the storage boundary. Speaks a search/bulk JSON
//! API: pending schedules and rows come back from `_search`, aggregates go
//! out as NDJSON `_bulk` writes keyed for idempotent overwrite, and index
//! purges use `_delete_by_query`.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::query;
use crate::stage::AggregationType;
use crate::store::MetricStore;
use crate::types::{AggregateRecord, Granularity, MetricRow, ScheduleId, TimeSlice};

#[derive(Clone, Debug)]
pub struct HttpStoreConfig {
    pub url: String,
    pub user: String,
    pub pass: String,
    pub index_prefix: String,
    pub timeout: Duration,
}

pub struct HttpMetricStore {
    cfg: HttpStoreConfig,
    client: Client,
}

impl HttpMetricStore {
    pub fn new(cfg: HttpStoreConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(cfg.timeout)
            .pool_max_idle_per_host(64)
            .build()?;
        Ok(Self { cfg, client })
    }

    fn data_index(&self, granularity: Granularity) -> String {
        format!("{}-{}", self.cfg.index_prefix, granularity)
    }

    fn pending_index(&self, stage: AggregationType) -> String {
        format!("{}-index-{}", self.cfg.index_prefix, stage.index_partition())
    }

    async fn search(&self, index: &str, body: serde_json::Value) -> Result<serde_json::Value> {
        let url = format!("{}/{}/_search", self.cfg.url.trim_end_matches('/'), index);
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.cfg.user, Some(&self.cfg.pass))
            .json(&body)
            .send()
            .await
            .with_context(|| format!("search {index}"))?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!(
                "search {index} status={status} body_sample={}",
                &body[..body.len().min(500)]
            );
        }
        resp.json().await.with_context(|| format!("parse search response from {index}"))
    }
}

/// Stored row shape. Rollup rows carry `avg`/`min`/`max`; raw rows carry
/// only `value`.
#[derive(Debug, Deserialize)]
struct RowDoc {
    schedule_id: ScheduleId,
    timestamp_ms: i64,
    #[serde(default)]
    value: Option<f64>,
    #[serde(default)]
    avg: Option<f64>,
    #[serde(default)]
    min: Option<f64>,
    #[serde(default)]
    max: Option<f64>,
}

impl RowDoc {
    fn into_row(self) -> Option<MetricRow> {
        let value = self.value.or(self.avg)?;
        Some(MetricRow {
            schedule_id: self.schedule_id,
            timestamp_ms: self.timestamp_ms,
            value,
            min: self.min.unwrap_or(value),
            max: self.max.unwrap_or(value),
        })
    }
}

fn hit_sources(body: &serde_json::Value) -> impl Iterator<Item = &serde_json::Value> {
    body.pointer("/hits/hits")
        .and_then(|v| v.as_array())
        .map(|a| a.as_slice())
        .unwrap_or(&[])
        .iter()
        .filter_map(|hit| hit.get("_source"))
}

#[async_trait]
impl MetricStore for HttpMetricStore {
    async fn pending_schedules(
        &self,
        slice: TimeSlice,
        stage: AggregationType,
    ) -> Result<Vec<ScheduleId>> {
        let index = self.pending_index(stage);
        let body = self
            .search(&index, query::pending_schedules_body(slice.start_ms, slice.end_ms()))
            .await?;

        let mut ids: Vec<ScheduleId> = hit_sources(&body)
            .filter_map(|src| src.get("schedule_id").and_then(|v| v.as_i64()))
            .map(|v| v as ScheduleId)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        debug!("{} pending {} schedules for {}", ids.len(), stage, slice);
        Ok(ids)
    }

    async fn fetch_rows(
        &self,
        schedule_id: ScheduleId,
        slice: TimeSlice,
        source: Granularity,
    ) -> Result<Vec<MetricRow>> {
        let index = self.data_index(source);
        let body = self
            .search(
                &index,
                query::schedule_rows_body(schedule_id, slice.start_ms, slice.end_ms()),
            )
            .await?;

        let rows = hit_sources(&body)
            .filter_map(|src| serde_json::from_value::<RowDoc>(src.clone()).ok())
            .filter_map(RowDoc::into_row)
            .collect();
        Ok(rows)
    }

    async fn write_aggregates(&self, records: &[AggregateRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut body = String::with_capacity(records.len() * 256);
        for rec in records {
            let index = self.data_index(rec.bucket);
            body.push_str("{\"index\":{\"_index\":\"");
            body.push_str(&index);
            body.push_str("\",\"_id\":\"");
            body.push_str(&format!("{}-{}", rec.schedule_id, rec.timestamp_ms));
            body.push_str("\"}}\n");
            body.push_str(&serde_json::to_string(rec)?);
            body.push('\n');
        }

        let url = format!("{}/_bulk", self.cfg.url.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.cfg.user, Some(&self.cfg.pass))
            .header("Content-Type", "application/x-ndjson")
            .body(body)
            .send()
            .await
            .context("bulk write aggregates")?;

        let status = resp.status();
        let resp_body = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!(
                "bulk write status={status} body_sample={}",
                &resp_body[..resp_body.len().min(500)]
            );
        }
        if resp_body.contains("\"errors\":true") {
            anyhow::bail!(
                "bulk write has item failures: {}",
                &resp_body[..resp_body.len().min(500)]
            );
        }
        debug!("wrote {} aggregate records", records.len());
        Ok(())
    }

    async fn purge_index(&self, slice: TimeSlice, stage: AggregationType) -> Result<()> {
        let index = self.pending_index(stage);
        let url = format!(
            "{}/{}/_delete_by_query",
            self.cfg.url.trim_end_matches('/'),
            index
        );
        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.cfg.user, Some(&self.cfg.pass))
            .json(&query::purge_body(slice.start_ms, slice.end_ms()))
            .send()
            .await
            .with_context(|| format!("purge {index}"))?;

        let status = resp.status();
        if !status.is_success() && status.as_u16() != 404 {
            anyhow::bail!("purge {index} status={status}");
        }
        Ok(())
    }
}
