//! OpenSearch/Elasticsearch REST backend for the tracking index and the task API.

use crate::config::SearchConfig;
use crate::error::{EvictionError, StoreError};
use crate::store::{
    CompletedTask, EvictionFilter, MutationSummary, RunningTask, TaskStore, TrackingIndex,
};
use crate::tracking::{ExpiredPair, TrackedRecord};
use crate::types::{PipelineRunId, TaskHandle};
use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::time::Duration;
use tracing::debug;

const TASKS_INDEX: &str = ".tasks";
const DELETE_BY_QUERY_ACTIONS: &str = "*/delete/byquery";
const SEARCH_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Deserialize)]
struct SearchResponse<T> {
    hits: Hits<T>,
}

#[derive(Deserialize)]
struct Hits<T> {
    hits: Vec<Hit<T>>,
}

#[derive(Deserialize)]
struct Hit<T> {
    #[serde(rename = "_source")]
    source: T,
    #[serde(default)]
    sort: Option<Vec<Value>>,
}

#[derive(Deserialize)]
struct PipelineRunSource {
    pipeline_run_id: PipelineRunId,
}

#[derive(Deserialize)]
struct TaskListResponse {
    #[serde(default)]
    nodes: HashMap<String, NodeTasks>,
}

#[derive(Deserialize)]
struct NodeTasks {
    #[serde(default)]
    tasks: HashMap<String, RunningTaskInfo>,
}

#[derive(Deserialize)]
struct RunningTaskInfo {
    node: String,
    id: u64,
    action: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    running_time_in_nanos: Option<u64>,
    /// Set on the per-slice children of a sliced task.
    #[serde(default)]
    parent_task_id: Option<String>,
}

#[derive(Deserialize)]
struct ByQueryResponse {
    #[serde(default)]
    updated: Option<u64>,
    #[serde(default)]
    deleted: Option<u64>,
    #[serde(default)]
    failures: Vec<Value>,
}

#[derive(Deserialize)]
struct SubmitResponse {
    task: String,
}

#[derive(Deserialize)]
struct BulkResponse {
    errors: bool,
    #[serde(default)]
    items: Vec<Value>,
}

impl From<RunningTaskInfo> for RunningTask {
    fn from(task: RunningTaskInfo) -> Self {
        RunningTask {
            handle: TaskHandle::new(task.node, task.id),
            action: task.action,
            description: task.description,
            running_time_in_nanos: task.running_time_in_nanos,
        }
    }
}

/// Task descriptions read `delete-by-query [index]`. A task without one is
/// counted, since it may be ours.
pub(crate) fn targets_index(description: Option<&str>, index: &str) -> bool {
    description.map_or(true, |description| {
        description.contains(&format!("[{}]", index))
    })
}

/// `bool.filter` query selecting the rows an eviction batch covers.
pub(crate) fn filter_query(filter: &EvictionFilter) -> Value {
    let mut clauses = vec![json!({ "terms": { "pipeline_run_id": filter.pipeline_run_ids } })];
    if let Some(background_id) = &filter.background_id {
        clauses.push(json!({ "term": { "background_id": background_id } }));
    }
    json!({ "bool": { "filter": clauses } })
}

/// Either last read before the cutoff, or created before it and never read.
pub(crate) fn expired_query(ttl_days: u32) -> Value {
    let cutoff = format!("now-{}d/d", ttl_days);
    json!({
        "bool": {
            "should": [
                { "range": { "last_read_at": { "lt": cutoff } } },
                {
                    "bool": {
                        "filter": [{ "range": { "created_at": { "lt": cutoff } } }],
                        "must_not": [{ "exists": { "field": "last_read_at" } }]
                    }
                }
            ]
        }
    })
}

pub(crate) fn tag_script(handle: &TaskHandle) -> Value {
    json!({
        "source": "ctx._source.is_complete = params.is_complete; ctx._source.deletion_task = params.deletion_task;",
        "lang": "painless",
        "params": { "is_complete": false, "deletion_task": handle.to_string() }
    })
}

pub(crate) fn bulk_delete_body(index: &str, records: &[TrackedRecord]) -> String {
    records
        .iter()
        .map(|record| {
            format!(
                "{}\n",
                json!({ "delete": { "_index": index, "_id": record.document_id() } })
            )
        })
        .collect()
}

fn sorted_page(page_size: usize, query: Value, source: Value) -> Value {
    json!({
        "size": page_size,
        "_source": source,
        "query": query,
        "sort": [{ "background_id": "asc" }, { "pipeline_run_id": "asc" }]
    })
}

/// Search index client
pub struct OpenSearchClient {
    client: Client,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    tracking_index: String,
    derived_index: String,
    page_size: usize,
}

impl OpenSearchClient {
    pub fn new(config: &SearchConfig) -> Result<Self, EvictionError> {
        let client = Client::builder()
            .connect_timeout(SEARCH_CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EvictionError::Config(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: config.host.trim_end_matches('/').to_string(),
            username: config.username.clone(),
            password: config.password.clone(),
            tracking_index: config.tracking_index.clone(),
            derived_index: config.derived_index.clone(),
            page_size: config.page_size.max(1),
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.base_url, path.trim_start_matches('/'));
        let builder = self.client.request(method, url);
        match &self.username {
            Some(username) => builder.basic_auth(username, self.password.as_ref()),
            None => builder,
        }
    }

    async fn send_json<T: DeserializeOwned>(&self, builder: RequestBuilder) -> Result<T, StoreError> {
        let response = builder.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(StoreError::Status {
                status: status.as_u16(),
                body,
            });
        }
        response
            .json::<T>()
            .await
            .map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn search_page<T: DeserializeOwned>(
        &self,
        index: &str,
        body: &Value,
    ) -> Result<Vec<Hit<T>>, StoreError> {
        let response: SearchResponse<T> = self
            .send_json(self.request(Method::POST, &format!("{}/_search", index)).json(body))
            .await?;
        Ok(response.hits.hits)
    }

    /// Walk every page of a sorted search using `search_after`.
    async fn search_all<T: DeserializeOwned>(
        &self,
        index: &str,
        mut body: Value,
    ) -> Result<Vec<T>, StoreError> {
        let mut sources = Vec::new();
        loop {
            let hits: Vec<Hit<T>> = self.search_page(index, &body).await?;
            let page_len = hits.len();
            let search_after = hits.last().and_then(|hit| hit.sort.clone());
            sources.extend(hits.into_iter().map(|hit| hit.source));

            match search_after {
                Some(after) if page_len >= self.page_size => {
                    body["search_after"] = Value::Array(after);
                }
                _ => break,
            }
        }
        Ok(sources)
    }

    /// Top-level delete-by-query tasks the engine is running, sorted by handle.
    async fn running_delete_by_query_tasks(&self) -> Result<Vec<RunningTaskInfo>, StoreError> {
        let response: TaskListResponse = self
            .send_json(
                self.request(Method::GET, "_tasks")
                    .query(&[("actions", DELETE_BY_QUERY_ACTIONS), ("detailed", "true")]),
            )
            .await?;
        let mut tasks: Vec<RunningTaskInfo> = response
            .nodes
            .into_values()
            .flat_map(|node| node.tasks.into_values())
            .filter(|task| task.parent_task_id.is_none())
            .collect();
        tasks.sort_by(|a, b| (&a.node, a.id).cmp(&(&b.node, b.id)));
        Ok(tasks)
    }

    async fn by_query(&self, path: &str, body: Value) -> Result<MutationSummary, StoreError> {
        let response: ByQueryResponse = self
            .send_json(self.request(Method::POST, path).json(&body))
            .await?;
        if !response.failures.is_empty() {
            return Err(StoreError::BulkErrors(Value::Array(response.failures).to_string()));
        }
        Ok(MutationSummary {
            affected: response.updated.or(response.deleted).unwrap_or(0),
        })
    }
}

#[async_trait]
impl TrackingIndex for OpenSearchClient {
    async fn list_tracked_records_with_active_deletion(
        &self,
    ) -> Result<Vec<TrackedRecord>, StoreError> {
        let body = sorted_page(
            self.page_size,
            json!({ "bool": { "filter": [{ "exists": { "field": "deletion_task" } }] } }),
            json!(["pipeline_run_id", "background_id", "is_complete", "deletion_task"]),
        );
        self.search_all(&self.tracking_index, body).await
    }

    fn stream_tracked_pipeline_run_ids(&self) -> BoxStream<'_, Result<PipelineRunId, StoreError>> {
        // Outer None ends the walk; inner None is the first page.
        let pages = stream::try_unfold(Some(None::<Vec<Value>>), move |cursor| async move {
            let Some(search_after) = cursor else {
                return Ok::<_, StoreError>(None);
            };
            let mut body = sorted_page(
                self.page_size,
                json!({ "match_all": {} }),
                json!(["pipeline_run_id"]),
            );
            if let Some(after) = search_after {
                body["search_after"] = Value::Array(after);
            }

            let hits: Vec<Hit<PipelineRunSource>> =
                self.search_page(&self.tracking_index, &body).await?;
            if hits.is_empty() {
                return Ok(None);
            }
            debug!(page_len = hits.len(), "Fetched tracked pipeline run page");

            let next = if hits.len() < self.page_size {
                None
            } else {
                hits.last().and_then(|hit| hit.sort.clone()).map(Some)
            };
            let ids: Vec<PipelineRunId> =
                hits.into_iter().map(|hit| hit.source.pipeline_run_id).collect();
            Ok(Some((ids, next)))
        });

        pages
            .map_ok(|ids| stream::iter(ids.into_iter().map(Ok)))
            .try_flatten()
            .boxed()
    }

    async fn find_expired(&self, ttl_days: u32) -> Result<Vec<ExpiredPair>, StoreError> {
        let body = sorted_page(
            self.page_size,
            expired_query(ttl_days),
            json!(["pipeline_run_id", "background_id"]),
        );
        self.search_all(&self.tracking_index, body).await
    }

    async fn tag_records(
        &self,
        handle: &TaskHandle,
        filter: &EvictionFilter,
    ) -> Result<MutationSummary, StoreError> {
        let body = json!({ "query": filter_query(filter), "script": tag_script(handle) });
        self.by_query(
            &format!("{}/_update_by_query?slices=auto&refresh=true", self.tracking_index),
            body,
        )
        .await
    }

    async fn delete_tracked_records(
        &self,
        records: &[TrackedRecord],
    ) -> Result<MutationSummary, StoreError> {
        let body = bulk_delete_body(&self.tracking_index, records);
        let response: BulkResponse = self
            .send_json(
                self.request(Method::POST, "_bulk")
                    .header("Content-Type", "application/x-ndjson")
                    .body(body),
            )
            .await?;
        if response.errors {
            return Err(StoreError::BulkErrors(Value::Array(response.items).to_string()));
        }
        Ok(MutationSummary {
            affected: response.items.len() as u64,
        })
    }
}

#[async_trait]
impl TaskStore for OpenSearchClient {
    async fn list_running_tasks(
        &self,
        handles: &[TaskHandle],
    ) -> Result<Vec<RunningTask>, StoreError> {
        let wanted: HashSet<&TaskHandle> = handles.iter().collect();
        Ok(self
            .running_delete_by_query_tasks()
            .await?
            .into_iter()
            .map(RunningTask::from)
            .filter(|task| wanted.contains(&task.handle))
            .collect())
    }

    async fn list_running_deletion_tasks(&self) -> Result<Vec<RunningTask>, StoreError> {
        let derived_index = self.derived_index.as_str();
        Ok(self
            .running_delete_by_query_tasks()
            .await?
            .into_iter()
            .filter(|task| targets_index(task.description.as_deref(), derived_index))
            .map(RunningTask::from)
            .collect())
    }

    async fn list_completed_tasks(
        &self,
        handles: &[TaskHandle],
    ) -> Result<Vec<CompletedTask>, StoreError> {
        let ids: Vec<String> = handles.iter().map(ToString::to_string).collect();
        let body = json!({ "size": ids.len(), "query": { "ids": { "values": ids } } });
        match self.search_page::<CompletedTask>(TASKS_INDEX, &body).await {
            Ok(hits) => Ok(hits.into_iter().map(|hit| hit.source).collect()),
            // The engine creates the task index lazily.
            Err(StoreError::Status { status, .. }) if status == StatusCode::NOT_FOUND.as_u16() => {
                Ok(Vec::new())
            }
            Err(e) => Err(e),
        }
    }

    async fn delete_task_records(
        &self,
        handles: &[TaskHandle],
    ) -> Result<MutationSummary, StoreError> {
        let ids: Vec<String> = handles.iter().map(ToString::to_string).collect();
        self.by_query(
            &format!("{}/_delete_by_query?conflicts=proceed&refresh=true", TASKS_INDEX),
            json!({ "query": { "ids": { "values": ids } } }),
        )
        .await
    }

    async fn submit_bulk_delete(
        &self,
        filter: &EvictionFilter,
        requests_per_second: u32,
    ) -> Result<TaskHandle, StoreError> {
        let path = format!(
            "{}/_delete_by_query?requests_per_second={}&slices=auto&wait_for_completion=false",
            self.derived_index, requests_per_second
        );
        let response: SubmitResponse = self
            .send_json(
                self.request(Method::POST, &path)
                    .json(&json!({ "query": filter_query(filter) })),
            )
            .await?;
        response
            .task
            .parse()
            .map_err(|e: EvictionError| StoreError::InvalidResponse(e.to_string()))
    }
}
