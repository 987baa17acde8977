//! Change detection: orphaned and expired pipeline runs.

use crate::error::StoreError;
use crate::store::{CanonicalStore, TrackingIndex};
use crate::tracking::ExpiredPair;
use crate::types::{BackgroundId, PipelineRunId};
use futures::TryStreamExt;
use std::collections::{BTreeMap, HashSet};
use tracing::info;

/// Pipeline runs the tracking index knows about but the relational store no
/// longer has, minus those already being handled. Sorted.
pub async fn find_orphans(
    index: &dyn TrackingIndex,
    canonical: &dyn CanonicalStore,
    being_deleted: &HashSet<PipelineRunId>,
) -> Result<Vec<PipelineRunId>, StoreError> {
    let (tracked, canonical_ids) = futures::try_join!(
        index
            .stream_tracked_pipeline_run_ids()
            .try_collect::<HashSet<PipelineRunId>>(),
        canonical.list_all_pipeline_run_ids(),
    )?;
    info!(
        tracked = tracked.len(),
        canonical = canonical_ids.len(),
        "Enumerated pipeline run ids"
    );
    Ok(orphaned(&tracked, &canonical_ids, being_deleted))
}

pub fn orphaned(
    tracked: &HashSet<PipelineRunId>,
    canonical: &HashSet<PipelineRunId>,
    exclude: &HashSet<PipelineRunId>,
) -> Vec<PipelineRunId> {
    let mut orphans: Vec<PipelineRunId> = tracked
        .iter()
        .filter(|id| !canonical.contains(*id) && !exclude.contains(*id))
        .cloned()
        .collect();
    orphans.sort();
    orphans
}

/// Expired pairs grouped by background, skipping any pipeline run in `exclude`.
pub async fn find_expired_by_background(
    index: &dyn TrackingIndex,
    ttl_days: u32,
    exclude: &HashSet<PipelineRunId>,
) -> Result<BTreeMap<BackgroundId, Vec<PipelineRunId>>, StoreError> {
    let pairs = index.find_expired(ttl_days).await?;
    info!(pairs = pairs.len(), ttl_days, "Found expired pipeline runs");
    Ok(group_expired(pairs, exclude))
}

pub fn group_expired(
    pairs: Vec<ExpiredPair>,
    exclude: &HashSet<PipelineRunId>,
) -> BTreeMap<BackgroundId, Vec<PipelineRunId>> {
    let mut grouped: BTreeMap<BackgroundId, Vec<PipelineRunId>> = BTreeMap::new();
    for pair in pairs {
        if exclude.contains(&pair.pipeline_run_id) {
            continue;
        }
        grouped
            .entry(pair.background_id)
            .or_default()
            .push(pair.pipeline_run_id);
    }
    for ids in grouped.values_mut() {
        ids.sort();
        ids.dedup();
    }
    grouped
}
