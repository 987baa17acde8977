//! Capacity is never exceeded and batches are admitted strictly in order.

use proptest::prelude::*;
use taxon_eviction::eviction::plan::{admit, Capacity, EvictionPlan};
use taxon_eviction::store::memory::{InMemoryStores, MutationCall};
use taxon_eviction::types::PipelineRunId;

fn pipeline_run_ids(count: usize) -> Vec<PipelineRunId> {
    (0..count).map(|i| PipelineRunId::from(format!("pr_{:04}", i))).collect()
}

#[test]
fn test_admission_respects_capacity_property() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(0usize..40, 0usize..8, 1usize..7),
            |(candidates, capacity, batch_size)| {
                let stores = InMemoryStores::new();
                let ids = pipeline_run_ids(candidates);
                let plan = EvictionPlan::ByPipelineRun {
                    pipeline_run_ids: ids.clone(),
                };

                let admission = runtime.block_on(admit(
                    &plan,
                    Capacity::new(capacity),
                    batch_size,
                    100,
                    &stores,
                    &stores,
                ));

                let total_batches = candidates.div_ceil(batch_size);
                prop_assert!(admission.started.len() <= capacity);
                prop_assert_eq!(admission.started.len(), total_batches.min(capacity));
                prop_assert_eq!(
                    admission.remaining.get(),
                    capacity.saturating_sub(total_batches)
                );

                // Admitted ids are a prefix of the candidate list, in order.
                let admitted: Vec<PipelineRunId> = admission
                    .started
                    .iter()
                    .flat_map(|started| started.pipeline_run_ids.clone())
                    .collect();
                prop_assert_eq!(&admitted[..], &ids[..admitted.len()]);
                prop_assert!(admission
                    .started
                    .iter()
                    .all(|started| started.pipeline_run_ids.len() <= batch_size));

                let submits = stores
                    .calls()
                    .iter()
                    .filter(|call| matches!(call, MutationCall::SubmitBulkDelete { .. }))
                    .count();
                prop_assert_eq!(submits, admission.started.len());
                Ok(())
            },
        )
        .unwrap();
}

#[test]
fn test_capacity_is_shared_across_plans_property() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let mut runner = proptest::test_runner::TestRunner::default();

    runner
        .run(
            &(proptest::collection::vec(0usize..6, 1..5), 0usize..10),
            |(group_sizes, capacity)| {
                let stores = InMemoryStores::new();
                let mut remaining = Capacity::new(capacity);
                let mut started = 0;

                for (group, size) in group_sizes.iter().enumerate() {
                    let plan = EvictionPlan::ByPipelineRunAndBackground {
                        background_id: format!("{}", group).into(),
                        pipeline_run_ids: pipeline_run_ids(*size),
                    };
                    let admission =
                        runtime.block_on(admit(&plan, remaining, 2, 100, &stores, &stores));
                    prop_assert!(admission.remaining <= remaining);
                    started += admission.started.len();
                    remaining = admission.remaining;
                }

                prop_assert!(started <= capacity);
                Ok(())
            },
        )
        .unwrap();
}
