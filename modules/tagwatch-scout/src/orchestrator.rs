//! Bounded, grouped execution of per-target jobs.
//!
//! Targets are consumed in groups of `concurrency`. Every job in a group runs
//! concurrently, the whole group is awaited, and the orchestrator cools down
//! before starting the next group. Group size is the only concurrency bound.

use std::future::Future;
use std::time::Duration;

use futures::future::try_join_all;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tagwatch_common::file_config::TargetGroup;
use tagwatch_common::{TagwatchError, Target};

/// Flatten configured categories into an ordered target list.
pub fn expand_targets(groups: &[TargetGroup]) -> Result<Vec<Target>, TagwatchError> {
    groups
        .iter()
        .flat_map(|group| {
            group
                .tags
                .iter()
                .map(move |tag| Target::search(&group.category, tag))
        })
        .collect()
}

#[derive(Debug, Error)]
pub enum CollectError<E> {
    #[error("collection cancelled after {completed_groups} group(s)")]
    Cancelled { completed_groups: usize },

    #[error(transparent)]
    Job(E),
}

/// Flattened results plus how the run was paced.
#[derive(Debug)]
pub struct CollectionRun<T> {
    /// Items from every job, in group order then submission order.
    pub items: Vec<T>,
    pub group_sizes: Vec<usize>,
    pub cooldowns: usize,
}

pub struct Orchestrator {
    concurrency: usize,
    cooldown: Duration,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(concurrency: usize, cooldown: Duration, cancel: CancellationToken) -> Self {
        Self {
            concurrency: concurrency.max(1),
            cooldown,
            cancel,
        }
    }

    /// Run `job` for every target. The first job error aborts the run and
    /// drops the rest of its group.
    pub async fn run_all<T, E, F, Fut>(
        &self,
        targets: &[Target],
        job: F,
    ) -> Result<CollectionRun<T>, CollectError<E>>
    where
        F: Fn(Target) -> Fut,
        Fut: Future<Output = Result<Vec<T>, E>>,
    {
        let groups: Vec<&[Target]> = targets.chunks(self.concurrency).collect();
        let total = groups.len();
        let mut run = CollectionRun {
            items: Vec::new(),
            group_sizes: Vec::with_capacity(total),
            cooldowns: 0,
        };

        for (i, group) in groups.into_iter().enumerate() {
            if self.cancel.is_cancelled() {
                return Err(CollectError::Cancelled { completed_groups: i });
            }

            info!(group = i + 1, of = total, jobs = group.len(), "Starting job group");
            let results = try_join_all(group.iter().cloned().map(&job))
                .await
                .map_err(CollectError::Job)?;

            run.group_sizes.push(group.len());
            run.items.extend(results.into_iter().flatten());

            if i + 1 < total {
                info!(
                    cooldown_secs = self.cooldown.as_secs(),
                    collected = run.items.len(),
                    "Group done, cooling down"
                );
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        return Err(CollectError::Cancelled { completed_groups: i + 1 });
                    }
                    _ = tokio::time::sleep(self.cooldown) => {}
                }
                run.cooldowns += 1;
            }
        }

        Ok(run)
    }
}
