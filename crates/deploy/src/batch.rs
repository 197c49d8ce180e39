//! Bounded-concurrency execution of independent deployment actions.

use std::future::Future;

use futures::future::{BoxFuture, FutureExt, join_all};

use crate::error::{ActionFailure, BatchError};

/// A deferred deployment or call, run at most once by a [`BatchExecutor`].
///
/// Actions carry no dependency information; whoever builds the list is
/// responsible for only including actions whose inputs already exist.
pub struct DeploymentAction<'a, T> {
    label: String,
    run: Box<dyn FnOnce() -> BoxFuture<'a, anyhow::Result<T>> + Send + 'a>,
}

impl<'a, T> DeploymentAction<'a, T> {
    pub fn new<F, Fut>(label: impl Into<String>, run: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'a,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'a,
    {
        Self {
            label: label.into(),
            run: Box::new(move || run().boxed()),
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    async fn invoke(self) -> Result<T, ActionFailure> {
        let Self { label, run } = self;
        match run().await {
            Ok(value) => Ok(value),
            Err(err) => Err(ActionFailure::new(label, &err)),
        }
    }
}

impl<T> std::fmt::Debug for DeploymentAction<'_, T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeploymentAction")
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

/// How a single action ended.
#[derive(Debug)]
pub enum ActionOutcome<T> {
    Completed(T),
    Failed(ActionFailure),
    /// Never started because an earlier group failed.
    Skipped { label: String },
}

impl<T> ActionOutcome<T> {
    pub fn is_completed(&self) -> bool {
        matches!(self, ActionOutcome::Completed(_))
    }
}

/// Runs actions in contiguous groups of at most `max_concurrency`.
///
/// A group is dispatched all at once and fully settles before the next one
/// starts. After a group with a failure no further group is started.
#[derive(Debug, Clone, Copy)]
pub struct BatchExecutor {
    max_concurrency: usize,
}

impl BatchExecutor {
    pub fn new(max_concurrency: usize) -> Self {
        Self {
            max_concurrency: max_concurrency.max(1),
        }
    }

    pub fn max_concurrency(&self) -> usize {
        self.max_concurrency
    }

    /// Run every action and report one outcome per action, in input order.
    pub async fn run_settled<'a, T>(
        &self,
        actions: Vec<DeploymentAction<'a, T>>,
    ) -> Vec<ActionOutcome<T>> {
        let total = actions.len();
        let mut outcomes = Vec::with_capacity(total);
        let mut actions = actions.into_iter();
        let mut failed = false;
        let mut group_index = 0;

        loop {
            let group: Vec<_> = actions.by_ref().take(self.max_concurrency).collect();
            if group.is_empty() {
                break;
            }

            if failed {
                outcomes.extend(
                    group
                        .into_iter()
                        .map(|action| ActionOutcome::Skipped { label: action.label }),
                );
                continue;
            }

            tracing::debug!(
                group = group_index,
                size = group.len(),
                total,
                "Dispatching batch group"
            );

            for result in join_all(group.into_iter().map(DeploymentAction::invoke)).await {
                outcomes.push(match result {
                    Ok(value) => ActionOutcome::Completed(value),
                    Err(failure) => {
                        tracing::error!(action = %failure.label, reason = %failure.reason, "Action failed");
                        failed = true;
                        ActionOutcome::Failed(failure)
                    }
                });
            }
            group_index += 1;
        }

        outcomes
    }

    /// Run every action and return their results in input order, or the
    /// failures if any action failed.
    pub async fn run_batched<'a, T>(
        &self,
        actions: Vec<DeploymentAction<'a, T>>,
    ) -> Result<Vec<T>, BatchError> {
        let outcomes = self.run_settled(actions).await;

        let mut values = Vec::with_capacity(outcomes.len());
        let mut failures = Vec::new();
        let mut skipped = 0;
        for outcome in outcomes {
            match outcome {
                ActionOutcome::Completed(value) => values.push(value),
                ActionOutcome::Failed(failure) => failures.push(failure),
                ActionOutcome::Skipped { .. } => skipped += 1,
            }
        }

        if failures.is_empty() {
            Ok(values)
        } else {
            Err(BatchError {
                failures,
                completed: values.len(),
                skipped,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::{
        sync::{
            Arc, Mutex,
            atomic::{AtomicUsize, Ordering},
        },
        time::Duration,
    };

    /// Records concurrency while actions sleep.
    #[derive(Default)]
    struct Tracker {
        current: AtomicUsize,
        max: AtomicUsize,
        started: Mutex<Vec<usize>>,
    }

    impl Tracker {
        async fn work(&self, id: usize, millis: u64) -> anyhow::Result<usize> {
            self.started.lock().unwrap().push(id);
            let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.max.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            self.current.fetch_sub(1, Ordering::SeqCst);
            Ok(id)
        }
    }

    fn actions(tracker: &Arc<Tracker>, n: usize) -> Vec<DeploymentAction<'static, usize>> {
        (0..n)
            .map(|id| {
                let tracker = tracker.clone();
                // Later actions finish first
                let millis = ((n - id) * 3) as u64;
                DeploymentAction::new(format!("action-{id}"), move || async move {
                    tracker.work(id, millis).await
                })
            })
            .collect()
    }

    #[tokio::test]
    async fn test_output_order_and_concurrency_bound() {
        for (n, k) in [(0, 1), (1, 1), (7, 1), (7, 3), (8, 4), (5, 10)] {
            let tracker = Arc::new(Tracker::default());
            let results = BatchExecutor::new(k)
                .run_batched(actions(&tracker, n))
                .await
                .unwrap();

            assert_eq!(results, (0..n).collect::<Vec<_>>(), "order for n={n} k={k}");
            assert!(
                tracker.max.load(Ordering::SeqCst) <= k,
                "more than {k} actions in flight for n={n}"
            );
            if n > 0 {
                assert_eq!(tracker.max.load(Ordering::SeqCst), n.min(k));
            }
        }
    }

    #[tokio::test]
    async fn test_failed_group_drains_then_stops() {
        let tracker = Arc::new(Tracker::default());
        let mut list = actions(&tracker, 6);
        list[1] = DeploymentAction::new("bpro token", || async {
            anyhow::bail!("transaction reverted")
        });

        let outcomes = BatchExecutor::new(3).run_settled(list).await;

        assert_eq!(outcomes.len(), 6);
        assert!(outcomes[0].is_completed());
        assert!(matches!(&outcomes[1], ActionOutcome::Failed(f) if f.label == "bpro token"));
        // Sibling in the same group still ran to completion
        assert!(outcomes[2].is_completed());
        assert!(
            outcomes[3..]
                .iter()
                .all(|o| matches!(o, ActionOutcome::Skipped { .. }))
        );

        let mut started = tracker.started.lock().unwrap().clone();
        started.sort_unstable();
        assert_eq!(started, vec![0, 2]);
    }

    #[tokio::test]
    async fn test_batch_error_counts() {
        let list: Vec<DeploymentAction<'static, ()>> = vec![
            DeploymentAction::new("a", || async { Ok(()) }),
            DeploymentAction::new("b", || async { anyhow::bail!("boom") }),
            DeploymentAction::new("c", || async { Ok(()) }),
        ];

        let err = BatchExecutor::new(2).run_batched(list).await.unwrap_err();
        assert_eq!(err.failures.len(), 1);
        assert_eq!(err.completed, 1);
        assert_eq!(err.skipped, 1);
        assert!(err.to_string().contains("action `b` failed: boom"), "{err}");
    }

    #[test]
    fn test_zero_concurrency_is_clamped() {
        assert_eq!(BatchExecutor::new(0).max_concurrency(), 1);
    }
}
