//! Race execution and orchestration

use super::error::RaceError;
use super::limiter::ConcurrencyLimiter;
use super::models::{RaceOutcome, RaceReport, TaskState};
use super::scope::{CancelReason, CancellationScope};
use super::slot::{ErrorAggregator, ResultSlot};
use crate::config::RaceSettings;
use crate::metrics::RaceMetrics;
use crate::operations::BoxedOperation;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use std::fmt::Display;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

/// Operation name reported when the supervisor itself did not complete
const SUPERVISOR: &str = "supervisor";

/// State shared by every task of one race
struct Shared<Q, R, E> {
    query: Q,
    scope: CancellationScope,
    limiter: ConcurrencyLimiter,
    winner: ResultSlot<R>,
    errors: ErrorAggregator<E>,
    metrics: Arc<RaceMetrics>,
}

/// Runs operations against a query, first success wins
///
/// Every call to [`Dispatcher::run`] builds its own scope, limiter and result
/// cells, so one dispatcher can serve many concurrent races.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    /// Maximum number of operations executing at once
    concurrency_cap: usize,
    /// Optional deadline applied to the derived scope
    timeout: Option<Duration>,
    /// Return once a winner exists instead of waiting for every task
    return_on_win: bool,
}

impl Dispatcher {
    /// Create a dispatcher with the given concurrency cap
    pub fn new(concurrency_cap: usize) -> Self {
        Self {
            concurrency_cap,
            timeout: None,
            return_on_win: false,
        }
    }

    /// Create a dispatcher from race settings
    pub fn from_settings(settings: &RaceSettings) -> Self {
        let mut dispatcher = Self::new(settings.concurrency_cap)
            .with_return_on_win(settings.return_on_win);
        dispatcher.timeout = settings.timeout();
        dispatcher
    }

    /// Cancel the race's scope after `timeout`
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Return as soon as one operation wins
    ///
    /// The remaining tasks are still drained, in the background.
    pub fn with_return_on_win(mut self, enabled: bool) -> Self {
        self.return_on_win = enabled;
        self
    }

    pub fn concurrency_cap(&self) -> usize {
        self.concurrency_cap
    }

    /// Race `operations` against `query` under `parent`
    pub async fn run<Q, R, E>(
        &self,
        parent: &CancellationScope,
        query: Q,
        operations: Vec<BoxedOperation<Q, R, E>>,
    ) -> RaceOutcome<R, E>
    where
        Q: Send + Sync + 'static,
        R: Send + 'static,
        E: Display + Send + 'static,
    {
        let race_id = Uuid::new_v4();
        let span = info_span!("race", id = %race_id);
        self.dispatch(race_id, parent, query, operations)
            .instrument(span)
            .await
    }

    async fn dispatch<Q, R, E>(
        &self,
        race_id: Uuid,
        parent: &CancellationScope,
        query: Q,
        operations: Vec<BoxedOperation<Q, R, E>>,
    ) -> RaceOutcome<R, E>
    where
        Q: Send + Sync + 'static,
        R: Send + 'static,
        E: Display + Send + 'static,
    {
        let started_at = Utc::now();
        let start = Instant::now();

        let names: Vec<String> = operations.iter().map(|op| op.name().to_string()).collect();
        let metrics = Arc::new(RaceMetrics::new(names));

        if operations.is_empty() {
            warn!("No operations to race");
            let cap = self.concurrency_cap.max(1);
            return RaceOutcome {
                result: Err(RaceError::NoCandidates),
                report: build_report(race_id, started_at, start, cap, &metrics, None),
            };
        }

        let scope = match self.timeout {
            Some(timeout) => parent.child_with_timeout(timeout),
            None => parent.child(),
        };
        let limiter = ConcurrencyLimiter::new(self.concurrency_cap);
        let cap = limiter.capacity();

        info!(
            "Racing {} operations with concurrency cap {}",
            operations.len(),
            cap
        );

        let shared = Arc::new(Shared {
            query,
            scope: scope.clone(),
            limiter,
            winner: ResultSlot::new(),
            errors: ErrorAggregator::new(),
            metrics: metrics.clone(),
        });

        // Cancels the scope when this future completes or is dropped early.
        // The supervisor is detached in either case and drains every task.
        let _cancel_on_exit = scope.drop_guard();

        let supervisor = tokio::spawn(supervise(shared.clone(), operations).in_current_span());

        let supervised = if self.return_on_win {
            tokio::select! {
                joined = supervisor => joined,
                _ = shared.winner.claimed() => {
                    debug!("Winner found, draining remaining tasks in background");
                    Ok(())
                }
            }
        } else {
            supervisor.await
        };

        let winner = shared.winner.winner();
        let result = settle(&shared, supervised);

        let report = build_report(race_id, started_at, start, cap, &metrics, winner);
        match (&result, &report.winner) {
            (Ok(_), Some(name)) => info!("Race won by {} in {}ms", name, report.elapsed_ms),
            (Err(e), _) => warn!("Race failed in {}ms: {}", report.elapsed_ms, e),
            _ => {}
        }

        RaceOutcome { result, report }
    }
}

/// Race `operations` against `query`, returning the first success
///
/// If every operation fails, the error recorded last is returned. An empty
/// operation list yields [`RaceError::NoCandidates`] without spawning anything.
pub async fn race<Q, R, E>(
    scope: &CancellationScope,
    query: Q,
    operations: Vec<BoxedOperation<Q, R, E>>,
    concurrency_cap: usize,
) -> Result<R, RaceError<E>>
where
    Q: Send + Sync + 'static,
    R: Send + 'static,
    E: Display + Send + 'static,
{
    Dispatcher::new(concurrency_cap)
        .run(scope, query, operations)
        .await
        .into_result()
}

/// Pick the race result once the supervisor has finished or a winner exists
///
/// A supervisor that died without leaving a winner or an error is reported
/// as an aborted task rather than a cancellation.
fn settle<Q, R, E>(
    shared: &Shared<Q, R, E>,
    supervised: Result<(), JoinError>,
) -> Result<R, RaceError<E>> {
    let supervisor_failed = match supervised {
        Ok(()) => false,
        Err(e) => {
            error!("Race supervisor failed: {}", e);
            true
        }
    };

    if let Some(value) = shared.winner.take() {
        return Ok(value);
    }
    if let Some(error) = shared.errors.take() {
        return Err(RaceError::AllFailed(error));
    }
    let panicked = shared
        .metrics
        .records()
        .into_iter()
        .find(|record| record.state == TaskState::Panicked)
        .map(|record| record.operation);
    if let Some(operation) = panicked {
        return Err(RaceError::TaskAborted { operation });
    }
    if supervisor_failed {
        return Err(RaceError::TaskAborted {
            operation: SUPERVISOR.to_string(),
        });
    }
    Err(RaceError::Cancelled(
        shared.scope.reason().unwrap_or(CancelReason::Requested),
    ))
}

/// Spawn one task per operation and wait for all of them
async fn supervise<Q, R, E>(
    shared: Arc<Shared<Q, R, E>>,
    operations: Vec<BoxedOperation<Q, R, E>>,
) where
    Q: Send + Sync + 'static,
    R: Send + 'static,
    E: Display + Send + 'static,
{
    let mut tasks = JoinSet::new();
    for (index, operation) in operations.into_iter().enumerate() {
        let span = info_span!("task", operation = %operation.name());
        tasks.spawn(run_task(shared.clone(), index, operation).instrument(span));
    }

    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            error!("Race task did not complete: {}", e);
        }
    }
    debug!("All race tasks drained");
}

/// Queued -> Admitted -> Running -> Succeeded | Discarded | Failed | Panicked,
/// or Skipped when the scope is cancelled before the operation starts
async fn run_task<Q, R, E>(
    shared: Arc<Shared<Q, R, E>>,
    index: usize,
    operation: BoxedOperation<Q, R, E>,
) where
    Q: Send + Sync + 'static,
    R: Send + 'static,
    E: Display + Send + 'static,
{
    let admission = tokio::select! {
        biased;
        _ = shared.scope.cancelled() => None,
        admission = shared.limiter.acquire() => admission,
    };
    let Some(_admission) = admission else {
        debug!("Skipped while queued");
        shared.metrics.transition(index, TaskState::Skipped);
        return;
    };
    shared.metrics.transition(index, TaskState::Admitted);

    if shared.scope.is_cancelled() {
        debug!("Skipped after admission");
        shared.metrics.transition(index, TaskState::Skipped);
        return;
    }

    let running = shared.metrics.enter_running(index);
    let start = Instant::now();
    let outcome = AssertUnwindSafe(operation.execute(&shared.scope, &shared.query))
        .catch_unwind()
        .await;
    drop(running);
    let elapsed = start.elapsed();

    let state = match outcome {
        Ok(Ok(value)) => {
            if shared.winner.try_set(index, value) {
                shared.scope.cancel();
                debug!("Succeeded in {:?}, cancelling siblings", elapsed);
                TaskState::Succeeded
            } else {
                debug!("Succeeded in {:?} after the race was won, discarding", elapsed);
                TaskState::Discarded
            }
        }
        Ok(Err(e)) => {
            debug!("Failed in {:?}: {}", elapsed, e);
            shared.errors.set(index, e);
            TaskState::Failed
        }
        Err(_) => {
            error!("Operation panicked after {:?}", elapsed);
            TaskState::Panicked
        }
    };
    shared.metrics.transition(index, state);
}

fn build_report(
    race_id: Uuid,
    started_at: DateTime<Utc>,
    start: Instant,
    concurrency_cap: usize,
    metrics: &RaceMetrics,
    winner: Option<usize>,
) -> RaceReport {
    RaceReport {
        race_id,
        started_at,
        elapsed_ms: start.elapsed().as_millis() as u64,
        concurrency_cap,
        winner: winner.and_then(|i| metrics.name(i)).map(str::to_string),
        tasks: metrics.records(),
        peak_running: metrics.peak_running(),
        invoked: metrics.invoked(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operations::search_fn;
    use std::future::Future;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::time::{sleep, timeout};

    type Op = BoxedOperation<String, String, String>;

    fn op<F, Fut>(name: &str, func: F) -> Op
    where
        F: Fn(CancellationScope, String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        Arc::new(search_fn(name, func))
    }

    /// Operation that ignores its scope, sleeps, then returns `result`
    fn after(name: &str, delay_ms: u64, result: Result<&str, &str>) -> Op {
        let result = result.map(str::to_string).map_err(str::to_string);
        op(name, move |_scope, _query| {
            let result = result.clone();
            async move {
                sleep(Duration::from_millis(delay_ms)).await;
                result
            }
        })
    }

    /// Operation counting its invocations, then succeeding after `delay_ms`
    fn counted(name: &str, delay_ms: u64, calls: Arc<AtomicUsize>) -> Op {
        let value = name.to_string();
        op(name, move |_scope, _query| {
            calls.fetch_add(1, Ordering::SeqCst);
            let value = value.clone();
            async move {
                sleep(Duration::from_millis(delay_ms)).await;
                Ok(value)
            }
        })
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_success_wins_over_failures() {
        let ops = vec![
            after("primary", 30, Ok("rowset-A")),
            after("replica-1", 0, Err("E1")),
            after("replica-2", 0, Err("E2")),
        ];

        let outcome = Dispatcher::new(3)
            .run(&CancellationScope::new(), "users".to_string(), ops)
            .await;

        assert_eq!(outcome.result.unwrap(), "rowset-A");
        assert_eq!(outcome.report.winner.as_deref(), Some("primary"));
        assert_eq!(outcome.report.count(TaskState::Failed), 2);
        assert_eq!(outcome.report.count(TaskState::Succeeded), 1);
        assert!(outcome.report.all_terminal());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_all_fail_returns_last_error() {
        let ops = vec![
            after("a", 0, Err("E1")),
            after("b", 30, Err("E2")),
            after("c", 80, Err("E3")),
        ];

        let err = race(&CancellationScope::new(), "q".to_string(), ops, 3)
            .await
            .unwrap_err();

        assert_eq!(err.into_operation_error().as_deref(), Some("E3"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_simultaneous_failures_return_one_of_them() {
        let ops = vec![
            after("a", 5, Err("E1")),
            after("b", 5, Err("E2")),
            after("c", 5, Err("E3")),
        ];

        let err = race(&CancellationScope::new(), "q".to_string(), ops, 3)
            .await
            .unwrap_err();

        let last = err.into_operation_error().unwrap();
        assert!(["E1", "E2", "E3"].contains(&last.as_str()), "unexpected {}", last);
    }

    #[tokio::test]
    async fn test_empty_set_returns_no_candidates() {
        let ops: Vec<Op> = Vec::new();
        let outcome = timeout(
            Duration::from_secs(1),
            Dispatcher::new(4).run(&CancellationScope::new(), "q".to_string(), ops),
        )
        .await
        .expect("empty race must not block");

        assert!(outcome.result.unwrap_err().is_no_candidates());
        assert!(outcome.report.tasks.is_empty());
        assert_eq!(outcome.report.invoked, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrency_cap_is_respected() {
        for (cap, count) in [(1, 5), (3, 10)] {
            let current = Arc::new(AtomicUsize::new(0));
            let peak = Arc::new(AtomicUsize::new(0));

            let ops: Vec<Op> = (0..count)
                .map(|i| {
                    let current = current.clone();
                    let peak = peak.clone();
                    op(&format!("slow-{}", i), move |_scope, _query| {
                        let current = current.clone();
                        let peak = peak.clone();
                        async move {
                            let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                            peak.fetch_max(now, Ordering::SeqCst);
                            sleep(Duration::from_millis(15)).await;
                            current.fetch_sub(1, Ordering::SeqCst);
                            Err::<String, _>(format!("miss-{}", i))
                        }
                    })
                })
                .collect();

            let outcome = Dispatcher::new(cap)
                .run(&CancellationScope::new(), "q".to_string(), ops)
                .await;

            assert!(outcome.result.is_err());
            assert!(peak.load(Ordering::SeqCst) <= cap);
            assert!(outcome.report.peak_running <= cap);
            assert_eq!(outcome.report.invoked, count);
            if cap == 1 {
                assert_eq!(peak.load(Ordering::SeqCst), 1);
            }
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_no_new_operations_start_after_a_win() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ops: Vec<Op> = (0..5)
            .map(|i| counted(&format!("op-{}", i), 10, calls.clone()))
            .collect();

        let outcome = Dispatcher::new(1)
            .run(&CancellationScope::new(), "q".to_string(), ops)
            .await;

        assert!(outcome.result.is_ok());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(outcome.report.invoked, 1);
        assert_eq!(outcome.report.count(TaskState::Skipped), 4);
    }

    #[tokio::test]
    async fn test_cancelled_parent_skips_everything() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ops: Vec<Op> = (0..3)
            .map(|i| counted(&format!("op-{}", i), 0, calls.clone()))
            .collect();

        let parent = CancellationScope::new();
        parent.cancel();

        let outcome = Dispatcher::new(2).run(&parent, "q".to_string(), ops).await;

        match outcome.result {
            Err(RaceError::Cancelled(CancelReason::Requested)) => {}
            other => panic!("expected cancellation, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.report.count(TaskState::Skipped), 3);
    }

    #[tokio::test]
    async fn test_expired_parent_deadline_reports_deadline() {
        let calls = Arc::new(AtomicUsize::new(0));
        let parent = CancellationScope::new().child_with_timeout(Duration::ZERO);

        let err = race(&parent, "q".to_string(), vec![counted("op", 0, calls.clone())], 1)
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            RaceError::Cancelled(CancelReason::DeadlineExceeded)
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    // Single-threaded so tasks acquire slots in submission order.
    #[tokio::test]
    async fn test_timeout_stops_queued_operations() {
        let calls = Arc::new(AtomicUsize::new(0));
        let ops = vec![
            after("slow", 80, Err("slow")),
            counted("queued-1", 0, calls.clone()),
            counted("queued-2", 0, calls.clone()),
        ];

        let outcome = Dispatcher::new(1)
            .with_timeout(Duration::from_millis(20))
            .run(&CancellationScope::new(), "q".to_string(), ops)
            .await;

        // The in-flight operation is not interrupted and its error is kept.
        assert_eq!(
            outcome.result.unwrap_err().into_operation_error().as_deref(),
            Some("slow")
        );
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert_eq!(outcome.report.count(TaskState::Skipped), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_operations_observing_scope_stop_early() {
        let waiting = |name: &str| {
            op(name, |scope: CancellationScope, _query| async move {
                tokio::select! {
                    _ = scope.cancelled() => Err::<String, String>("abandoned".to_string()),
                    _ = sleep(Duration::from_secs(30)) => Err("finished".to_string()),
                }
            })
        };
        let ops = vec![waiting("long-1"), waiting("long-2"), after("fast", 10, Ok("hit"))];

        let outcome = timeout(
            Duration::from_secs(5),
            Dispatcher::new(3).run(&CancellationScope::new(), "q".to_string(), ops),
        )
        .await
        .expect("cooperative operations should return once the race is won");

        assert_eq!(outcome.result.unwrap(), "hit");
        assert_eq!(outcome.report.count(TaskState::Failed), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_late_success_is_discarded() {
        let ops = vec![after("a", 50, Ok("A")), after("b", 50, Ok("B"))];

        let outcome = Dispatcher::new(2)
            .run(&CancellationScope::new(), "q".to_string(), ops)
            .await;

        let value = outcome.result.unwrap();
        assert!(value == "A" || value == "B");
        assert_eq!(outcome.report.count(TaskState::Succeeded), 1);
        assert_eq!(outcome.report.count(TaskState::Discarded), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_success_suppresses_later_errors() {
        let ops = vec![after("win", 0, Ok("row")), after("late", 40, Err("late failure"))];

        let result = race(&CancellationScope::new(), "q".to_string(), ops, 2).await;
        assert_eq!(result.unwrap(), "row");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_waits_for_in_flight_operations_by_default() {
        let ops = vec![after("fast", 5, Ok("fast")), after("slow", 150, Err("slow"))];

        let start = Instant::now();
        let outcome = Dispatcher::new(2)
            .run(&CancellationScope::new(), "q".to_string(), ops)
            .await;

        assert_eq!(outcome.result.unwrap(), "fast");
        assert!(start.elapsed() >= Duration::from_millis(150));
        assert!(outcome.report.all_terminal());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_return_on_win_drains_in_background() {
        let finished = Arc::new(AtomicBool::new(false));
        let slow = {
            let finished = finished.clone();
            op("slow", move |_scope, _query| {
                let finished = finished.clone();
                async move {
                    sleep(Duration::from_millis(200)).await;
                    finished.store(true, Ordering::SeqCst);
                    Err::<String, _>("slow".to_string())
                }
            })
        };
        let ops = vec![after("fast", 5, Ok("fast")), slow];

        let start = Instant::now();
        let outcome = Dispatcher::new(2)
            .with_return_on_win(true)
            .run(&CancellationScope::new(), "q".to_string(), ops)
            .await;

        assert_eq!(outcome.result.unwrap(), "fast");
        assert!(start.elapsed() < Duration::from_millis(150));
        assert!(!finished.load(Ordering::SeqCst));

        sleep(Duration::from_millis(350)).await;
        assert!(finished.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_abandoned_race_still_drains_tasks() {
        let finished = Arc::new(AtomicBool::new(false));
        let calls = Arc::new(AtomicUsize::new(0));
        let running = {
            let finished = finished.clone();
            op("running", move |_scope, _query| {
                let finished = finished.clone();
                async move {
                    sleep(Duration::from_millis(60)).await;
                    finished.store(true, Ordering::SeqCst);
                    Err::<String, _>("done".to_string())
                }
            })
        };
        let ops = vec![
            running,
            counted("queued-1", 0, calls.clone()),
            counted("queued-2", 0, calls.clone()),
        ];

        let caller = tokio::spawn(async move {
            Dispatcher::new(1)
                .run(&CancellationScope::new(), "q".to_string(), ops)
                .await
        });
        sleep(Duration::from_millis(15)).await;
        caller.abort();

        sleep(Duration::from_millis(150)).await;
        assert!(finished.load(Ordering::SeqCst));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_panicking_operation() {
        let boom = || {
            op("boom", |_scope, _query| async move {
                if true {
                    panic!("operation blew up");
                }
                Ok::<String, String>(String::new())
            })
        };

        let outcome = Dispatcher::new(2)
            .run(
                &CancellationScope::new(),
                "q".to_string(),
                vec![boom(), after("plain", 10, Err("E1"))],
            )
            .await;
        assert_eq!(
            outcome.result.unwrap_err().into_operation_error().as_deref(),
            Some("E1")
        );
        assert_eq!(outcome.report.count(TaskState::Panicked), 1);

        let err = race(&CancellationScope::new(), "q".to_string(), vec![boom()], 1)
            .await
            .unwrap_err();
        match err {
            RaceError::TaskAborted { operation } => assert_eq!(operation, "boom"),
            other => panic!("expected aborted task, got {:?}", other),
        }
    }

    fn shared_state(scope: &CancellationScope) -> Shared<String, String, String> {
        Shared {
            query: "q".to_string(),
            scope: scope.clone(),
            limiter: ConcurrencyLimiter::new(1),
            winner: ResultSlot::new(),
            errors: ErrorAggregator::new(),
            metrics: Arc::new(RaceMetrics::new(vec!["only".to_string()])),
        }
    }

    #[tokio::test]
    async fn test_failed_supervisor_is_not_a_cancellation() {
        let join_error = tokio::spawn(async { panic!("supervisor blew up") })
            .await
            .unwrap_err();

        let scope = CancellationScope::new();
        scope.cancel();
        let shared = shared_state(&scope);
        match settle(&shared, Err(join_error)) {
            Err(RaceError::TaskAborted { operation }) => assert_eq!(operation, SUPERVISOR),
            other => panic!("expected aborted supervisor, got {:?}", other),
        }

        // Results recorded before the supervisor died still take precedence.
        let join_error = tokio::spawn(async { panic!("supervisor blew up") })
            .await
            .unwrap_err();
        let shared = shared_state(&scope);
        shared.errors.set(0, "E1".to_string());
        assert_eq!(
            settle(&shared, Err(join_error))
                .unwrap_err()
                .into_operation_error()
                .as_deref(),
            Some("E1")
        );

        let shared = shared_state(&scope);
        assert!(matches!(
            settle(&shared, Ok(())),
            Err(RaceError::Cancelled(CancelReason::Requested))
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_query_reaches_every_operation_unchanged() {
        let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
        let ops: Vec<Op> = (0..4)
            .map(|i| {
                let seen = seen.clone();
                op(&format!("op-{}", i), move |_scope, query: String| {
                    seen.lock().unwrap().push(query.clone());
                    async move { Err::<String, _>(query) }
                })
            })
            .collect();

        let err = race(&CancellationScope::new(), "SELECT 1".to_string(), ops, 4)
            .await
            .unwrap_err();

        assert_eq!(err.into_operation_error().as_deref(), Some("SELECT 1"));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 4);
        assert!(seen.iter().all(|q| q == "SELECT 1"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_races_do_not_interfere() {
        let handles: Vec<_> = (1..=8usize)
            .map(|cap| {
                tokio::spawn(async move {
                    let ops: Vec<Op> = (0..6)
                        .map(|i| {
                            if i == 5 {
                                after("winner", 20, Ok("found"))
                            } else {
                                after("miss", 5, Err("miss"))
                            }
                        })
                        .collect();
                    Dispatcher::new(cap)
                        .run(&CancellationScope::new(), "q".to_string(), ops)
                        .await
                })
            })
            .collect();

        for (cap, handle) in (1..=8usize).zip(handles) {
            let outcome = handle.await.unwrap();
            assert_eq!(outcome.result.unwrap(), "found");
            assert!(outcome.report.peak_running <= cap);
            assert_eq!(outcome.report.concurrency_cap, cap);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_terminates_with_many_operations() {
        let ops: Vec<Op> = (0..200)
            .map(|i| after(&format!("op-{}", i), (i % 7) as u64, Err("miss")))
            .collect();

        let outcome = timeout(
            Duration::from_secs(10),
            Dispatcher::new(16).run(&CancellationScope::new(), "q".to_string(), ops),
        )
        .await
        .expect("race must terminate");

        assert!(outcome.result.is_err());
        assert!(outcome.report.all_terminal());
        assert_eq!(outcome.report.invoked, 200);
    }

    #[test]
    fn test_from_settings() {
        let settings = RaceSettings {
            concurrency_cap: 4,
            timeout: Some(0.25),
            return_on_win: true,
        };
        let dispatcher = Dispatcher::from_settings(&settings);
        assert_eq!(dispatcher.concurrency_cap(), 4);
        assert_eq!(dispatcher.timeout, Some(Duration::from_millis(250)));
        assert!(dispatcher.return_on_win);
    }
}
