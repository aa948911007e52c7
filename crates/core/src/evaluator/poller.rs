//! Cursor-based poller for one server-side evaluator run.
//!
//! The poller owns the evaluator dashboard state exclusively. Every mutation
//! is written through to the durable store before the matching event goes
//! out. At most one timer task is alive at a time; starting a new one aborts
//! the previous handle first, and a tick is only scheduled after the
//! previous poll has been applied.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use af_protocol::evaluator_models::{
    EvaluatorDashboard, EvaluatorRunState, EvaluatorStatus, RunSnapshot,
};
use af_protocol::ipc::Event;
use af_protocol::model_models::ModelConfig;
use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc::UnboundedSender;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use super::error::{EvaluatorError, EvaluatorResult};
use crate::client::{AgentService, ModelParams, RunControl, StartEvaluatorRequest};
use crate::storage::{
    read_json, write_json, KeyValueStore, StorageResult, EVALUATOR_DASHBOARD_KEY,
};

/// What a single poll did to the run state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// Progress past the stored cursor was merged.
    Advanced { cursor: u64 },
    /// The service reported nothing past the stored cursor.
    Unchanged,
    /// The run reached a status that ends polling.
    Settled(EvaluatorStatus),
    /// The run changed while the request was in flight; the response was dropped.
    Discarded,
}

impl PollOutcome {
    fn keeps_polling(self) -> bool {
        !matches!(self, PollOutcome::Settled(_))
    }
}

struct PollerInner {
    service: Arc<dyn AgentService>,
    store: Arc<dyn KeyValueStore>,
    events_tx: UnboundedSender<Event>,
    interval: Duration,
    dashboard: Mutex<EvaluatorDashboard>,
    timer: parking_lot::Mutex<Option<JoinHandle<()>>>,
    resumed: AtomicBool,
}

/// Drives one evaluator dashboard.
///
/// Dropping a poller whose timer is still alive stops the timer, marks the
/// run auto-suspended and fires a best-effort suspend request so no
/// server-side work is left unobserved. A poller that never polled leaves
/// the run as it found it.
pub struct EvaluatorPoller {
    inner: Arc<PollerInner>,
}

impl EvaluatorPoller {
    /// Restore the dashboard from `store` and resume polling if needed.
    ///
    /// A run persisted as running is polled again from its stored cursor. A
    /// run auto-suspended by an earlier teardown is first resumed on the
    /// service. Either case raises the one-shot flag read by
    /// [`take_resumed`](Self::take_resumed).
    pub async fn open(
        service: Arc<dyn AgentService>,
        store: Arc<dyn KeyValueStore>,
        interval: Duration,
        events_tx: UnboundedSender<Event>,
    ) -> EvaluatorResult<Self> {
        let poller = Self::open_passive(service, store, interval, events_tx)?;
        poller.rehydrate().await?;
        Ok(poller)
    }

    /// Restore the dashboard from `store` without touching the run.
    ///
    /// No control request goes out and no timer starts, so reading state or
    /// issuing a single lifecycle call does not resume and re-suspend an
    /// auto-suspended run.
    pub fn open_passive(
        service: Arc<dyn AgentService>,
        store: Arc<dyn KeyValueStore>,
        interval: Duration,
        events_tx: UnboundedSender<Event>,
    ) -> EvaluatorResult<Self> {
        let dashboard: EvaluatorDashboard =
            read_json(store.as_ref(), EVALUATOR_DASHBOARD_KEY)?.unwrap_or_default();

        Ok(Self {
            inner: Arc::new(PollerInner {
                service,
                store,
                events_tx,
                interval,
                dashboard: Mutex::new(dashboard),
                timer: parking_lot::Mutex::new(None),
                resumed: AtomicBool::new(false),
            }),
        })
    }

    async fn rehydrate(&self) -> EvaluatorResult<()> {
        let mut dashboard = self.inner.dashboard.lock().await;
        let Some(run) = dashboard.run.as_mut() else {
            return Ok(());
        };
        let run_id = run.run_id.clone();

        match run.status {
            EvaluatorStatus::Running => {}
            EvaluatorStatus::Suspended if run.auto_suspended => {
                if let Err(e) = self
                    .inner
                    .service
                    .control_evaluator(&run_id, RunControl::Resume)
                    .await
                {
                    tracing::warn!(run_id = %run_id, error = %e, "could not resume auto-suspended run");
                    return Ok(());
                }
                run.status = EvaluatorStatus::Running;
                run.auto_suspended = false;
                run.updated_at = Utc::now();
                self.inner.persist(&dashboard)?;
            }
            _ => return Ok(()),
        }
        drop(dashboard);

        self.inner.resumed.store(true, Ordering::Release);
        tracing::info!(run_id = %run_id, "resuming evaluator polling");
        let _ = self.inner.events_tx.send(Event::EvaluatorResumed { run_id });
        start_timer(&self.inner);
        Ok(())
    }

    /// Whether polling was picked up from storage. Reading clears the flag.
    pub fn take_resumed(&self) -> bool {
        self.inner.resumed.swap(false, Ordering::AcqRel)
    }

    pub async fn dashboard(&self) -> EvaluatorDashboard {
        self.inner.dashboard.lock().await.clone()
    }

    pub async fn run_state(&self) -> Option<EvaluatorRunState> {
        self.inner.dashboard.lock().await.run.clone()
    }

    /// Whether a timer task is currently alive.
    pub fn is_polling(&self) -> bool {
        self.inner
            .timer
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    pub async fn select_evaluator(&self, evaluator_kind: &str) -> EvaluatorResult<()> {
        let mut dashboard = self.inner.dashboard.lock().await;
        dashboard.selected_evaluator = Some(evaluator_kind.to_string());
        self.inner.persist(&dashboard)?;
        Ok(())
    }

    pub async fn set_item_limit(&self, evaluator_kind: &str, limit: u32) -> EvaluatorResult<()> {
        let mut dashboard = self.inner.dashboard.lock().await;
        dashboard
            .item_limits
            .insert(evaluator_kind.to_string(), limit);
        self.inner.persist(&dashboard)?;
        Ok(())
    }

    /// Start a new batch run and begin polling it from cursor 0.
    ///
    /// # Arguments
    ///
    /// * `evaluator_kind` - Which evaluator the service should run
    /// * `item_limit` - Maximum number of items to evaluate
    /// * `model` - The resolved model for the run
    pub async fn start(
        &self,
        evaluator_kind: &str,
        item_limit: u32,
        model: Option<&ModelConfig>,
    ) -> EvaluatorResult<EvaluatorRunState> {
        if evaluator_kind.trim().is_empty() {
            return Err(EvaluatorError::NoEvaluatorSelected);
        }
        let model = model.ok_or(EvaluatorError::NoModel)?;

        let mut dashboard = self.inner.dashboard.lock().await;
        if dashboard.run.as_ref().is_some_and(|run| run.status.is_live()) {
            return Err(EvaluatorError::RunAlreadyActive);
        }

        let request = StartEvaluatorRequest {
            evaluator: evaluator_kind.to_string(),
            limit: item_limit,
            model: ModelParams::from(Some(model)),
        };
        let response = self.inner.service.start_evaluator(&request).await?;

        let run = EvaluatorRunState::new(
            evaluator_kind.to_string(),
            response.run_id,
            item_limit,
            Some(model.model.clone()),
        );
        dashboard.selected_evaluator = Some(evaluator_kind.to_string());
        dashboard
            .item_limits
            .insert(evaluator_kind.to_string(), item_limit);
        dashboard.run = Some(run.clone());
        self.inner.persist(&dashboard)?;
        drop(dashboard);

        tracing::info!(run_id = %run.run_id, evaluator = evaluator_kind, item_limit, "evaluator run started");
        let _ = self.inner.events_tx.send(Event::EvaluatorStarted {
            run_id: run.run_id.clone(),
            evaluator_kind: evaluator_kind.to_string(),
        });
        start_timer(&self.inner);
        Ok(run)
    }

    /// Poll the service once with the stored cursor and apply the response.
    ///
    /// The timer calls this on every tick; it is public so callers can force
    /// an immediate refresh.
    pub async fn poll_once(&self) -> EvaluatorResult<PollOutcome> {
        self.inner.poll_once().await
    }

    /// Stop polling and ask the service to pause the run.
    ///
    /// Returns `false` without doing anything unless the run is running, so
    /// calling it twice is harmless. The pause request is best-effort: its
    /// failure is logged and the run stays suspended locally. `silent`
    /// suppresses the user notification on the status event.
    pub async fn suspend(&self, silent: bool) -> EvaluatorResult<bool> {
        let run_id = {
            let mut dashboard = self.inner.dashboard.lock().await;
            let Some(run) = dashboard
                .run
                .as_mut()
                .filter(|run| run.status == EvaluatorStatus::Running)
            else {
                return Ok(false);
            };
            self.inner.stop_timer();
            run.status = EvaluatorStatus::Suspended;
            run.auto_suspended = false;
            run.updated_at = Utc::now();
            let run_id = run.run_id.clone();
            self.inner.persist(&dashboard)?;
            run_id
        };

        tracing::info!(run_id = %run_id, silent, "evaluator run suspended");
        let _ = self.inner.events_tx.send(Event::EvaluatorStatusChanged {
            run_id: run_id.clone(),
            status: EvaluatorStatus::Suspended,
            notify: !silent,
        });

        if let Err(e) = self
            .inner
            .service
            .control_evaluator(&run_id, RunControl::Suspend)
            .await
        {
            tracing::warn!(run_id = %run_id, error = %e, "best-effort suspend request failed");
        }
        Ok(true)
    }

    /// Ask the service to continue a suspended run and poll again from the stored cursor.
    pub async fn resume(&self) -> EvaluatorResult<()> {
        let mut dashboard = self.inner.dashboard.lock().await;
        let run = dashboard.run.as_mut().ok_or(EvaluatorError::NoActiveRun)?;
        if run.status != EvaluatorStatus::Suspended {
            return Err(EvaluatorError::NotSuspended);
        }
        let run_id = run.run_id.clone();

        self.inner
            .service
            .control_evaluator(&run_id, RunControl::Resume)
            .await?;

        run.status = EvaluatorStatus::Running;
        run.auto_suspended = false;
        run.updated_at = Utc::now();
        let cursor = run.cursor;
        self.inner.persist(&dashboard)?;
        drop(dashboard);

        tracing::info!(run_id = %run_id, cursor, "evaluator run resumed");
        let _ = self.inner.events_tx.send(Event::EvaluatorStatusChanged {
            run_id,
            status: EvaluatorStatus::Running,
            notify: true,
        });
        start_timer(&self.inner);
        Ok(())
    }

    /// Cancel the run on the service, whether it is running or suspended.
    pub async fn stop(&self) -> EvaluatorResult<()> {
        let mut dashboard = self.inner.dashboard.lock().await;
        let run = dashboard.run.as_mut().ok_or(EvaluatorError::NoActiveRun)?;
        if !run.status.is_live() {
            return Err(EvaluatorError::NotRunning);
        }
        let run_id = run.run_id.clone();

        self.inner
            .service
            .control_evaluator(&run_id, RunControl::Stop)
            .await?;

        self.inner.stop_timer();
        run.status = EvaluatorStatus::Cancelled;
        run.auto_suspended = false;
        run.updated_at = Utc::now();
        self.inner.persist(&dashboard)?;
        drop(dashboard);

        tracing::info!(run_id = %run_id, "evaluator run stopped");
        let _ = self.inner.events_tx.send(Event::EvaluatorStatusChanged {
            run_id,
            status: EvaluatorStatus::Cancelled,
            notify: true,
        });
        Ok(())
    }

    /// Fetch the full record of one processed item.
    pub async fn view_record(&self, index: u32) -> EvaluatorResult<Value> {
        let run_id = {
            let dashboard = self.inner.dashboard.lock().await;
            let run = dashboard.run.as_ref().ok_or(EvaluatorError::NoActiveRun)?;
            let available = run
                .progress
                .items
                .get(&index)
                .is_some_and(|item| item.record_available);
            if !available {
                return Err(EvaluatorError::RecordUnavailable(index));
            }
            run.run_id.clone()
        };
        Ok(self.inner.service.fetch_record(&run_id, index).await?)
    }

    /// Forget the last-known run. Preferences are kept.
    ///
    /// Refused while the run still owns server-side work; stop it first.
    pub async fn clear(&self) -> EvaluatorResult<Option<EvaluatorRunState>> {
        let mut dashboard = self.inner.dashboard.lock().await;
        if dashboard.run.as_ref().is_some_and(|run| run.status.is_live()) {
            return Err(EvaluatorError::RunAlreadyActive);
        }
        self.inner.stop_timer();
        let cleared = dashboard.run.take();
        self.inner.persist(&dashboard)?;
        Ok(cleared)
    }
}

impl EvaluatorPoller {
    /// Tear down like dropping the poller, but wait for the suspend request.
    ///
    /// Use this where the runtime may stop right after the poller goes away
    /// and a spawned request would never be sent.
    pub async fn close(self) {
        if !self.inner.stop_timer() {
            return;
        }
        let run_id = {
            let mut dashboard = self.inner.dashboard.lock().await;
            self.inner.auto_suspend(&mut dashboard)
        };
        if let Some(run_id) = run_id {
            if let Err(e) = self
                .inner
                .service
                .control_evaluator(&run_id, RunControl::Suspend)
                .await
            {
                tracing::warn!(run_id = %run_id, error = %e, "suspend on close failed");
            }
        }
    }

    /// Stop polling locally and leave the run going on the service.
    ///
    /// The persisted state stays `Running`, so the next [`open`](Self::open)
    /// picks polling up from the stored cursor.
    pub fn detach(self) {
        if self.inner.stop_timer() {
            tracing::info!("detached from evaluator run");
        }
    }
}

impl Drop for EvaluatorPoller {
    fn drop(&mut self) {
        self.inner.teardown();
    }
}

impl PollerInner {
    async fn poll_once(&self) -> EvaluatorResult<PollOutcome> {
        let (run_id, cursor) = {
            let dashboard = self.dashboard.lock().await;
            let run = dashboard.run.as_ref().ok_or(EvaluatorError::NoActiveRun)?;
            if run.status != EvaluatorStatus::Running {
                return Err(EvaluatorError::NotRunning);
            }
            (run.run_id.clone(), run.cursor)
        };

        let snapshot = self.service.poll_evaluator(&run_id, cursor).await?;

        let mut dashboard = self.dashboard.lock().await;
        let Some(run) = dashboard
            .run
            .as_mut()
            .filter(|run| run.run_id == run_id && run.status == EvaluatorStatus::Running)
        else {
            tracing::debug!(run_id = %run_id, "discarding poll response for a run that moved on");
            return Ok(PollOutcome::Discarded);
        };

        let outcome = match apply_snapshot(run, snapshot) {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(run_id = %run_id, error = %e, "rejected poll response");
                let _ = self.events_tx.send(Event::ProtocolViolation {
                    detail: e.to_string(),
                });
                return Err(e);
            }
        };
        let tick = Event::PollTick {
            run_id: run_id.clone(),
            cursor: run.cursor,
            items_seen: run.progress.items.len(),
        };
        self.persist(&dashboard)?;
        drop(dashboard);

        let _ = self.events_tx.send(tick);
        if let PollOutcome::Settled(status) = outcome {
            tracing::info!(run_id = %run_id, status = ?status, "evaluator run settled");
            let _ = self.events_tx.send(Event::EvaluatorStatusChanged {
                run_id,
                status,
                notify: true,
            });
        }
        Ok(outcome)
    }

    async fn poll_loop(self: Arc<Self>) {
        loop {
            tokio::time::sleep(self.interval).await;
            match self.poll_once().await {
                Ok(outcome) if outcome.keeps_polling() => {}
                Ok(_) | Err(EvaluatorError::NoActiveRun | EvaluatorError::NotRunning) => break,
                Err(e) => tracing::warn!(error = %e, "evaluator poll failed"),
            }
        }
    }

    /// Abort the timer task. Returns whether one was still alive.
    fn stop_timer(&self) -> bool {
        match self.timer.lock().take() {
            Some(handle) => {
                let alive = !handle.is_finished();
                handle.abort();
                alive
            }
            None => false,
        }
    }

    fn persist(&self, dashboard: &EvaluatorDashboard) -> StorageResult<()> {
        write_json(self.store.as_ref(), EVALUATOR_DASHBOARD_KEY, dashboard)
    }

    /// Mark a running run as auto-suspended and persist it.
    ///
    /// Returns the run id when something was suspended.
    fn auto_suspend(&self, dashboard: &mut EvaluatorDashboard) -> Option<String> {
        let run = dashboard
            .run
            .as_mut()
            .filter(|run| run.status == EvaluatorStatus::Running)?;
        run.status = EvaluatorStatus::Suspended;
        run.auto_suspended = true;
        run.updated_at = Utc::now();
        let run_id = run.run_id.clone();
        if let Err(e) = self.persist(dashboard) {
            tracing::warn!(run_id = %run_id, error = %e, "failed to persist auto-suspended run");
        }

        let _ = self.events_tx.send(Event::EvaluatorStatusChanged {
            run_id: run_id.clone(),
            status: EvaluatorStatus::Suspended,
            notify: false,
        });
        Some(run_id)
    }

    fn teardown(self: &Arc<Self>) {
        if !self.stop_timer() {
            return;
        }

        // Another task may still hold the dashboard, for example an aborted
        // tick finishing on another worker. Then the whole suspend moves
        // into a task that waits for the lock.
        let run_id = match self.dashboard.try_lock() {
            Ok(mut dashboard) => match self.auto_suspend(&mut dashboard) {
                Some(run_id) => Some(run_id),
                None => return,
            },
            Err(_) => None,
        };

        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(run_id = ?run_id, "no runtime for teardown suspend; run marked locally only");
            return;
        };
        let inner = Arc::clone(self);
        handle.spawn(async move {
            let run_id = match run_id {
                Some(run_id) => run_id,
                None => {
                    let mut dashboard = inner.dashboard.lock().await;
                    let Some(run_id) = inner.auto_suspend(&mut dashboard) else {
                        return;
                    };
                    run_id
                }
            };
            if let Err(e) = inner.service.control_evaluator(&run_id, RunControl::Suspend).await {
                tracing::warn!(run_id = %run_id, error = %e, "teardown suspend failed");
            }
        });
    }
}

/// Replace the previous timer, aborting it first.
fn start_timer(inner: &Arc<PollerInner>) {
    let mut slot = inner.timer.lock();
    if let Some(previous) = slot.take() {
        previous.abort();
    }
    *slot = Some(tokio::spawn(Arc::clone(inner).poll_loop()));
}

/// Apply one poll response to `run`.
///
/// A response behind the stored cursor is rejected before anything is
/// touched. A response at the stored cursor carries nothing new, so its
/// item progress is ignored.
fn apply_snapshot(run: &mut EvaluatorRunState, snapshot: RunSnapshot) -> EvaluatorResult<PollOutcome> {
    if snapshot.cursor < run.cursor {
        return Err(EvaluatorError::CursorRegression {
            stored: run.cursor,
            received: snapshot.cursor,
        });
    }

    let advanced = snapshot.cursor > run.cursor;
    if advanced {
        run.progress.items.extend(snapshot.items);
        if let Some(tokens) = snapshot.tokens {
            run.progress.tokens = tokens;
        }
        run.cursor = snapshot.cursor;
    }
    run.updated_at = Utc::now();

    let outcome = match snapshot.status {
        status if status.is_terminal() => {
            run.status = status;
            if status == EvaluatorStatus::Completed {
                run.metrics_table = snapshot.metrics_table;
            }
            run.error = snapshot.error;
            PollOutcome::Settled(status)
        }
        EvaluatorStatus::Suspended => {
            run.status = EvaluatorStatus::Suspended;
            PollOutcome::Settled(EvaluatorStatus::Suspended)
        }
        _ if advanced => PollOutcome::Advanced { cursor: run.cursor },
        _ => PollOutcome::Unchanged,
    };
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MockAgentService;
    use crate::storage::MemoryStore;
    use af_protocol::evaluator_models::{ItemProgress, TokenCounters};
    use serde_json::json;
    use std::collections::BTreeMap;
    use tokio::sync::mpsc;

    fn snapshot(status: EvaluatorStatus, cursor: u64, items: &[u32]) -> RunSnapshot {
        RunSnapshot {
            status,
            cursor,
            items: items
                .iter()
                .map(|i| {
                    (
                        *i,
                        ItemProgress {
                            stage_statuses: BTreeMap::from([("parse".to_string(), "done".to_string())]),
                            tokens: TokenCounters::default(),
                            record_available: true,
                        },
                    )
                })
                .collect(),
            tokens: None,
            metrics_table: None,
            error: None,
        }
    }

    fn model() -> ModelConfig {
        ModelConfig {
            model: "model-A".to_string(),
            connection: None,
        }
    }

    async fn poller(service: &Arc<MockAgentService>) -> EvaluatorPoller {
        let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let service: Arc<dyn AgentService> = service.clone();
        EvaluatorPoller::open(service, store, Duration::from_secs(600), tx)
            .await
            .unwrap()
    }

    #[test]
    fn test_apply_snapshot_equal_cursor_skips_items() {
        let mut run = EvaluatorRunState::new("workflow".into(), "run-1".into(), 5, None);
        apply_snapshot(&mut run, snapshot(EvaluatorStatus::Running, 12, &[0, 1])).unwrap();

        let outcome = apply_snapshot(&mut run, snapshot(EvaluatorStatus::Running, 12, &[7])).unwrap();

        assert_eq!(outcome, PollOutcome::Unchanged);
        assert_eq!(run.progress.items.len(), 2);
        assert!(!run.progress.items.contains_key(&7));
    }

    #[test]
    fn test_apply_snapshot_rejects_regression_untouched() {
        let mut run = EvaluatorRunState::new("workflow".into(), "run-1".into(), 5, None);
        apply_snapshot(&mut run, snapshot(EvaluatorStatus::Running, 12, &[0])).unwrap();
        let before = run.clone();

        let err = apply_snapshot(&mut run, snapshot(EvaluatorStatus::Completed, 4, &[3])).unwrap_err();

        assert!(matches!(
            err,
            EvaluatorError::CursorRegression {
                stored: 12,
                received: 4
            }
        ));
        assert_eq!(run, before);
    }

    #[test]
    fn test_apply_snapshot_completed_keeps_metrics_table() {
        let mut run = EvaluatorRunState::new("workflow".into(), "run-1".into(), 5, None);
        let mut done = snapshot(EvaluatorStatus::Completed, 30, &[0]);
        done.metrics_table = Some(json!([{"metric": "accuracy", "value": 0.9}]));

        let outcome = apply_snapshot(&mut run, done).unwrap();

        assert_eq!(outcome, PollOutcome::Settled(EvaluatorStatus::Completed));
        assert_eq!(run.status, EvaluatorStatus::Completed);
        assert!(run.metrics_table.is_some());
    }

    #[tokio::test]
    async fn test_start_requires_kind_and_model() {
        let service = Arc::new(MockAgentService::new());
        let poller = poller(&service).await;

        assert!(matches!(
            poller.start("", 5, Some(&model())).await,
            Err(EvaluatorError::NoEvaluatorSelected)
        ));
        assert!(matches!(
            poller.start("workflow", 5, None).await,
            Err(EvaluatorError::NoModel)
        ));
        assert!(service.calls().is_empty());
    }

    #[tokio::test]
    async fn test_start_refuses_second_live_run() {
        let service = Arc::new(MockAgentService::new());
        let poller = poller(&service).await;

        let run = poller.start("workflow", 5, Some(&model())).await.unwrap();
        assert_eq!(run.run_id, "run-1");
        assert_eq!(run.cursor, 0);
        assert!(poller.is_polling());

        assert!(matches!(
            poller.start("workflow", 5, Some(&model())).await,
            Err(EvaluatorError::RunAlreadyActive)
        ));
    }

    #[tokio::test]
    async fn test_suspend_is_idempotent() {
        let service = Arc::new(MockAgentService::new());
        let poller = poller(&service).await;
        poller.start("workflow", 5, Some(&model())).await.unwrap();

        assert!(poller.suspend(false).await.unwrap());
        assert!(!poller.suspend(false).await.unwrap());

        assert_eq!(service.control_calls(), vec![RunControl::Suspend]);
        assert!(!poller.is_polling());
    }

    #[tokio::test]
    async fn test_teardown_waits_for_busy_dashboard() {
        let service = Arc::new(MockAgentService::new());
        let poller = poller(&service).await;
        poller.start("workflow", 5, Some(&model())).await.unwrap();

        let inner = Arc::clone(&poller.inner);
        let guard = inner.dashboard.lock().await;
        drop(poller);
        assert!(service.control_calls().is_empty());
        drop(guard);

        for _ in 0..10 {
            tokio::task::yield_now().await;
        }

        assert_eq!(service.control_calls(), vec![RunControl::Suspend]);
        let run = inner.dashboard.lock().await.run.clone().unwrap();
        assert_eq!(run.status, EvaluatorStatus::Suspended);
        assert!(run.auto_suspended);
    }

    #[tokio::test]
    async fn test_drop_without_polling_leaves_run_running() {
        let service = Arc::new(MockAgentService::new());
        let poller = poller(&service).await;
        poller.start("workflow", 5, Some(&model())).await.unwrap();
        let inner = Arc::clone(&poller.inner);

        poller.detach();
        tokio::task::yield_now().await;

        assert!(service.control_calls().is_empty());
        let run = inner.dashboard.lock().await.run.clone().unwrap();
        assert_eq!(run.status, EvaluatorStatus::Running);
        assert!(!run.auto_suspended);
    }

    #[tokio::test]
    async fn test_view_record_requires_available_item() {
        let service = Arc::new(MockAgentService::new());
        service.push_snapshot(Ok(snapshot(EvaluatorStatus::Running, 3, &[0])));
        let poller = poller(&service).await;
        poller.start("workflow", 5, Some(&model())).await.unwrap();
        poller.poll_once().await.unwrap();

        let record = poller.view_record(0).await.unwrap();
        assert_eq!(record["index"], 0);

        assert!(matches!(
            poller.view_record(9).await,
            Err(EvaluatorError::RecordUnavailable(9))
        ));
    }

    #[tokio::test]
    async fn test_clear_refuses_live_run() {
        let service = Arc::new(MockAgentService::new());
        let poller = poller(&service).await;
        poller.start("workflow", 5, Some(&model())).await.unwrap();

        assert!(matches!(
            poller.clear().await,
            Err(EvaluatorError::RunAlreadyActive)
        ));

        poller.stop().await.unwrap();
        let cleared = poller.clear().await.unwrap();
        assert_eq!(cleared.map(|r| r.status), Some(EvaluatorStatus::Cancelled));
        assert!(poller.run_state().await.is_none());
        // Preferences survive the clear.
        assert_eq!(poller.dashboard().await.item_limits.get("workflow"), Some(&5));
    }
}
