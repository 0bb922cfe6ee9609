//! Isolated, bounded-parallel execution of compilation units.
//!
//! Each unit runs as its own tokio task holding a semaphore permit, a private
//! [`UnitWorkspace`] and a time budget. Everything that can go wrong inside a
//! unit (compile error, timeout, workspace I/O, panic) is turned into a
//! `Failed` outcome for that unit only. Batch cancellation is the one way out
//! that drops every outcome.

use std::collections::BTreeSet;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::definition::CompilationUnit;
use crate::dialect::CompilerRegistry;
use crate::error::{BuildError, BuildResult, CompileFailure, FailureKind};
use crate::obs;
use crate::report::{BuildOutcome, UnitFailure, UnitResult};
use crate::workspace::UnitWorkspace;

/// Sender half of a batch cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Ask every batch watching this handle to stop.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for CancelHandle {
    fn default() -> Self {
        Self::new()
    }
}

/// Receiver half of a batch cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancellation is requested. Never resolves if the
    /// handle is dropped without cancelling.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Runs compilation units with failure containment.
#[derive(Debug, Clone)]
pub struct IsolatedExecutor {
    registry: Arc<CompilerRegistry>,
    workspace_root: PathBuf,
    max_workers: usize,
    unit_timeout: Duration,
    batch_timeout: Option<Duration>,
}

impl IsolatedExecutor {
    pub fn new(
        registry: Arc<CompilerRegistry>,
        workspace_root: impl Into<PathBuf>,
        max_workers: usize,
        unit_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            workspace_root: workspace_root.into(),
            max_workers: max_workers.max(1),
            unit_timeout,
            batch_timeout: None,
        }
    }

    pub fn with_batch_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn max_workers(&self) -> usize {
        self.max_workers
    }

    /// Run every unit and return one result per unit, in completion order.
    ///
    /// Returns `BuildError::Cancelled` if `cancel` fires or the batch
    /// time budget runs out before all units are terminal. In-flight units
    /// are aborted and their workspaces released before returning.
    pub async fn run(
        &self,
        units: Vec<CompilationUnit>,
        mut cancel: CancelSignal,
    ) -> BuildResult<Vec<UnitResult>> {
        if cancel.is_cancelled() {
            return Err(BuildError::Cancelled {
                reason: "cancelled before start".to_string(),
            });
        }

        let semaphore = Arc::new(Semaphore::new(self.max_workers));
        let mut pending: BTreeSet<usize> = BTreeSet::new();
        let mut class_names = Vec::with_capacity(units.len());
        let mut tasks = JoinSet::new();

        for unit in units {
            pending.insert(unit.index);
            class_names.push((unit.index, unit.class_name.clone()));

            let registry = Arc::clone(&self.registry);
            let semaphore = Arc::clone(&semaphore);
            let root = self.workspace_root.clone();
            let timeout = self.unit_timeout;

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let start = Instant::now();
                let outcome = AssertUnwindSafe(run_unit(&registry, &root, &unit, timeout))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|panic| {
                        BuildOutcome::Failed(UnitFailure::new(
                            unit.class_name.clone(),
                            CompileFailure::new(FailureKind::Panicked, panic_message(&*panic)),
                        ))
                    });
                UnitResult {
                    index: unit.index,
                    outcome,
                    duration_ms: start.elapsed().as_millis() as u64,
                }
            });
        }

        let batch_deadline = async {
            match self.batch_timeout {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(batch_deadline);

        let mut results = Vec::with_capacity(pending.len());
        loop {
            let reason = tokio::select! {
                joined = tasks.join_next() => match joined {
                    None => break,
                    Some(Ok(result)) => {
                        obs::emit_unit_finished(result.index, &result.outcome, result.duration_ms);
                        pending.remove(&result.index);
                        results.push(result);
                        continue;
                    }
                    Some(Err(err)) => {
                        // Only reachable if the task died outside catch_unwind;
                        // the unit is filled in as failed once the set drains.
                        warn!(error = %err, "compilation task terminated abnormally");
                        continue;
                    }
                },
                _ = cancel.cancelled() => "cancellation requested".to_string(),
                _ = &mut batch_deadline => format!(
                    "batch exceeded its {}ms time budget",
                    self.batch_timeout.map(|d| d.as_millis()).unwrap_or_default()
                ),
            };

            let in_flight = tasks.len();
            tasks.abort_all();
            while tasks.join_next().await.is_some() {}
            debug!(in_flight, "aborted in-flight units");
            return Err(BuildError::Cancelled { reason });
        }

        for (index, class_name) in class_names {
            if pending.contains(&index) {
                let outcome = BuildOutcome::Failed(UnitFailure::new(
                    class_name,
                    CompileFailure::new(FailureKind::Panicked, "compilation task terminated abnormally"),
                ));
                obs::emit_unit_finished(index, &outcome, 0);
                results.push(UnitResult {
                    index,
                    outcome,
                    duration_ms: 0,
                });
            }
        }
        Ok(results)
    }
}

/// Compile one unit inside its own workspace under the time budget.
async fn run_unit(
    registry: &CompilerRegistry,
    root: &std::path::Path,
    unit: &CompilationUnit,
    timeout: Duration,
) -> BuildOutcome {
    let workspace = match UnitWorkspace::allocate(root, unit) {
        Ok(ws) => ws,
        Err(failure) => return BuildOutcome::Failed(UnitFailure::new(&unit.class_name, failure)),
    };

    let result = match tokio::time::timeout(timeout, registry.dispatch(unit, &workspace)).await {
        Ok(result) => result,
        Err(_) => Err(CompileFailure::new(
            FailureKind::Timeout,
            format!("compilation exceeded {}ms time budget", timeout.as_millis()),
        )),
    };

    let released = workspace.release();
    match (result, released) {
        (Ok(compiled), Ok(())) => BuildOutcome::Compiled(compiled),
        (Ok(_), Err(failure)) => BuildOutcome::Failed(UnitFailure::new(&unit.class_name, failure)),
        (Err(failure), released) => {
            if let Err(e) = released {
                warn!(class_name = %unit.class_name, error = %e, "workspace release failed");
            }
            BuildOutcome::Failed(UnitFailure::new(&unit.class_name, failure))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("compiler panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("compiler panicked: {s}")
    } else {
        "compiler panicked".to_string()
    }
}
