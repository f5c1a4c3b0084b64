// File: orchestrator/src/pipeline/runner.rs
//
// Pipeline Runner
//
// Runs steps strictly in order against one context. A failing step or a kill
// request aborts the rest of the run after the cleanup hook has run; a step
// whose skip check holds is recorded without running its task. A kill also
// interrupts the step in flight.

use super::step::PipelineStep;
use crate::error::{StackError, StackResult};
use crate::orchestrator::{KillSwitch, KILL_POLL_INTERVAL};
use futures::future::BoxFuture;
use log::{info, warn};
use strum::Display;
use tokio::time::{Duration, Instant};

/// Hook run once when the pipeline aborts.
pub type CleanupHook<C> = Box<dyn for<'a> Fn(&'a mut C) -> BoxFuture<'a, ()> + Send + Sync>;

/// Lifecycle of a pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum PipelineState {
    /// `run` not called yet.
    NotStarted,
    /// Steps are executing.
    Running,
    /// Every step executed or was skipped.
    Completed,
    /// A step failed or a kill was requested.
    Aborted,
}

/// What happened to a step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum StepOutcome {
    /// The task ran and succeeded.
    Executed,
    /// The skip check held; the task never ran.
    Skipped,
}

/// Record of one finished step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    /// 1-based position.
    pub index: usize,
    /// Step title.
    pub title: String,
    /// Executed or skipped.
    pub outcome: StepOutcome,
    /// Time spent in the skip check and the task.
    pub elapsed: Duration,
}

/// Summary of a pipeline run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    /// Pipeline name.
    pub name: String,
    /// Final state.
    pub state: PipelineState,
    /// Finished steps, in order.
    pub steps: Vec<StepRecord>,
    /// Total run time.
    pub elapsed: Duration,
}

impl PipelineReport {
    /// Titles of executed steps.
    pub fn executed(&self) -> Vec<&str> {
        self.titles(StepOutcome::Executed)
    }

    /// Titles of skipped steps.
    pub fn skipped(&self) -> Vec<&str> {
        self.titles(StepOutcome::Skipped)
    }

    fn titles(&self, outcome: StepOutcome) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.outcome == outcome)
            .map(|s| s.title.as_str())
            .collect()
    }
}

/// Ordered list of steps with an abort hook. Runs once.
pub struct Pipeline<C> {
    name: String,
    steps: Vec<PipelineStep<C>>,
    cleanup: Option<CleanupHook<C>>,
    kill: Option<KillSwitch>,
    state: PipelineState,
    records: Vec<StepRecord>,
    elapsed: Duration,
}

impl<C: Send> Pipeline<C> {
    /// Empty pipeline.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            cleanup: None,
            kill: None,
            state: PipelineState::NotStarted,
            records: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    /// Append a step.
    pub fn step(mut self, step: PipelineStep<C>) -> Self {
        self.steps.push(step);
        self
    }

    /// Append several steps.
    pub fn steps(mut self, steps: impl IntoIterator<Item = PipelineStep<C>>) -> Self {
        self.steps.extend(steps);
        self
    }

    /// Hook run when the pipeline aborts, before the error is returned.
    pub fn on_abort<F>(mut self, hook: F) -> Self
    where
        F: for<'a> Fn(&'a mut C) -> BoxFuture<'a, ()> + Send + Sync + 'static,
    {
        self.cleanup = Some(Box::new(hook));
        self
    }

    /// Abort before the next step once `kill` is triggered.
    pub fn with_kill_switch(mut self, kill: KillSwitch) -> Self {
        self.kill = Some(kill);
        self
    }

    /// Current state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// Number of steps not run yet.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Whether the pipeline has no pending step.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Report of the steps finished so far.
    pub fn report(&self) -> PipelineReport {
        PipelineReport {
            name: self.name.clone(),
            state: self.state,
            steps: self.records.clone(),
            elapsed: self.elapsed,
        }
    }

    /// Run every step in order.
    ///
    /// # Errors
    ///
    /// - [`StackError::AlreadyRun`] on a second call
    /// - [`StackError::Killed`] if the kill switch fired between two steps
    /// - [`StackError::StepFailure`] wrapping the error of the first failing step
    pub async fn run(&mut self, ctx: &mut C) -> StackResult<PipelineReport> {
        if self.state != PipelineState::NotStarted {
            return Err(StackError::AlreadyRun(self.state.to_string()));
        }
        self.state = PipelineState::Running;

        let started = Instant::now();
        let steps = std::mem::take(&mut self.steps);
        let total = steps.len();
        info!("Running {} ({} steps)", self.name, total);

        for (i, step) in steps.iter().enumerate() {
            let index = i + 1;

            if self.kill_requested() {
                warn!("Kill requested before step {} ({})", index, step.title());
                self.abort(ctx, started).await;
                return Err(StackError::Killed(format!("{} at step {}", self.name, index)));
            }

            info!("[{}/{}] {}", index, total, step.title());
            let step_started = Instant::now();
            let result = match self.kill.clone() {
                Some(kill) => tokio::select! {
                    biased;
                    result = Self::execute(step, ctx) => Some(result),
                    _ = kill.triggered(KILL_POLL_INTERVAL) => None,
                },
                None => Some(Self::execute(step, ctx).await),
            };
            let outcome = match result {
                None => {
                    warn!("Kill requested during step {} ({})", index, step.title());
                    self.abort(ctx, started).await;
                    return Err(StackError::Killed(format!("{} at step {}", self.name, index)));
                }
                Some(Ok(outcome)) => outcome,
                Some(Err(source)) => {
                    warn!("[{}/{}] {} failed: {}", index, total, step.title(), source);
                    self.abort(ctx, started).await;
                    return Err(StackError::StepFailure {
                        index,
                        title: step.title().to_string(),
                        source: Box::new(source),
                    });
                }
            };
            if outcome == StepOutcome::Skipped {
                info!("[{}/{}] {} skipped", index, total, step.title());
            }

            self.records.push(StepRecord {
                index,
                title: step.title().to_string(),
                outcome,
                elapsed: step_started.elapsed(),
            });
        }

        // A kill during the last step still aborts the run
        if self.kill_requested() {
            warn!("Kill requested after the last step of {}", self.name);
            self.abort(ctx, started).await;
            return Err(StackError::Killed(format!("{} after step {}", self.name, total)));
        }

        self.state = PipelineState::Completed;
        self.elapsed = started.elapsed();
        info!("{} completed in {:?}", self.name, self.elapsed);
        Ok(self.report())
    }

    fn kill_requested(&self) -> bool {
        self.kill.as_ref().is_some_and(KillSwitch::is_triggered)
    }

    async fn execute(step: &PipelineStep<C>, ctx: &mut C) -> StackResult<StepOutcome> {
        if step.should_skip(ctx).await? {
            return Ok(StepOutcome::Skipped);
        }
        step.run(ctx).await?;
        Ok(StepOutcome::Executed)
    }

    async fn abort(&mut self, ctx: &mut C, started: Instant) {
        self.state = PipelineState::Aborted;
        if let Some(cleanup) = &self.cleanup {
            cleanup(ctx).await;
        }
        self.elapsed = started.elapsed();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct Trace {
        ran: Vec<usize>,
        skip_checks: usize,
        cleanups: usize,
    }

    fn recording(index: usize) -> PipelineStep<Trace> {
        PipelineStep::new(format!("step {}", index), move |ctx: &mut Trace| {
            Box::pin(async move {
                ctx.ran.push(index);
                Ok(())
            })
        })
    }

    fn failing(index: usize) -> PipelineStep<Trace> {
        PipelineStep::new(format!("step {}", index), move |ctx: &mut Trace| {
            Box::pin(async move {
                ctx.ran.push(index);
                Err(StackError::Config("boom".to_string()))
            })
        })
    }

    fn counting_cleanup(pipeline: Pipeline<Trace>) -> Pipeline<Trace> {
        pipeline.on_abort(|ctx: &mut Trace| {
            Box::pin(async move {
                ctx.cleanups += 1;
            })
        })
    }

    #[tokio::test]
    async fn test_skipped_step_never_runs_and_later_steps_do() {
        let mut pipeline = Pipeline::new("bootstrap")
            .step(recording(1))
            .step(recording(2))
            .step(recording(3).skip_if(|ctx: &mut Trace| {
                Box::pin(async move {
                    ctx.skip_checks += 1;
                    Ok(true)
                })
            }))
            .step(recording(4))
            .step(recording(5).skip_if(|_| Box::pin(async { Ok(false) })));
        let mut trace = Trace::default();

        let report = pipeline.run(&mut trace).await.unwrap();

        assert_eq!(trace.ran, vec![1, 2, 4, 5]);
        assert_eq!(trace.skip_checks, 1);
        assert_eq!(report.state, PipelineState::Completed);
        assert_eq!(report.skipped(), vec!["step 3"]);
        assert_eq!(report.executed().len(), 4);
        assert_eq!(pipeline.state(), PipelineState::Completed);
    }

    #[tokio::test]
    async fn test_failure_stops_pipeline_and_runs_cleanup() {
        let mut pipeline = counting_cleanup(
            Pipeline::new("bootstrap")
                .step(recording(1))
                .step(failing(2))
                .step(recording(3))
                .step(recording(4)),
        );
        let mut trace = Trace::default();

        let err = pipeline.run(&mut trace).await.unwrap_err();

        assert_eq!(trace.ran, vec![1, 2]);
        assert_eq!(trace.cleanups, 1);
        assert_eq!(pipeline.state(), PipelineState::Aborted);
        match err {
            StackError::StepFailure { index, title, source } => {
                assert_eq!(index, 2);
                assert_eq!(title, "step 2");
                assert!(matches!(*source, StackError::Config(_)));
            }
            other => panic!("unexpected error: {}", other),
        }
        assert_eq!(pipeline.report().executed(), vec!["step 1"]);
    }

    #[tokio::test]
    async fn test_skip_check_error_aborts() {
        let mut pipeline = counting_cleanup(Pipeline::new("bootstrap").step(
            recording(1).skip_if(|_| {
                Box::pin(async { Err(StackError::External(anyhow::anyhow!("rpc down"))) })
            }),
        ));
        let mut trace = Trace::default();

        let err = pipeline.run(&mut trace).await.unwrap_err();

        assert!(trace.ran.is_empty());
        assert_eq!(trace.cleanups, 1);
        assert!(matches!(err, StackError::StepFailure { index: 1, .. }));
    }

    #[tokio::test]
    async fn test_kill_between_steps() {
        let kill = KillSwitch::new();
        let trigger = kill.clone();
        let mut pipeline = counting_cleanup(
            Pipeline::new("bootstrap")
                .with_kill_switch(kill)
                .step(PipelineStep::new("arm kill", move |ctx: &mut Trace| {
                    trigger.trigger();
                    Box::pin(async move {
                        ctx.ran.push(1);
                        Ok(())
                    })
                }))
                .step(recording(2)),
        );
        let mut trace = Trace::default();

        let err = pipeline.run(&mut trace).await.unwrap_err();

        assert!(err.is_killed());
        assert_eq!(trace.ran, vec![1]);
        assert_eq!(trace.cleanups, 1);
        assert_eq!(pipeline.state(), PipelineState::Aborted);
    }

    #[tokio::test]
    async fn test_kill_during_last_step_aborts() {
        let kill = KillSwitch::new();
        let trigger = kill.clone();
        let mut pipeline = counting_cleanup(
            Pipeline::new("bootstrap")
                .with_kill_switch(kill)
                .step(PipelineStep::new("only step", move |ctx: &mut Trace| {
                    trigger.trigger();
                    Box::pin(async move {
                        ctx.ran.push(1);
                        Ok(())
                    })
                })),
        );
        let mut trace = Trace::default();

        let err = pipeline.run(&mut trace).await.unwrap_err();

        assert!(err.is_killed());
        assert_eq!(trace.ran, vec![1]);
        assert_eq!(trace.cleanups, 1);
        assert_eq!(pipeline.state(), PipelineState::Aborted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_kill_interrupts_running_step() {
        let kill = KillSwitch::new();
        let trigger = kill.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            trigger.trigger();
        });
        let mut pipeline = counting_cleanup(
            Pipeline::new("bootstrap")
                .with_kill_switch(kill)
                .step(PipelineStep::new("long wait", |ctx: &mut Trace| {
                    Box::pin(async move {
                        tokio::time::sleep(Duration::from_secs(600)).await;
                        ctx.ran.push(1);
                        Ok(())
                    })
                }))
                .step(recording(2)),
        );
        let mut trace = Trace::default();
        let started = Instant::now();

        let err = pipeline.run(&mut trace).await.unwrap_err();

        assert!(matches!(err, StackError::Killed(ref at) if at == "bootstrap at step 1"));
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(trace.ran.is_empty());
        assert_eq!(trace.cleanups, 1);
        assert!(pipeline.report().steps.is_empty());
    }

    #[tokio::test]
    async fn test_runs_once() {
        let runs = Arc::new(AtomicUsize::new(0));
        let counter = runs.clone();
        let mut pipeline = Pipeline::new("bootstrap").step(PipelineStep::new(
            "count",
            move |_: &mut Trace| {
                counter.fetch_add(1, Ordering::SeqCst);
                Box::pin(async { Ok(()) })
            },
        ));
        let mut trace = Trace::default();

        pipeline.run(&mut trace).await.unwrap();
        let err = pipeline.run(&mut trace).await.unwrap_err();

        assert!(matches!(err, StackError::AlreadyRun(ref state) if state == "Completed"));
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_pipeline_completes() {
        let mut pipeline: Pipeline<Trace> = Pipeline::new("empty");
        assert!(pipeline.is_empty());

        let report = pipeline.run(&mut Trace::default()).await.unwrap();

        assert_eq!(report.state, PipelineState::Completed);
        assert!(report.steps.is_empty());
    }
}
