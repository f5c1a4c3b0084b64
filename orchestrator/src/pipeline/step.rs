//! Pipeline steps: a title, an optional skip check and a task, all run against a shared context.

use crate::error::StackResult;
use futures::future::BoxFuture;
use std::fmt;

/// Task body of a step.
pub type StepTask<C> =
    Box<dyn for<'a> Fn(&'a mut C) -> BoxFuture<'a, StackResult<()>> + Send + Sync>;

/// Skip check of a step. `Ok(true)` means the work is already done.
pub type SkipCheck<C> =
    Box<dyn for<'a> Fn(&'a mut C) -> BoxFuture<'a, StackResult<bool>> + Send + Sync>;

/// One named, optionally skippable unit of work.
///
/// ```rust,ignore
/// let step = PipelineStep::new("Register worker", |ctx: &mut SetupContext| {
///     Box::pin(register_worker(ctx))
/// })
/// .skip_if(|ctx| Box::pin(worker_registered(ctx)));
/// ```
pub struct PipelineStep<C> {
    title: String,
    skip: Option<SkipCheck<C>>,
    task: StepTask<C>,
}

impl<C> PipelineStep<C> {
    /// Step that always runs `task`.
    pub fn new<F>(title: impl Into<String>, task: F) -> Self
    where
        F: for<'a> Fn(&'a mut C) -> BoxFuture<'a, StackResult<()>> + Send + Sync + 'static,
    {
        Self {
            title: title.into(),
            skip: None,
            task: Box::new(task),
        }
    }

    /// Skip the task whenever `check` resolves to true.
    pub fn skip_if<F>(mut self, check: F) -> Self
    where
        F: for<'a> Fn(&'a mut C) -> BoxFuture<'a, StackResult<bool>> + Send + Sync + 'static,
    {
        self.skip = Some(Box::new(check));
        self
    }

    /// Step title.
    pub fn title(&self) -> &str {
        &self.title
    }

    /// Whether the step has a skip check.
    pub fn is_skippable(&self) -> bool {
        self.skip.is_some()
    }

    pub(crate) async fn should_skip(&self, ctx: &mut C) -> StackResult<bool> {
        match &self.skip {
            Some(check) => check(ctx).await,
            None => Ok(false),
        }
    }

    pub(crate) async fn run(&self, ctx: &mut C) -> StackResult<()> {
        (self.task)(ctx).await
    }
}

impl<C> fmt::Debug for PipelineStep<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineStep")
            .field("title", &self.title)
            .field("skippable", &self.is_skippable())
            .finish()
    }
}
