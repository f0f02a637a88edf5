//! Forward-only, typed workflow pipelines.
//!
//! A [`Pipeline`] is an ordered chain of [`WorkflowStep`]s where each step
//! receives the previous step's output. The chain is checked at compile time:
//! `then` only accepts a step whose input type is the current output type.
//!
//! Execution stops at the first failing step. The error is wrapped in
//! [`AppError::StepFailed`] carrying the step name, its 1-based position and the
//! names of the steps that already completed. Nothing is rolled back: side
//! effects of completed steps stand, and the completed-step list is what an
//! operator needs to reconcile them.

use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::domain::AppError;

/// A single named unit of work inside a pipeline.
#[async_trait]
pub trait WorkflowStep<C>: Send + Sync + 'static
where
    C: Send + Sync + 'static,
{
    type Input: Send + 'static;
    type Output: Send + 'static;

    /// Name used in logs, metrics and step-failure errors.
    fn name(&self) -> &'static str;

    async fn run(&self, ctx: &C, input: Self::Input) -> Result<Self::Output, AppError>;
}

#[async_trait]
trait Stage<C, I, O>: Send + Sync
where
    C: Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    async fn execute(
        &self,
        ctx: &C,
        input: I,
        completed: &mut Vec<&'static str>,
    ) -> Result<O, AppError>;
}

struct First<S> {
    pipeline: &'static str,
    step: S,
}

#[async_trait]
impl<C, S> Stage<C, S::Input, S::Output> for First<S>
where
    C: Send + Sync + 'static,
    S: WorkflowStep<C>,
{
    async fn execute(
        &self,
        ctx: &C,
        input: S::Input,
        completed: &mut Vec<&'static str>,
    ) -> Result<S::Output, AppError> {
        run_step(self.pipeline, &self.step, 1, ctx, input, completed).await
    }
}

struct Chain<C, I, S>
where
    C: Send + Sync + 'static,
    I: Send + 'static,
    S: WorkflowStep<C>,
{
    pipeline: &'static str,
    prev: Box<dyn Stage<C, I, S::Input>>,
    step: S,
    position: usize,
}

#[async_trait]
impl<C, I, S> Stage<C, I, S::Output> for Chain<C, I, S>
where
    C: Send + Sync + 'static,
    I: Send + 'static,
    S: WorkflowStep<C>,
{
    async fn execute(
        &self,
        ctx: &C,
        input: I,
        completed: &mut Vec<&'static str>,
    ) -> Result<S::Output, AppError> {
        let intermediate = self.prev.execute(ctx, input, completed).await?;
        run_step(
            self.pipeline,
            &self.step,
            self.position,
            ctx,
            intermediate,
            completed,
        )
        .await
    }
}

async fn run_step<C, S>(
    pipeline: &'static str,
    step: &S,
    position: usize,
    ctx: &C,
    input: S::Input,
    completed: &mut Vec<&'static str>,
) -> Result<S::Output, AppError>
where
    C: Send + Sync + 'static,
    S: WorkflowStep<C>,
{
    let name = step.name();
    debug!(pipeline, step = name, position, "Running pipeline step");

    match step.run(ctx, input).await {
        Ok(output) => {
            completed.push(name);
            Ok(output)
        }
        Err(source) => {
            warn!(
                pipeline,
                step = name,
                position,
                completed = ?completed,
                error = %source,
                "Pipeline step failed"
            );
            metrics::counter!(
                "pipeline_step_failures_total",
                "pipeline" => pipeline,
                "step" => name
            )
            .increment(1);
            Err(AppError::StepFailed {
                pipeline,
                step: name,
                position,
                completed: completed.clone(),
                source: Box::new(source),
            })
        }
    }
}

/// An ordered composition of steps from `I` to `O` over a context `C`.
pub struct Pipeline<C, I, O>
where
    C: Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    name: &'static str,
    steps: Vec<&'static str>,
    stage: Box<dyn Stage<C, I, O>>,
}

impl<C, I, O> Pipeline<C, I, O>
where
    C: Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
{
    /// Starts a pipeline with its first step.
    pub fn new<S>(name: &'static str, first: S) -> Self
    where
        S: WorkflowStep<C, Input = I, Output = O>,
    {
        Self {
            name,
            steps: vec![first.name()],
            stage: Box::new(First {
                pipeline: name,
                step: first,
            }),
        }
    }

    /// Appends a step consuming this pipeline's current output.
    #[must_use]
    pub fn then<S>(self, step: S) -> Pipeline<C, I, S::Output>
    where
        S: WorkflowStep<C, Input = O>,
    {
        let mut steps = self.steps;
        steps.push(step.name());
        let position = steps.len();

        Pipeline {
            name: self.name,
            steps,
            stage: Box::new(Chain {
                pipeline: self.name,
                prev: self.stage,
                step,
                position,
            }),
        }
    }

    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Step names in execution order.
    #[must_use]
    pub fn steps(&self) -> &[&'static str] {
        &self.steps
    }

    /// Runs every step in order, stopping at the first failure.
    #[instrument(skip_all, fields(pipeline = self.name))]
    pub async fn run(&self, ctx: &C, input: I) -> Result<O, AppError> {
        let mut completed = Vec::with_capacity(self.steps.len());
        let result = self.stage.execute(ctx, input, &mut completed).await;

        match &result {
            Ok(_) => info!(steps = completed.len(), "Pipeline completed"),
            Err(e) => warn!(
                failed_step = e.failed_step().unwrap_or("unknown"),
                "Pipeline aborted"
            ),
        }

        result
    }
}
