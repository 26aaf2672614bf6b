//! Per-job orchestration: the generation state machine and the pieces both
//! orchestrators share (progress observer, cancellation, stage tracking).

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{Local, NaiveDate};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use pencraft_shared::{
    ArticleRef, FrontMatterFormat, JobResult, JobSpec, PencraftError, ResearchBundle, Result,
    Shortfall,
};

use crate::assembler::assemble;
use crate::capabilities::Capabilities;
use crate::planner::plan;
use crate::research::{ResearchOptions, research};
use crate::writer::{WriteOptions, write};

// ---------------------------------------------------------------------------
// Progress & context
// ---------------------------------------------------------------------------

/// Receives a notification after every stage transition.
///
/// Purely a side channel: implementations must not influence control flow.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, job_index: usize, message: &str);
}

/// No-op observer for headless/test usage.
pub struct SilentObserver;

impl ProgressObserver for SilentObserver {
    fn on_progress(&self, _job_index: usize, _message: &str) {}
}

/// What a pipeline needs from its caller for one job.
#[derive(Clone)]
pub struct JobContext {
    /// Position of the job in its batch.
    pub index: usize,
    pub observer: Arc<dyn ProgressObserver>,
    pub cancel: CancellationToken,
}

impl JobContext {
    /// A context for a single job outside any batch.
    pub fn standalone() -> Self {
        Self {
            index: 0,
            observer: Arc::new(SilentObserver),
            cancel: CancellationToken::new(),
        }
    }
}

/// One orchestrator run per job. Never fails: errors end up in the result.
#[async_trait]
pub trait Pipeline: Send + Sync {
    async fn run(&self, job: &JobSpec, ctx: &JobContext) -> JobResult;
}

/// Forward-only stage bookkeeping shared by both state machines.
pub(crate) struct StageTracker<'a, S> {
    ctx: &'a JobContext,
    current: S,
    last_completed: S,
}

impl<'a, S: Copy + fmt::Display> StageTracker<'a, S> {
    pub(crate) fn new(ctx: &'a JobContext, initial: S) -> Self {
        Self {
            ctx,
            current: initial,
            last_completed: initial,
        }
    }

    /// Move to `next`, failing with `Cancelled` if cancellation was requested.
    pub(crate) fn advance(&mut self, next: S) -> Result<()> {
        if self.ctx.cancel.is_cancelled() {
            return Err(PencraftError::Cancelled(format!(
                "cancelled before {next} (after {})",
                self.current
            )));
        }
        self.enter(next);
        Ok(())
    }

    /// Terminal transition; not subject to cancellation.
    pub(crate) fn finish(&mut self, terminal: S) {
        self.enter(terminal);
    }

    fn enter(&mut self, next: S) {
        debug!(from = %self.current, to = %next, "stage transition");
        self.last_completed = self.current;
        self.current = next;
        self.ctx.observer.on_progress(self.ctx.index, &next.to_string());
    }

    pub(crate) fn current(&self) -> S {
        self.current
    }

    /// The stage the job had finished when it failed.
    pub(crate) fn last_completed(&self) -> S {
        self.last_completed
    }

    pub(crate) fn notify(&self, message: &str) {
        self.ctx.observer.on_progress(self.ctx.index, message);
    }
}

/// Result shortfall when the final count is under the band minimum.
pub(crate) fn shortfall(job: &JobSpec, words: usize) -> Option<Shortfall> {
    (words < job.word_band.min).then_some(Shortfall {
        min_words: job.word_band.min,
        actual_words: words,
    })
}

// ---------------------------------------------------------------------------
// Generation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationState {
    Init,
    Researching,
    Planning,
    Writing,
    Assembling,
    Persisting,
    Done,
    Failed,
}

impl fmt::Display for GenerationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Init => "init",
            Self::Researching => "researching",
            Self::Planning => "planning",
            Self::Writing => "writing",
            Self::Assembling => "assembling",
            Self::Persisting => "persisting",
            Self::Done => "done",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub research: ResearchOptions,
    pub max_expansion_attempts: u32,
    pub format: FrontMatterFormat,
}

impl Default for GeneratorSettings {
    fn default() -> Self {
        Self {
            research: ResearchOptions::default(),
            max_expansion_attempts: 3,
            format: FrontMatterFormat::Yaml,
        }
    }
}

/// Drives one topic through research, planning, writing and assembly.
pub struct Generator {
    caps: Capabilities,
    settings: GeneratorSettings,
    date: Option<NaiveDate>,
}

impl Generator {
    pub fn new(caps: Capabilities, settings: GeneratorSettings) -> Self {
        Self {
            caps,
            settings,
            date: None,
        }
    }

    /// Fix the article date instead of using the local clock.
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    /// Same generator with port calls bound to one job's cancellation token.
    fn scoped(&self, cancel: &CancellationToken) -> Self {
        Self {
            caps: self.caps.clone().with_cancel(cancel.clone()),
            settings: self.settings.clone(),
            date: self.date,
        }
    }

    async fn execute(
        &self,
        job: &JobSpec,
        tracker: &mut StageTracker<'_, GenerationState>,
    ) -> Result<JobResult> {
        job.validate()?;
        let topic = job
            .topic()
            .ok_or_else(|| PencraftError::validation("generation job needs a topic"))?;

        tracker.advance(GenerationState::Researching)?;
        let bundle = if !job.flags.use_research {
            debug!("research disabled for job");
            ResearchBundle::default()
        } else {
            match research(&self.caps, topic, &self.settings.research).await {
                Ok(bundle) => bundle,
                Err(PencraftError::ResearchUnavailable(detail)) => {
                    warn!(%detail, "research unavailable, continuing from topic alone");
                    tracker.notify("research unavailable, continuing without sources");
                    ResearchBundle::default()
                }
                Err(e) => return Err(e),
            }
        };

        tracker.advance(GenerationState::Planning)?;
        let outline = plan(
            &self.caps,
            topic,
            &bundle,
            job.target_word_count,
            job.additional_context.as_deref(),
        )
        .await?;

        tracker.advance(GenerationState::Writing)?;
        let options = WriteOptions {
            band: job.word_band,
            max_expansion_attempts: self.settings.max_expansion_attempts,
            include_citations: job.flags.include_citations,
            additional_context: job.additional_context.clone(),
        };
        let report = write(&self.caps, topic, &outline, &bundle, &options).await?;

        tracker.advance(GenerationState::Assembling)?;
        let today = self.date.unwrap_or_else(|| Local::now().date_naive());
        let article = assemble(&self.caps, &report.draft, &bundle, job, self.settings.format, today).await?;

        tracker.advance(GenerationState::Persisting)?;
        self.caps.write(&article.path, &article.document).await?;

        let shortfall = shortfall(job, article.word_count);
        if let Some(short) = &shortfall {
            warn!(
                words = short.actual_words,
                min = short.min_words,
                "article finished under the minimum word count"
            );
        }
        Ok(JobResult::success(
            job,
            ArticleRef {
                path: article.path,
                title: article.front_matter.title,
                word_count: article.word_count,
            },
            None,
            shortfall,
        ))
    }
}

#[async_trait]
impl Pipeline for Generator {
    #[instrument(skip_all, fields(job = %job.id, source = %job.source))]
    async fn run(&self, job: &JobSpec, ctx: &JobContext) -> JobResult {
        let start = Instant::now();
        let mut tracker = StageTracker::new(ctx, GenerationState::Init);
        match self.scoped(&ctx.cancel).execute(job, &mut tracker).await {
            Ok(result) => {
                tracker.finish(GenerationState::Done);
                info!(
                    words = result.word_count().unwrap_or_default(),
                    elapsed_ms = start.elapsed().as_millis() as u64,
                    "generation complete"
                );
                result
            }
            Err(e) => {
                let failed_in = tracker.current();
                let last = tracker.last_completed();
                tracker.finish(GenerationState::Failed);
                warn!(stage = %failed_in, kind = %e.kind(), error = %e, "generation failed");
                JobResult::failure(job, &e, last.to_string())
            }
        }
    }
}
