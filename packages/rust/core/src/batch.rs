//! Sequential batch execution with partial-failure handling.

use std::sync::Arc;
use std::time::Duration;

use pencraft_shared::{BatchConfig, ErrorKind, JobResult, JobSpec};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::pipeline::{JobContext, Pipeline, ProgressObserver};

#[derive(Debug, Clone)]
pub struct BatchOptions {
    /// Pause between consecutive jobs.
    pub delay: Duration,
    /// Keep going after a failed job.
    pub skip_on_error: bool,
}

impl BatchOptions {
    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            delay: Duration::from_secs_f64(config.delay_seconds.max(0.0)),
            skip_on_error: config.skip_on_error,
        }
    }
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            delay: Duration::ZERO,
            skip_on_error: true,
        }
    }
}

/// Outcome of a whole batch. `results` is in submission order.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub submitted: usize,
    pub results: Vec<JobResult>,
    pub elapsed: Duration,
    /// The batch stopped because cancellation was requested.
    pub cancelled: bool,
}

impl BatchReport {
    pub fn attempted(&self) -> usize {
        self.results.len()
    }

    pub fn succeeded(&self) -> usize {
        self.results.iter().filter(|r| r.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.attempted() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobResult> {
        self.results.iter().filter(|r| !r.is_success())
    }

    /// Jobs that succeeded under the minimum word count.
    pub fn shortfalls(&self) -> impl Iterator<Item = &JobResult> {
        self.results.iter().filter(|r| r.shortfall.is_some())
    }

    /// Words before the run, summed over successful jobs (zero for generation).
    pub fn words_before(&self) -> usize {
        self.results
            .iter()
            .filter(|r| r.is_success())
            .filter_map(|r| r.original_word_count)
            .sum()
    }

    pub fn words_after(&self) -> usize {
        self.results.iter().filter_map(JobResult::word_count).sum()
    }

    pub fn word_delta(&self) -> i64 {
        self.words_after() as i64 - self.words_before() as i64
    }
}

/// Run `jobs` one after another through `pipeline`.
///
/// Cancellation is checked before every job and interrupts the inter-job
/// delay. A failed job stops the batch unless `skip_on_error` is set.
#[instrument(skip_all, fields(jobs = jobs.len()))]
pub async fn run_batch(
    pipeline: &dyn Pipeline,
    jobs: &[JobSpec],
    options: &BatchOptions,
    observer: Arc<dyn ProgressObserver>,
    cancel: &CancellationToken,
) -> BatchReport {
    let start = Instant::now();
    let mut results: Vec<JobResult> = Vec::with_capacity(jobs.len());
    let mut cancelled = false;

    for (index, job) in jobs.iter().enumerate() {
        if cancel.is_cancelled() {
            cancelled = true;
            break;
        }
        if index > 0 && !options.delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                _ = tokio::time::sleep(options.delay) => {}
            }
        }

        observer.on_progress(index, &format!("starting {}", job.source));
        let ctx = JobContext {
            index,
            observer: observer.clone(),
            cancel: cancel.clone(),
        };
        let result = pipeline.run(job, &ctx).await;
        let error_kind = result.error.as_ref().map(|e| e.kind);
        results.push(result);

        match error_kind {
            None => {}
            Some(ErrorKind::Cancelled) => {
                cancelled = true;
                break;
            }
            Some(kind) if !options.skip_on_error => {
                warn!(index, %kind, "job failed, stopping batch");
                break;
            }
            Some(kind) => warn!(index, %kind, "job failed, continuing"),
        }
    }

    let report = BatchReport {
        submitted: jobs.len(),
        results,
        elapsed: start.elapsed(),
        cancelled,
    };
    info!(
        submitted = report.submitted,
        attempted = report.attempted(),
        succeeded = report.succeeded(),
        failed = report.failed(),
        cancelled = report.cancelled,
        elapsed_ms = report.elapsed.as_millis() as u64,
        "batch finished"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{Generator, GeneratorSettings, SilentObserver};
    use crate::testing::{
        MemoryStorage, RecordingObserver, ScriptedCompletion, StaticSearch, capabilities,
        fake_answer, topic_job,
    };
    use async_trait::async_trait;
    use pencraft_shared::{ArticleRef, Capability, PencraftError};
    use std::sync::Mutex;

    /// Succeeds or fails per job index; optionally cancels after a given job.
    struct ScriptedPipeline {
        fail: Vec<usize>,
        cancel_after: Option<(usize, CancellationToken)>,
        seen: Mutex<Vec<usize>>,
    }

    impl ScriptedPipeline {
        fn new(fail: &[usize]) -> Self {
            Self {
                fail: fail.to_vec(),
                cancel_after: None,
                seen: Mutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<usize> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Pipeline for ScriptedPipeline {
        async fn run(&self, job: &JobSpec, ctx: &JobContext) -> JobResult {
            self.seen.lock().unwrap().push(ctx.index);
            if let Some((index, token)) = &self.cancel_after {
                if *index == ctx.index {
                    token.cancel();
                }
            }
            if self.fail.contains(&ctx.index) {
                let err = PencraftError::Writing("boom".into());
                return JobResult::failure(job, &err, "planning");
            }
            JobResult::success(
                job,
                ArticleRef {
                    path: format!("out/{}.md", ctx.index).into(),
                    title: format!("Job {}", ctx.index),
                    word_count: 1000 + ctx.index,
                },
                None,
                None,
            )
        }
    }

    fn jobs(n: usize) -> Vec<JobSpec> {
        (0..n).map(|i| topic_job(&format!("Topic {i}"))).collect()
    }

    async fn run(pipeline: &dyn Pipeline, n: usize, options: BatchOptions) -> BatchReport {
        run_batch(pipeline, &jobs(n), &options, Arc::new(SilentObserver), &CancellationToken::new()).await
    }

    #[tokio::test]
    async fn accounting_adds_up() {
        for (fail, skip) in [(vec![], true), (vec![1], true), (vec![0, 2], true), (vec![1], false)] {
            let pipeline = ScriptedPipeline::new(&fail);
            let options = BatchOptions {
                skip_on_error: skip,
                ..BatchOptions::default()
            };
            let report = run(&pipeline, 4, options).await;
            assert_eq!(report.succeeded() + report.failed(), report.attempted());
            assert!(report.attempted() <= report.submitted);
            assert_eq!(report.failures().count(), report.failed());
        }
    }

    #[tokio::test]
    async fn stops_at_first_failure_without_skip() {
        let pipeline = ScriptedPipeline::new(&[1]);
        let options = BatchOptions {
            skip_on_error: false,
            ..BatchOptions::default()
        };
        let report = run(&pipeline, 3, options).await;
        assert_eq!(report.attempted(), 2);
        assert_eq!(report.submitted, 3);
        assert_eq!(pipeline.seen(), vec![0, 1]);
        assert!(!report.cancelled);
    }

    #[tokio::test]
    async fn results_keep_submission_order() {
        let pipeline = ScriptedPipeline::new(&[2]);
        let jobs = jobs(4);
        let report = run_batch(
            &pipeline,
            &jobs,
            &BatchOptions::default(),
            Arc::new(SilentObserver),
            &CancellationToken::new(),
        )
        .await;
        let ids: Vec<_> = report.results.iter().map(|r| r.job_id.clone()).collect();
        let expected: Vec<_> = jobs.iter().map(|j| j.id.clone()).collect();
        assert_eq!(ids, expected);
        assert_eq!(report.words_after(), 1000 + 1001 + 1003);
        assert_eq!(report.word_delta(), 3004);
    }

    #[tokio::test]
    async fn cancelled_before_start_runs_nothing() {
        let pipeline = ScriptedPipeline::new(&[]);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = run_batch(
            &pipeline,
            &jobs(3),
            &BatchOptions::default(),
            Arc::new(SilentObserver),
            &cancel,
        )
        .await;
        assert_eq!(report.attempted(), 0);
        assert!(report.cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_delay() {
        let cancel = CancellationToken::new();
        let mut pipeline = ScriptedPipeline::new(&[]);
        pipeline.cancel_after = Some((0, cancel.clone()));
        let options = BatchOptions {
            delay: Duration::from_secs(3600),
            skip_on_error: true,
        };
        let report = run_batch(&pipeline, &jobs(3), &options, Arc::new(SilentObserver), &cancel).await;
        assert_eq!(report.attempted(), 1);
        assert!(report.cancelled);
        assert!(report.elapsed < Duration::from_secs(3600));
    }

    #[tokio::test(start_paused = true)]
    async fn delay_separates_jobs() {
        let pipeline = ScriptedPipeline::new(&[]);
        let options = BatchOptions {
            delay: Duration::from_secs(2),
            skip_on_error: true,
        };
        let report = run(&pipeline, 3, options).await;
        assert_eq!(report.attempted(), 3);
        assert!(report.elapsed >= Duration::from_secs(4));
    }

    #[tokio::test]
    async fn observer_sees_job_starts() {
        let observer = Arc::new(RecordingObserver::default());
        let pipeline = ScriptedPipeline::new(&[]);
        run_batch(
            &pipeline,
            &jobs(2),
            &BatchOptions::default(),
            observer.clone(),
            &CancellationToken::new(),
        )
        .await;
        assert_eq!(
            observer.events(),
            vec![
                (0, "starting Topic 0".to_string()),
                (1, "starting Topic 1".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn three_topics_with_second_failing() {
        // Every completion mentioning the second topic fails.
        let completion = ScriptedCompletion::new(|prompt, _| {
            if prompt.contains("Topic Two") {
                Err(PencraftError::unavailable(Capability::Completion, "503"))
            } else {
                Ok(fake_answer(prompt, 1.0))
            }
        });
        let storage = Arc::new(MemoryStorage::default());
        let caps = capabilities(Arc::new(completion), Arc::new(StaticSearch::empty()), storage.clone());
        let generator = Generator::new(caps, GeneratorSettings::default());
        let jobs = vec![topic_job("Topic One"), topic_job("Topic Two"), topic_job("Topic Three")];

        let report = run_batch(
            &generator,
            &jobs,
            &BatchOptions::default(),
            Arc::new(SilentObserver),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(report.attempted(), 3);
        assert_eq!(report.succeeded(), 2);
        assert_eq!(report.failed(), 1);
        let failure = report.failures().next().unwrap();
        assert_eq!(failure.job_id, jobs[1].id);
        assert_eq!(failure.error.as_ref().unwrap().kind, ErrorKind::WritingError);
        assert!(report.results[0].is_success());
        assert!(report.results[2].is_success());
    }
}
