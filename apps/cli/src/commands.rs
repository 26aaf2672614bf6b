//! CLI command definitions, routing, and tracing setup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use pencraft_core::{
    BatchOptions, BatchReport, Capabilities, Enhancer, EnhancerSettings, Generator,
    GeneratorSettings, Pipeline, ResearchOptions, RetryPolicy, load_topics, run_batch,
};
use pencraft_llm::{ChatClient, ChatOptions};
use pencraft_scrape::{PageScraper, ScrapeOptions};
use pencraft_search::{SearxClient, TrendClient};
use pencraft_shared::{AppConfig, JobSource, JobSpec, init_config, load_config, load_config_from};
use pencraft_storage::{FsStorage, discover_documents};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::progress::CliProgress;

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// pencraft — research, write and enhance long-form technical articles.
#[derive(Parser)]
#[command(
    name = "pencraft",
    version,
    about = "Generate and enhance long-form technical blog posts with an LLM pipeline.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file to use instead of ~/.pencraft/pencraft.toml.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Word band overrides shared by every pipeline command.
#[derive(Args, Debug, Clone, Default)]
pub(crate) struct BandArgs {
    /// Minimum acceptable word count.
    #[arg(long)]
    pub min_words: Option<usize>,

    /// Maximum acceptable word count.
    #[arg(long)]
    pub max_words: Option<usize>,

    /// Skip web research and trend lookups.
    #[arg(long)]
    pub no_research: bool,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Generate one article about a topic.
    Generate {
        /// Article topic.
        topic: String,

        /// Target word count (defaults to the band minimum).
        #[arg(short, long)]
        words: Option<usize>,

        /// Tags to include (comma-separated).
        #[arg(long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Categories to include (comma-separated).
        #[arg(long, value_delimiter = ',')]
        categories: Vec<String>,

        /// Cover image path or URL for the front matter.
        #[arg(long)]
        cover_image: Option<String>,

        /// Extra instructions for planning and writing (audience, tone, ...).
        #[arg(long)]
        context: Option<String>,

        /// Directory the article is written to.
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Leave out citations and the references section.
        #[arg(long)]
        no_citations: bool,

        /// Do not ask the model for tags and categories.
        #[arg(long)]
        no_tags: bool,

        /// Leave out the table of contents.
        #[arg(long)]
        no_toc: bool,

        #[command(flatten)]
        band: BandArgs,
    },

    /// Generate one article per entry of a `[[topics]]` TOML file.
    Batch {
        /// Topics file.
        topics: PathBuf,

        /// Directory articles are written to.
        #[arg(short, long, default_value = ".")]
        out: PathBuf,

        /// Seconds to wait between jobs (overrides config).
        #[arg(long)]
        delay: Option<f64>,

        /// Stop at the first failed job.
        #[arg(long)]
        stop_on_error: bool,

        #[command(flatten)]
        band: BandArgs,
    },

    /// Enhance an existing article, or every matching article in a directory.
    Enhance {
        /// Markdown file or directory.
        path: PathBuf,

        /// File name pattern used when `path` is a directory.
        #[arg(long, default_value = "*.md")]
        pattern: String,

        /// Descend into subdirectories.
        #[arg(short, long)]
        recursive: bool,

        /// Overwrite without writing a `.bak` copy first.
        #[arg(long)]
        no_backup: bool,

        /// Leave front matter untouched.
        #[arg(long)]
        no_seo: bool,

        /// Stop at the first failed file.
        #[arg(long)]
        stop_on_error: bool,

        #[command(flatten)]
        band: BandArgs,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "pencraft=info",
        1 => "pencraft=debug",
        _ => "pencraft=trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt()
                .with_env_filter(env_filter)
                .with_target(false)
                .with_writer(std::io::stderr)
                .init();
        }
        LogFormat::Json => {
            fmt()
                .json()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.clone();
    let load = || -> Result<AppConfig> {
        let config = match &config_path {
            Some(path) => load_config_from(path)?,
            None => load_config()?,
        };
        Ok(config)
    };

    match cli.command {
        Command::Generate {
            topic,
            words,
            tags,
            categories,
            cover_image,
            context,
            out,
            no_citations,
            no_tags,
            no_toc,
            band,
        } => {
            let config = apply_band(load()?, &band)?;
            let mut job = JobSpec::new(JobSource::Topic(topic), &config);
            if let Some(words) = words {
                job.target_word_count = words;
            }
            job.tags = tags;
            job.categories = categories;
            job.cover_image = cover_image;
            job.additional_context = context;
            job.output_dir = out;
            job.flags.use_research = !band.no_research;
            job.flags.include_citations &= !no_citations;
            job.flags.suggest_tags &= !no_tags;
            job.flags.include_toc &= !no_toc;
            job.validate()?;

            let generator = generator(&config)?;
            let options = BatchOptions::from_config(&config.batch);
            let report = execute(&generator, vec![job], &options).await;
            summarize(&report, false)
        }
        Command::Batch {
            topics,
            out,
            delay,
            stop_on_error,
            band,
        } => {
            let config = apply_band(load()?, &band)?;
            let jobs: Vec<JobSpec> = load_topics(&topics)?
                .into_iter()
                .map(|entry| {
                    let mut job = entry.into_job(&config, &out);
                    job.flags.use_research = !band.no_research;
                    job
                })
                .collect();
            for job in &jobs {
                job.validate()?;
            }
            info!(jobs = jobs.len(), topics = %topics.display(), "starting generation batch");

            let mut options = BatchOptions::from_config(&config.batch);
            if let Some(delay) = delay {
                options.delay = Duration::from_secs_f64(delay.max(0.0));
            }
            options.skip_on_error &= !stop_on_error;

            let generator = generator(&config)?;
            let report = execute(&generator, jobs, &options).await;
            summarize(&report, false)
        }
        Command::Enhance {
            path,
            pattern,
            recursive,
            no_backup,
            no_seo,
            stop_on_error,
            band,
        } => {
            let config = apply_band(load()?, &band)?;
            let files = enhancement_targets(&path, &pattern, recursive)?;
            if files.is_empty() {
                return Err(eyre!("no files matching '{pattern}' under {}", path.display()));
            }
            let jobs: Vec<JobSpec> = files
                .into_iter()
                .map(|file| {
                    let mut job = JobSpec::new(JobSource::File(file), &config);
                    job.flags.use_research = !band.no_research;
                    job.flags.create_backup = !no_backup;
                    job.flags.improve_seo = !no_seo;
                    job
                })
                .collect();
            info!(files = jobs.len(), path = %path.display(), "starting enhancement batch");

            let mut options = BatchOptions::from_config(&config.batch);
            options.skip_on_error &= !stop_on_error;

            let enhancer = Enhancer::new(
                capabilities(&config)?,
                EnhancerSettings {
                    max_expansion_attempts: config.blog.max_expansion_attempts,
                },
            );
            let report = execute(&enhancer, jobs, &options).await;
            summarize(&report, true)
        }
        Command::Config { action } => match action {
            ConfigAction::Init => cmd_config_init(),
            ConfigAction::Show => cmd_config_show(load()?),
        },
    }
}

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// Command-line band overrides win over the config file.
fn apply_band(mut config: AppConfig, band: &BandArgs) -> Result<AppConfig> {
    if let Some(min) = band.min_words {
        config.blog.min_word_count = min;
    }
    if let Some(max) = band.max_words {
        config.blog.max_word_count = max;
    }
    config.validate()?;
    Ok(config)
}

/// Concrete adapters behind the capability ports.
fn capabilities(config: &AppConfig) -> Result<Capabilities> {
    let timeout = config.retry.timeout_secs;
    let chat = ChatClient::new(ChatOptions::from_config(&config.llm, timeout)?)?;
    let search = SearxClient::new(&config.research.search_endpoint, timeout)?;
    let scraper = PageScraper::new(ScrapeOptions::default())?;

    let mut caps = Capabilities::new(Arc::new(chat), Arc::new(search), Arc::new(FsStorage::new()))
        .with_scrape(Arc::new(scraper))
        .with_retry(RetryPolicy::from_config(&config.retry))
        .with_generation(config.llm.max_tokens, config.llm.temperature);
    if let Some(endpoint) = &config.research.trends_endpoint {
        caps = caps.with_trends(Arc::new(TrendClient::new(endpoint, timeout)?));
    }
    Ok(caps)
}

fn generator(config: &AppConfig) -> Result<Generator> {
    let settings = GeneratorSettings {
        research: ResearchOptions::from_config(&config.research),
        max_expansion_attempts: config.blog.max_expansion_attempts,
        format: config.frontmatter.format,
    };
    Ok(Generator::new(capabilities(config)?, settings))
}

fn enhancement_targets(path: &Path, pattern: &str, recursive: bool) -> Result<Vec<PathBuf>> {
    if path.is_file() {
        return Ok(vec![path.to_path_buf()]);
    }
    Ok(discover_documents(path, pattern, recursive)?)
}

/// Run jobs with a progress display; Ctrl-C cancels at the next stage boundary.
async fn execute(pipeline: &dyn Pipeline, jobs: Vec<JobSpec>, options: &BatchOptions) -> BatchReport {
    let cancel = CancellationToken::new();
    let interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current stage");
            interrupt.cancel();
        }
    });

    let progress = Arc::new(CliProgress::new(jobs.len()));
    let report = run_batch(pipeline, &jobs, options, progress.clone(), &cancel).await;
    progress.finish();
    report
}

// ---------------------------------------------------------------------------
// Output
// ---------------------------------------------------------------------------

fn summarize(report: &BatchReport, enhancement: bool) -> Result<()> {
    println!();
    for result in &report.results {
        match (&result.article, &result.error) {
            (Some(article), _) => {
                let delta = match result.original_word_count {
                    Some(before) => format!(" ({before} -> {})", article.word_count),
                    None => String::new(),
                };
                println!(
                    "  ok      {}  {} words{delta}",
                    article.path.display(),
                    article.word_count
                );
                if let Some(short) = &result.shortfall {
                    println!(
                        "          short of the {} word minimum by {}",
                        short.min_words,
                        short.min_words - short.actual_words
                    );
                }
            }
            (None, Some(error)) => {
                println!("  failed  {}  [{}] {}", result.source, error.kind, error.detail);
                println!("          last stage: {}", error.last_stage);
            }
            (None, None) => {}
        }
    }

    println!();
    println!("  Submitted: {}", report.submitted);
    println!("  Attempted: {}", report.attempted());
    println!("  Succeeded: {}", report.succeeded());
    println!("  Failed:    {}", report.failed());
    if enhancement {
        println!(
            "  Words:     {} -> {} ({:+})",
            report.words_before(),
            report.words_after(),
            report.word_delta()
        );
    } else {
        println!("  Words:     {}", report.words_after());
    }
    println!("  Time:      {:.1}s", report.elapsed.as_secs_f64());
    if report.cancelled {
        println!("  Cancelled before all jobs ran.");
    }
    println!();

    if report.failed() > 0 {
        return Err(eyre!("{} of {} jobs failed", report.failed(), report.attempted()));
    }
    if report.cancelled {
        return Err(eyre!("cancelled"));
    }
    Ok(())
}

fn cmd_config_init() -> Result<()> {
    let path = init_config()?;
    println!("Config initialized at: {}", path.display());
    Ok(())
}

fn cmd_config_show(config: AppConfig) -> Result<()> {
    let toml_str = toml::to_string_pretty(&config)?;
    println!("{toml_str}");
    Ok(())
}
