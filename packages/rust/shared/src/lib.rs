//! Shared types, error model, ports, and configuration for Pencraft.
//!
//! This crate is the foundation depended on by all other Pencraft crates.
//! It provides:
//! - [`PencraftError`], the unified error type
//! - Domain types ([`JobSpec`], [`Outline`], [`Draft`], [`Article`], [`JobResult`])
//! - Capability ports ([`Completion`], [`Search`], [`Scrape`], [`TrendLookup`], [`Storage`])
//! - Configuration ([`AppConfig`] and config loading)

pub mod config;
pub mod error;
pub mod ports;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, BatchConfig, BlogConfig, FrontMatterConfig, FrontMatterFormat, LlmConfig,
    ResearchConfig, RetryConfig, config_dir, config_file_path, init_config, load_config,
    load_config_from, resolve_api_key,
};
pub use error::{Capability, ErrorKind, PencraftError, Result};
pub use ports::{Completion, CompletionRequest, Scrape, Search, Storage, TrendLookup};
pub use types::{
    Article, ArticleRef, Citation, Draft, DraftSection, FrontMatter, JobError, JobFlags, JobId,
    JobResult, JobSource, JobSpec, Outline, OutlineSection, ResearchBundle, SearchHit,
    SectionKind, Shortfall, Source, TrendKeyword, TrendSignal, WordBand,
};
