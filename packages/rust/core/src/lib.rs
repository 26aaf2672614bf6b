//! Article pipeline for pencraft.
//!
//! Research, planning, writing and assembly stages, the generation and
//! enhancement orchestrators that sequence them, and the batch runner that
//! drives many jobs unattended. All external effects go through
//! [`Capabilities`].

pub mod assembler;
pub mod batch;
pub mod capabilities;
pub mod citations;
pub mod enhance;
pub mod pipeline;
pub mod planner;
pub mod prompts;
pub mod research;
pub mod retry;
pub mod seo;
pub mod topics;
pub mod writer;

#[cfg(test)]
mod testing;

pub use batch::{BatchOptions, BatchReport, run_batch};
pub use capabilities::Capabilities;
pub use enhance::{AnalysisReport, EnhancementState, Enhancer, EnhancerSettings};
pub use pipeline::{
    GenerationState, Generator, GeneratorSettings, JobContext, Pipeline, ProgressObserver,
    SilentObserver,
};
pub use research::ResearchOptions;
pub use retry::RetryPolicy;
pub use topics::{TopicEntry, load_topics, parse_topics};
