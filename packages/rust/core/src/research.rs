//! Research stage: topic → ranked, deduplicated sources plus trend keywords.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use pencraft_scrape::normalize_url;
use pencraft_shared::{
    PencraftError, ResearchBundle, ResearchConfig, Result, SearchHit, Source, TrendKeyword,
};

use crate::capabilities::Capabilities;

/// Words ignored when deriving keywords from a topic.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "with", "from", "into", "your", "you", "how", "what", "why", "when",
    "are", "its", "this", "that", "using", "use", "guide", "about", "over", "than", "vs",
];

const KEYWORD_WEIGHT: f64 = 0.7;
const RANK_WEIGHT: f64 = 0.3;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResearchOptions {
    /// Upper bound on candidates across all queries.
    pub max_search_results: usize,
    pub max_sources: usize,
    /// Top-ranked sources whose pages are fetched.
    pub scrape_top: usize,
    /// Concurrent port calls within the stage.
    pub concurrency: usize,
}

impl ResearchOptions {
    pub fn from_config(config: &ResearchConfig) -> Self {
        Self {
            max_search_results: config.max_search_results,
            max_sources: config.max_sources,
            scrape_top: config.scrape_top,
            concurrency: config.concurrency,
        }
    }
}

impl Default for ResearchOptions {
    fn default() -> Self {
        Self::from_config(&ResearchConfig::default())
    }
}

/// Lowercase content words of a topic, in order of appearance.
pub fn topic_keywords(topic: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    topic
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| w.len() >= 3 && !STOPWORDS.contains(w))
        .filter(|w| seen.insert(w.to_string()))
        .map(str::to_string)
        .collect()
}

/// Queries issued for a topic, in merge order.
fn search_queries(topic: &str) -> Vec<String> {
    let topic = topic.trim();
    vec![
        topic.to_string(),
        format!("{topic} explained"),
        format!("{topic} best practices"),
    ]
}

/// Fraction of keywords present in the hit's title or snippet.
fn keyword_overlap(hit: &SearchHit, keywords: &[String]) -> f64 {
    if keywords.is_empty() {
        return 0.0;
    }
    let haystack = format!("{} {}", hit.title, hit.snippet).to_lowercase();
    let found = keywords.iter().filter(|k| haystack.contains(k.as_str())).count();
    found as f64 / keywords.len() as f64
}

/// Numbered source list quoted into prompts; numbers match `[@N]` markers.
pub fn source_digest(bundle: &ResearchBundle, limit: usize) -> String {
    if bundle.sources.is_empty() {
        return "No external sources available; rely on general knowledge and do not cite.".into();
    }
    bundle
        .sources
        .iter()
        .take(limit)
        .enumerate()
        .map(|(i, s)| {
            let detail = s
                .content
                .as_deref()
                .map(|c| excerpt(c, 600))
                .unwrap_or_else(|| s.snippet.trim().to_string());
            format!("[{}] {} ({})\n    {}", i + 1, s.title.trim(), s.url, detail)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn excerpt(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    match flat.char_indices().nth(max_chars) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}

/// Gather sources and trend keywords for `topic`.
///
/// Fails with [`PencraftError::ResearchUnavailable`] only when every search
/// query fails. Scrape and trend failures degrade silently.
#[instrument(skip_all, fields(topic = %topic))]
pub async fn research(
    caps: &Capabilities,
    topic: &str,
    options: &ResearchOptions,
) -> Result<ResearchBundle> {
    let start = Instant::now();
    let keywords = topic_keywords(topic);
    let queries = search_queries(topic);
    let per_query = options.max_search_results.div_ceil(queries.len()).max(1);
    let semaphore = Arc::new(Semaphore::new(options.concurrency.max(1)));

    // --- Search fan-out, joined in query order ---
    let mut handles = Vec::with_capacity(queries.len());
    for query in queries {
        let caps = caps.clone();
        let sem = semaphore.clone();
        handles.push(tokio::spawn(async move {
            let Ok(_permit) = sem.acquire().await else {
                return Err(PencraftError::Cancelled("research worker pool closed".into()));
            };
            caps.search(&query, per_query).await
        }));
    }

    let mut per_query_hits: Vec<Vec<SearchHit>> = Vec::new();
    let mut last_error: Option<String> = None;
    for handle in handles {
        match handle.await {
            Ok(Ok(hits)) => per_query_hits.push(hits),
            Ok(Err(e)) => {
                warn!(error = %e, "search query failed");
                last_error = Some(e.to_string());
            }
            Err(e) => {
                warn!(error = %e, "search task panicked");
                last_error = Some(e.to_string());
            }
        }
    }
    if caps.is_cancelled() {
        return Err(PencraftError::Cancelled("cancelled during research".into()));
    }
    if per_query_hits.is_empty() {
        return Err(PencraftError::ResearchUnavailable(
            last_error.unwrap_or_else(|| "no search queries issued".into()),
        ));
    }

    // --- Dedupe and score ---
    let mut seen: HashSet<String> = HashSet::new();
    let mut sources: Vec<Source> = Vec::new();
    for hits in per_query_hits {
        for (rank, hit) in hits.into_iter().enumerate() {
            let Some(normalized) = normalize_url(&hit.url) else {
                debug!(url = %hit.url, "skipping unusable url");
                continue;
            };
            if !seen.insert(normalized) {
                continue;
            }
            let relevance =
                KEYWORD_WEIGHT * keyword_overlap(&hit, &keywords) + RANK_WEIGHT / (rank as f64 + 1.0);
            sources.push(Source {
                url: hit.url,
                title: hit.title,
                snippet: hit.snippet,
                relevance,
                content: None,
            });
        }
    }
    sources.truncate(options.max_search_results);
    // Stable: equal scores keep query order.
    sources.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
    sources.truncate(options.max_sources);

    // --- Scrape the top candidates ---
    if caps.can_scrape() && options.scrape_top > 0 {
        let mut handles = Vec::new();
        for (index, source) in sources.iter().take(options.scrape_top).enumerate() {
            let caps = caps.clone();
            let sem = semaphore.clone();
            let url = source.url.clone();
            handles.push(tokio::spawn(async move {
                let Ok(_permit) = sem.acquire().await else {
                    return (index, None);
                };
                match caps.scrape(&url).await {
                    Ok(text) => (index, text),
                    Err(e) => {
                        debug!(%url, error = %e, "scrape failed, keeping snippet only");
                        (index, None)
                    }
                }
            }));
        }
        for handle in handles {
            if let Ok((index, Some(text))) = handle.await {
                sources[index].content = Some(text);
            }
        }
    }

    // --- Trends ---
    let full_topic = topic.trim().to_lowercase();
    let mut trend_keys = vec![full_topic.clone()];
    trend_keys.extend(keywords.iter().filter(|k| **k != full_topic).cloned());
    let trends = lookup_trends(caps, &trend_keys).await;

    info!(
        sources = sources.len(),
        scraped = sources.iter().filter(|s| s.content.is_some()).count(),
        trends = trends.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "research complete"
    );

    Ok(ResearchBundle { sources, trends })
}

/// Trend signals for `keywords`, rising first, then by volume and name.
///
/// A failed lookup degrades to no trends.
pub async fn lookup_trends(caps: &Capabilities, keywords: &[String]) -> Vec<TrendKeyword> {
    match caps.trends(keywords).await {
        Ok(map) => {
            let mut trends: Vec<TrendKeyword> = map
                .into_iter()
                .map(|(keyword, signal)| TrendKeyword {
                    keyword,
                    volume: signal.volume,
                    rising: signal.rising,
                })
                .collect();
            trends.sort_by(|a, b| {
                b.rising
                    .cmp(&a.rising)
                    .then(b.volume.cmp(&a.volume))
                    .then_with(|| a.keyword.cmp(&b.keyword))
            });
            trends
        }
        Err(e) => {
            warn!(error = %e, "trend lookup failed, continuing without trends");
            Vec::new()
        }
    }
}
