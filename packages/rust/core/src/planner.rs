//! Planning stage: topic + research → outline with per-section word budgets.

use std::collections::HashSet;

use serde::Deserialize;
use tracing::{debug, info, instrument, warn};

use pencraft_shared::{Outline, OutlineSection, PencraftError, ResearchBundle, Result, SectionKind};

use crate::capabilities::Capabilities;
use crate::prompts::{self, TemplateId};
use crate::research::source_digest;

const MIN_BODY_SECTIONS: usize = 3;
const MAX_BODY_SECTIONS: usize = 6;
/// Roughly one body section per this many target words.
const WORDS_PER_BODY_SECTION: usize = 600;

const INTRO_PERCENT: usize = 10;
const OUTLOOK_PERCENT: usize = 10;
const CONCLUSION_PERCENT: usize = 8;

/// Section titles treated as fixed parts of every outline.
const RESERVED_TITLES: &[&str] = &["introduction", "future outlook", "outlook", "conclusion"];

#[derive(Debug, Deserialize)]
struct PlanAnswer {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    sections: Vec<PlannedSection>,
}

#[derive(Debug, Deserialize)]
struct PlannedSection {
    title: String,
    #[serde(default)]
    key_points: Vec<String>,
}

/// Number of body sections for a target length.
pub fn body_section_count(target_word_count: usize) -> usize {
    (target_word_count / WORDS_PER_BODY_SECTION).clamp(MIN_BODY_SECTIONS, MAX_BODY_SECTIONS)
}

/// Budgets in outline order: introduction, `body` sections, outlook, conclusion.
///
/// The budgets always sum to `target` exactly; the last body section absorbs
/// the rounding remainder.
pub fn allocate_budgets(target: usize, body: usize) -> Vec<usize> {
    let body = body.max(1);
    let intro = target * INTRO_PERCENT / 100;
    let outlook = target * OUTLOOK_PERCENT / 100;
    let conclusion = target * CONCLUSION_PERCENT / 100;
    let rest = target - intro - outlook - conclusion;
    let each = rest / body;

    let mut budgets = Vec::with_capacity(body + 3);
    budgets.push(intro);
    budgets.extend(std::iter::repeat_n(each, body - 1));
    budgets.push(rest - each * (body - 1));
    budgets.push(outlook);
    budgets.push(conclusion);
    budgets
}

/// Introduction, outlook and conclusion are part of every outline.
pub fn is_fixed_section(title: &str) -> bool {
    RESERVED_TITLES.contains(&title.trim().to_lowercase().as_str())
}

fn is_usable_topic(topic: &str) -> bool {
    topic.chars().any(char::is_alphanumeric)
}

/// Strip site names like "Title | Site" or "Title - Blog" from a page title.
fn clean_source_title(title: &str) -> String {
    let title = title.split(" | ").next().unwrap_or(title);
    let title = title.rsplit_once(" - ").map_or(title, |(head, _)| head);
    title.trim().trim_end_matches(['.', ':']).to_string()
}

fn generic_titles(topic: &str) -> Vec<(String, Vec<String>)> {
    [
        ("Core Concepts of {t}", "The fundamental ideas behind {t}"),
        ("How {t} Works in Practice", "A concrete walkthrough of {t}"),
        ("Common Pitfalls with {t}", "Mistakes teams make with {t}"),
        ("Best Practices for {t}", "Proven patterns for {t}"),
        ("Tooling and Ecosystem Around {t}", "Libraries and tools that support {t}"),
        ("Performance and Scalability of {t}", "How {t} behaves under load"),
    ]
    .iter()
    .map(|(title, point)| (title.replace("{t}", topic), vec![point.replace("{t}", topic)]))
    .collect()
}

/// Build the outline for `topic`.
///
/// The model proposes body sections; research titles and generic on-topic
/// titles fill any gap, so the outline is never short. Only a blank topic
/// is an error.
#[instrument(skip_all, fields(topic = %topic, target = target_word_count))]
pub async fn plan(
    caps: &Capabilities,
    topic: &str,
    bundle: &ResearchBundle,
    target_word_count: usize,
    additional_context: Option<&str>,
) -> Result<Outline> {
    let topic = topic.trim();
    if !is_usable_topic(topic) {
        return Err(PencraftError::Planning(format!("unusable topic {topic:?}")));
    }
    if target_word_count == 0 {
        return Err(PencraftError::Planning("target word count is zero".into()));
    }

    let body_count = body_section_count(target_word_count);
    let answer = propose(caps, topic, bundle, target_word_count, body_count, additional_context).await;

    let mut seen: HashSet<String> = RESERVED_TITLES.iter().map(|t| (*t).to_string()).collect();
    let mut body: Vec<(String, Vec<String>)> = Vec::with_capacity(body_count);
    let mut take = |title: String, points: Vec<String>, body: &mut Vec<(String, Vec<String>)>| {
        let key = title.to_lowercase();
        if body.len() < body_count && !title.is_empty() && seen.insert(key) {
            body.push((title, points));
        }
    };

    let mut article_title = None;
    if let Some(answer) = answer {
        article_title = answer.title.filter(|t| !t.trim().is_empty());
        for section in answer.sections {
            let points = section.key_points.into_iter().filter(|p| !p.trim().is_empty()).collect();
            take(section.title.trim().to_string(), points, &mut body);
        }
    }
    let planned = body.len();
    for source in &bundle.sources {
        let points = if source.snippet.trim().is_empty() {
            Vec::new()
        } else {
            vec![source.snippet.trim().to_string()]
        };
        take(clean_source_title(&source.title), points, &mut body);
    }
    let from_research = body.len() - planned;
    for (title, points) in generic_titles(topic) {
        take(title, points, &mut body);
    }
    debug!(planned, from_research, synthesized = body.len() - planned - from_research, "body sections chosen");

    let rising: Vec<String> = bundle.rising_keywords().into_iter().map(str::to_string).collect();
    let budgets = allocate_budgets(target_word_count, body.len());
    let mut budgets = budgets.into_iter();
    let mut next_budget = || budgets.next().unwrap_or_default();

    let mut sections = Vec::with_capacity(body.len() + 3);
    sections.push(OutlineSection {
        title: "Introduction".into(),
        kind: SectionKind::Introduction,
        target_words: next_budget(),
        key_points: vec![
            format!("Why {topic} matters now"),
            "What the reader will learn".into(),
        ],
    });
    for (title, key_points) in body {
        sections.push(OutlineSection {
            title,
            kind: SectionKind::Body,
            target_words: next_budget(),
            key_points,
        });
    }
    let mut outlook_points = vec![format!("Where {topic} is heading")];
    outlook_points.extend(rising.iter().take(3).map(|k| format!("Emerging interest in {k}")));
    sections.push(OutlineSection {
        title: "Future Outlook".into(),
        kind: SectionKind::Outlook,
        target_words: next_budget(),
        key_points: outlook_points,
    });
    sections.push(OutlineSection {
        title: "Conclusion".into(),
        kind: SectionKind::Conclusion,
        target_words: next_budget(),
        key_points: vec!["Key takeaways".into(), "Actionable next steps".into()],
    });

    let outline = Outline {
        title: article_title.unwrap_or_else(|| topic.to_string()),
        sections,
    };
    info!(
        sections = outline.sections.len(),
        budget = outline.total_budget(),
        "outline planned"
    );
    Ok(outline)
}

/// Ask the model for body sections. Any failure falls back to `None`.
async fn propose(
    caps: &Capabilities,
    topic: &str,
    bundle: &ResearchBundle,
    target_word_count: usize,
    body_count: usize,
    additional_context: Option<&str>,
) -> Option<PlanAnswer> {
    let prompt = prompts::render(
        TemplateId::PlanOutline,
        &[
            ("topic", topic),
            ("target_words", &target_word_count.to_string()),
            ("section_count", &body_count.to_string()),
            ("research", &source_digest(bundle, 10)),
            ("additional_context", additional_context.unwrap_or("none")),
        ],
    );
    let answer = match prompt {
        Ok(prompt) => caps.complete_with(&prompt, 2048).await,
        Err(e) => Err(e),
    };
    match answer.and_then(|text| prompts::parse_json_answer::<PlanAnswer>(&text)) {
        Ok(answer) => Some(answer),
        Err(e) => {
            warn!(error = %e, "outline proposal unavailable, using research titles");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MemoryStorage, ScriptedCompletion, StaticSearch, capabilities};
    use pencraft_shared::Source;
    use std::sync::Arc;

    fn caps(completion: ScriptedCompletion) -> Capabilities {
        capabilities(
            Arc::new(completion),
            Arc::new(StaticSearch::empty()),
            Arc::new(MemoryStorage::default()),
        )
    }

    fn bundle_with_titles(titles: &[&str]) -> ResearchBundle {
        ResearchBundle {
            sources: titles
                .iter()
                .enumerate()
                .map(|(i, t)| Source {
                    url: format!("https://s.example/{i}"),
                    title: (*t).to_string(),
                    snippet: format!("snippet {i}"),
                    relevance: 1.0,
                    content: None,
                })
                .collect(),
            trends: Vec::new(),
        }
    }

    #[test]
    fn budgets_sum_to_target() {
        for target in [500, 999, 1000, 3000, 3001, 4777, 6000, 12_345] {
            for body in MIN_BODY_SECTIONS..=MAX_BODY_SECTIONS {
                let budgets = allocate_budgets(target, body);
                assert_eq!(budgets.len(), body + 3);
                assert_eq!(budgets.iter().sum::<usize>(), target, "target {target}, body {body}");
            }
        }
    }

    #[test]
    fn body_count_is_bounded() {
        assert_eq!(body_section_count(500), 3);
        assert_eq!(body_section_count(3000), 5);
        assert_eq!(body_section_count(50_000), 6);
    }

    #[test]
    fn source_titles_lose_site_suffix() {
        assert_eq!(clean_source_title("Async in depth | Tokio"), "Async in depth");
        assert_eq!(clean_source_title("Pinning explained - Some Blog"), "Pinning explained");
    }

    #[tokio::test]
    async fn model_sections_come_first() {
        let outline = plan(
            &caps(ScriptedCompletion::article(1.0)),
            "Rust async",
            &ResearchBundle::default(),
            3000,
            None,
        )
        .await
        .unwrap();

        assert_eq!(outline.title, "A Planned Title");
        assert_eq!(outline.sections.len(), 5 + 3);
        assert_eq!(outline.sections[0].kind, SectionKind::Introduction);
        assert_eq!(outline.sections[1].title, "Planned Aspect 1");
        assert_eq!(outline.sections[6].kind, SectionKind::Outlook);
        assert_eq!(outline.sections[7].title, "Conclusion");
        assert_eq!(outline.total_budget(), 3000);
    }

    #[tokio::test]
    async fn falls_back_to_research_then_generic_titles() {
        let bundle = bundle_with_titles(&["Ownership basics | Docs", "Ownership basics - Mirror"]);
        let outline = plan(
            &caps(ScriptedCompletion::unavailable()),
            "Rust ownership",
            &bundle,
            1000,
            None,
        )
        .await
        .unwrap();

        let titles: Vec<&str> = outline.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(
            titles,
            vec![
                "Introduction",
                "Ownership basics",
                "Core Concepts of Rust ownership",
                "How Rust ownership Works in Practice",
                "Future Outlook",
                "Conclusion",
            ]
        );
        assert_eq!(outline.sections[1].key_points, vec!["snippet 0"]);
    }

    #[tokio::test]
    async fn malformed_answer_still_plans() {
        let outline = plan(
            &caps(ScriptedCompletion::new(|_, _| Ok("not json".into()))),
            "Observability",
            &ResearchBundle::default(),
            2000,
            Some("for SREs"),
        )
        .await
        .unwrap();
        assert_eq!(outline.sections.len(), 3 + 3);
        assert_eq!(outline.title, "Observability");
        let diff = outline.total_budget().abs_diff(2000);
        assert!(diff * 10 <= 2000);
    }

    #[tokio::test]
    async fn blank_topic_is_planning_error() {
        for topic in ["", "   ", "!!!"] {
            let err = plan(
                &caps(ScriptedCompletion::article(1.0)),
                topic,
                &ResearchBundle::default(),
                1000,
                None,
            )
            .await
            .unwrap_err();
            assert!(matches!(err, PencraftError::Planning(_)));
        }
    }
}
