//! Quality gate for final turn nodes.
//!
//! A [`QualityGrader`] turns the final node's output text into a
//! [`QualityReport`]. The built-in [`HeuristicGrader`] applies penalty-scored
//! checks per quality profile: every failed check subtracts its penalty from
//! 100, the clamped score is compared against the node's threshold.

use async_trait::async_trait;
use skein_types::{QualityCheck, QualityDecision, QualityProfile, QualityReport};

pub const MIN_ANSWER_CHARS: usize = 120;

/// Grades the output of a final turn node. Intermediate nodes are never
/// graded.
#[async_trait]
pub trait QualityGrader: Send + Sync {
    async fn grade(&self, profile: QualityProfile, threshold: u32, text: &str) -> QualityReport;
}

/// Default grader with no external dependencies.
#[derive(Debug, Default, Clone)]
pub struct HeuristicGrader;

#[async_trait]
impl QualityGrader for HeuristicGrader {
    async fn grade(&self, profile: QualityProfile, threshold: u32, text: &str) -> QualityReport {
        grade_text(profile, threshold, text)
    }
}

struct CheckSpec {
    id: &'static str,
    label: &'static str,
    kind: &'static str,
    required: bool,
    penalty: u32,
    passed: bool,
    detail: Option<String>,
}

/// Pure grading routine behind [`HeuristicGrader`].
pub fn grade_text(profile: QualityProfile, threshold: u32, text: &str) -> QualityReport {
    let trimmed = text.trim();
    let char_count = trimmed.chars().count();

    let mut specs = vec![
        CheckSpec {
            id: "non_empty",
            label: "output is not empty",
            kind: "non_empty",
            required: true,
            penalty: 40,
            passed: !trimmed.is_empty(),
            detail: None,
        },
        CheckSpec {
            id: "min_length",
            label: "output meets minimum length",
            kind: "min_length",
            required: false,
            penalty: 10,
            passed: char_count >= MIN_ANSWER_CHARS,
            detail: Some(format!("{char_count} chars, minimum {MIN_ANSWER_CHARS}")),
        },
    ];

    match profile {
        QualityProfile::ResearchEvidence => {
            specs.push(CheckSpec {
                id: "source_signal",
                label: "cites at least one source",
                kind: "signal",
                required: true,
                penalty: 20,
                passed: has_source_signal(trimmed),
                detail: None,
            });
            specs.push(CheckSpec {
                id: "uncertainty_signal",
                label: "acknowledges uncertainty or limitations",
                kind: "signal",
                required: false,
                penalty: 10,
                passed: has_uncertainty_signal(trimmed),
                detail: None,
            });
        }
        QualityProfile::DesignPlanning => {
            let hits = keyword_hits(trimmed, DESIGN_KEYWORDS);
            specs.push(CheckSpec {
                id: "design_coverage",
                label: "covers planning vocabulary",
                kind: "coverage",
                required: true,
                penalty: 20,
                passed: hits >= 3,
                detail: Some(format!("{hits} of {} planning terms", DESIGN_KEYWORDS.len())),
            });
        }
        QualityProfile::CodeImplementation => {
            specs.push(CheckSpec {
                id: "code_plan_signal",
                label: "names files, tests, or build steps",
                kind: "signal",
                required: true,
                penalty: 20,
                passed: has_code_plan_signal(trimmed),
                detail: None,
            });
        }
        QualityProfile::SynthesisFinal => {
            let hits = keyword_hits(trimmed, SYNTHESIS_KEYWORDS);
            specs.push(CheckSpec {
                id: "synthesis_coverage",
                label: "covers synthesis vocabulary",
                kind: "coverage",
                required: true,
                penalty: 20,
                passed: hits >= 3,
                detail: Some(format!(
                    "{hits} of {} synthesis terms",
                    SYNTHESIS_KEYWORDS.len()
                )),
            });
        }
        QualityProfile::General => {}
    }

    let mut score: i64 = 100;
    let mut checks = Vec::with_capacity(specs.len());
    let mut failures = Vec::new();
    let mut warnings = Vec::new();

    for spec in specs {
        if !spec.passed {
            score -= spec.penalty as i64;
            if spec.required {
                failures.push(spec.label.to_string());
            } else {
                warnings.push(spec.label.to_string());
            }
        }
        checks.push(QualityCheck {
            id: spec.id.to_string(),
            label: spec.label.to_string(),
            kind: spec.kind.to_string(),
            required: spec.required,
            passed: spec.passed,
            score_delta: if spec.passed { 0 } else { -(spec.penalty as i32) },
            detail: spec.detail,
        });
    }

    let score = score.clamp(0, 100) as u32;
    let decision = if score >= threshold {
        QualityDecision::Pass
    } else {
        QualityDecision::Reject
    };

    QualityReport {
        profile,
        threshold,
        score,
        decision,
        checks,
        failures,
        warnings,
    }
}

const DESIGN_KEYWORDS: &[&str] = &[
    "goal",
    "scope",
    "milestone",
    "risk",
    "dependency",
    "phase",
    "plan",
    "architecture",
];

const SYNTHESIS_KEYWORDS: &[&str] = &[
    "conclusion",
    "evidence",
    "confidence",
    "conflict",
    "recommendation",
    "finding",
    "limitation",
    "summary",
];

fn has_source_signal(text: &str) -> bool {
    regex_hit(r"(?i)(https?://|\bsource\s*:|\[source\])", text)
}

fn has_code_plan_signal(text: &str) -> bool {
    regex_hit(
        r"(?i)\b(file|test|lint|build|patch|module|class|function)\b",
        text,
    )
}

fn has_uncertainty_signal(text: &str) -> bool {
    regex_hit(
        r"(?i)\b(uncertain|unverified|assumption|limitation|confidence)\b",
        text,
    )
}

fn keyword_hits(text: &str, keywords: &[&str]) -> usize {
    let lowered = text.to_lowercase();
    keywords
        .iter()
        .filter(|keyword| lowered.contains(*keyword))
        .count()
}

fn regex_hit(pattern: &str, haystack: &str) -> bool {
    regex::Regex::new(pattern)
        .map(|re| re.is_match(haystack))
        .unwrap_or(false)
}
