//! Pattern tables used for importance scoring and core classification
//!
//! Classification is data, not control flow: each rule is a
//! `(family, regex, weight)` row. The scorer sums the weights of the rules
//! that match, and the core manager maps the dominant family to a
//! protected category. Extending the tables does not touch either consumer.

use std::sync::LazyLock;

use regex::Regex;

use crate::memory::types::CoreCategory;

/// Groups of related content patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternFamily {
    /// Name, role, location, contact details
    Identity,
    /// Ongoing work and projects
    Project,
    /// People the user is connected to
    Relationship,
    /// Standing instructions about how the agent should behave
    System,
    /// Dates, versions, sizes, URLs
    Specificity,
}

impl PatternFamily {
    /// The protected core category this family feeds, if any.
    pub fn core_category(self) -> Option<CoreCategory> {
        match self {
            PatternFamily::Identity => Some(CoreCategory::Identity),
            PatternFamily::Project => Some(CoreCategory::Projects),
            PatternFamily::Relationship => Some(CoreCategory::Relationships),
            PatternFamily::System => Some(CoreCategory::System),
            PatternFamily::Specificity => None,
        }
    }
}

/// A compiled classification rule.
#[derive(Debug)]
pub struct PatternRule {
    pub family: PatternFamily,
    pub regex: Regex,
    /// Score bonus added when the rule matches
    pub weight: f32,
}

/// Raw rule rows. All patterns are case-insensitive.
pub const RULE_SPECS: &[(PatternFamily, &str, f32)] = &[
    // Identity
    (PatternFamily::Identity, r"\bmy name is\b", 0.2),
    (PatternFamily::Identity, r"\b(i am|i'm) (a|an) [a-z]+", 0.2),
    (PatternFamily::Identity, r"\bi (live|am based|reside) in\b", 0.2),
    (PatternFamily::Identity, r"\b(i am|i'm) from\b", 0.2),
    (PatternFamily::Identity, r"\bi work (as|at|for)\b", 0.2),
    (PatternFamily::Identity, r"\bmy (email|phone|number|address|birthday) is\b", 0.2),
    (PatternFamily::Identity, r"[\w.+-]+@[\w-]+\.[\w.]+", 0.15),
    // Projects
    (PatternFamily::Project, r"\b(working on|building|developing|maintaining)\b", 0.15),
    (PatternFamily::Project, r"\bprojects?\b", 0.15),
    (PatternFamily::Project, r"\b(repo|repository|codebase)\b", 0.1),
    (PatternFamily::Project, r"\b(deadline|milestone|launch|roadmap)\b", 0.1),
    // Relationships
    (
        PatternFamily::Relationship,
        r"\bmy (wife|husband|partner|girlfriend|boyfriend|son|daughter|kids?|mother|mom|father|dad|brother|sister|friend|boss|manager|colleague|coworker)\b",
        0.15,
    ),
    (PatternFamily::Relationship, r"\b(married to|dating|engaged to)\b", 0.15),
    // System
    (PatternFamily::System, r"\b(i prefer|please always|please never|don't ever)\b", 0.1),
    (PatternFamily::System, r"\b(always|never) (use|respond|reply|answer|call)\b", 0.1),
    (PatternFamily::System, r"\b(respond|reply|answer) (in|with)\b", 0.1),
    (PatternFamily::System, r"\b(time ?zone|preferred language)\b", 0.1),
    // Specificity
    (PatternFamily::Specificity, r"\b\d{4}-\d{2}-\d{2}\b", 0.05),
    (
        PatternFamily::Specificity,
        r"\b(jan|feb|mar|apr|may|jun|jul|aug|sep|oct|nov|dec)[a-z]* \d{1,2}\b",
        0.05,
    ),
    (PatternFamily::Specificity, r"\bv?\d+\.\d+(\.\d+)?\b", 0.05),
    (PatternFamily::Specificity, r"\b\d+(\.\d+)? ?(kb|mb|gb|tb|px)\b", 0.05),
    (PatternFamily::Specificity, r"https?://\S+", 0.05),
];

/// Durability weight per Working section (case-insensitive lookup).
pub const SECTION_WEIGHTS: &[(&str, f32)] = &[
    ("identity", 0.15),
    ("relationships", 0.1),
    ("projects", 0.1),
    ("system", 0.05),
    ("preferences", 0.05),
    ("skills", 0.05),
    ("events", -0.05),
    ("conversation", -0.05),
    ("misc", -0.05),
    ("scratch", -0.1),
];

static RULES: LazyLock<Vec<PatternRule>> = LazyLock::new(|| {
    RULE_SPECS
        .iter()
        .filter_map(|(family, pattern, weight)| {
            match Regex::new(&format!("(?i){pattern}")) {
                Ok(regex) => Some(PatternRule {
                    family: *family,
                    regex,
                    weight: *weight,
                }),
                Err(e) => {
                    tracing::error!(pattern, error = %e, "Skipping invalid pattern rule");
                    None
                }
            }
        })
        .collect()
});

/// All compiled rules.
pub fn rules() -> &'static [PatternRule] {
    &RULES
}

/// Rules whose pattern occurs in `content`.
pub fn matching_rules(content: &str) -> impl Iterator<Item = &'static PatternRule> + '_ {
    rules().iter().filter(move |rule| rule.regex.is_match(content))
}

/// Summed weight of matching rules in one family.
pub fn family_bonus(content: &str, family: PatternFamily) -> f32 {
    matching_rules(content)
        .filter(|rule| rule.family == family)
        .map(|rule| rule.weight)
        .sum()
}

/// Weight of a Working section; unknown sections weigh nothing.
pub fn section_weight(section: &str) -> f32 {
    let section = section.trim().to_ascii_lowercase();
    SECTION_WEIGHTS
        .iter()
        .find(|(name, _)| *name == section)
        .map(|(_, weight)| *weight)
        .unwrap_or(0.0)
}

/// The protected category whose families carry the most matched weight.
///
/// Ties resolve in `CoreCategory::ALL` order.
pub fn dominant_core_category(content: &str) -> Option<CoreCategory> {
    let mut totals = [0.0_f32; 4];
    for rule in matching_rules(content) {
        if let Some(category) = rule.family.core_category() {
            let idx = CoreCategory::ALL
                .iter()
                .position(|c| *c == category)
                .unwrap_or(0);
            totals[idx] += rule.weight;
        }
    }

    let mut best: Option<(CoreCategory, f32)> = None;
    for (category, total) in CoreCategory::ALL.iter().zip(totals) {
        if total > 0.0 && best.is_none_or(|(_, b)| total > b) {
            best = Some((*category, total));
        }
    }
    best.map(|(category, _)| category)
}
