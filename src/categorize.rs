//! C5: deterministic, ordered-rule structured-memory classifier.
//!
//! Stylistically grounded on the teacher's `AutoTagger`/`TagPattern`
//! (`src/intelligence/auto_tagging.rs`): an ordered list of patterns, first
//! match wins. Unlike the teacher's tagger this carries no confidence score
//! and no learned weights — every rule is fixed and the function is a pure,
//! side-effect-free mapping from text to `(Category, importance)` (spec
//! §4.5).

use crate::types::Category;
use once_cell::sync::Lazy;
use regex::RegexSet;

struct Rule {
    pattern: &'static str,
    category: Category,
}

const RULES: &[Rule] = &[
    Rule {
        pattern: r"(?i)\bmy (name|birthday|family|spouse|partner|kids?|children)\b",
        category: Category::Personal,
    },
    Rule {
        pattern: r"(?i)\bi am\b|\bi'm\b",
        category: Category::Personal,
    },
    Rule {
        pattern: r"(?i)\b(prefer|like|love|favorite|favourite|enjoy|hate|dislike)\b",
        category: Category::Preferences,
    },
    Rule {
        pattern: r"(?i)\bproject\b|\brepo(sitory)?\b|\bcodebase\b",
        category: Category::Projects,
    },
    Rule {
        pattern: r"(?i)\bremember that\b|\bnote that\b|\bfyi\b",
        category: Category::Facts,
    },
];

static RULE_SET: Lazy<RegexSet> =
    Lazy::new(|| RegexSet::new(RULES.iter().map(|r| r.pattern)).expect("static rule patterns are valid regex"));

/// Classify `text` into a category and its default importance, using the
/// first matching rule in order; falls back to `Session` when nothing
/// matches.
pub fn classify(text: &str) -> (Category, u8) {
    let matched = RULE_SET.matches(text);
    for (i, rule) in RULES.iter().enumerate() {
        if matched.matched(i) {
            return (rule.category, rule.category.default_importance());
        }
    }
    (Category::Session, Category::Session.default_importance())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn personal_self_reference_is_detected() {
        let (cat, _) = classify("My birthday is in March.");
        assert_eq!(cat, Category::Personal);
    }

    #[test]
    fn preference_language_is_detected() {
        let (cat, _) = classify("I really love dark mode in editors.");
        assert_eq!(cat, Category::Preferences);
    }

    #[test]
    fn project_marker_is_detected() {
        let (cat, _) = classify("Working on the engram project this week.");
        assert_eq!(cat, Category::Projects);
    }

    #[test]
    fn declarative_fact_is_detected() {
        let (cat, _) = classify("Remember that the deploy key rotates monthly.");
        assert_eq!(cat, Category::Facts);
    }

    #[test]
    fn unmatched_text_falls_back_to_session() {
        let (cat, importance) = classify("ok sounds good");
        assert_eq!(cat, Category::Session);
        assert_eq!(importance, Category::Session.default_importance());
    }

    #[test]
    fn first_matching_rule_wins_when_multiple_apply() {
        // Contains both a personal self-reference and a preference verb;
        // personal is listed first so it must win.
        let (cat, _) = classify("I'm someone who loves long walks.");
        assert_eq!(cat, Category::Personal);
    }

    #[test]
    fn classify_is_pure_and_deterministic() {
        let text = "I prefer tea over coffee.";
        assert_eq!(classify(text), classify(text));
    }
}
