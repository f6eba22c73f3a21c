//! Local relevance filter.
//!
//! Runs before any remote call. Only mail mentioning one of the configured
//! keywords (subject or body, case-insensitive substring) goes on to the
//! classifier; everything else is a terminal skip.

use regex::{Regex, RegexBuilder};
use tracing::debug;

use crate::pipeline::types::WorkItem;

/// Which message field a keyword matched in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleField {
    Subject,
    Body,
}

pub struct RelevanceFilter {
    /// `None` when no keywords are configured: everything is relevant.
    pattern: Option<Regex>,
}

impl RelevanceFilter {
    /// Build from plain keywords. Keywords are matched literally.
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Result<Self, regex::Error> {
        let alternatives: Vec<String> = keywords
            .iter()
            .map(|k| k.as_ref().trim())
            .filter(|k| !k.is_empty())
            .map(regex::escape)
            .collect();

        if alternatives.is_empty() {
            return Ok(Self { pattern: None });
        }

        let pattern = RegexBuilder::new(&alternatives.join("|"))
            .case_insensitive(true)
            .build()?;
        Ok(Self {
            pattern: Some(pattern),
        })
    }

    /// First field that matched, if any.
    pub fn matched_field(&self, item: &WorkItem) -> Option<RuleField> {
        let Some(pattern) = &self.pattern else {
            return Some(RuleField::Subject);
        };

        let field = if pattern.is_match(&item.subject) {
            Some(RuleField::Subject)
        } else if pattern.is_match(&item.body_text) {
            Some(RuleField::Body)
        } else {
            None
        };

        debug!(
            interaction_id = %item.interaction_id,
            field = ?field,
            "Relevance check"
        );
        field
    }

    pub fn is_relevant(&self, item: &WorkItem) -> bool {
        self.matched_field(item).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::types::test_item;

    fn closure_filter() -> RelevanceFilter {
        RelevanceFilter::new(&["close", "closure"]).unwrap()
    }

    fn item(subject: &str, body: &str) -> WorkItem {
        let mut item = test_item("1");
        item.subject = subject.into();
        item.body_text = body.into();
        item
    }

    #[test]
    fn matches_subject_case_insensitively() {
        let filter = closure_filter();
        assert_eq!(
            filter.matched_field(&item("Account CLOSURE request", "hi")),
            Some(RuleField::Subject)
        );
    }

    #[test]
    fn matches_body() {
        let filter = closure_filter();
        assert_eq!(
            filter.matched_field(&item("Help", "please close it")),
            Some(RuleField::Body)
        );
    }

    #[test]
    fn substring_match_like_legacy_filter() {
        // "closed" and "disclose" both contain "close".
        let filter = closure_filter();
        assert!(filter.is_relevant(&item("Closed account?", "")));
        assert!(filter.is_relevant(&item("", "we disclose")));
    }

    #[test]
    fn unrelated_mail_is_irrelevant() {
        let filter = closure_filter();
        assert!(!filter.is_relevant(&item("Statement request", "Send my ledger")));
    }

    #[test]
    fn keywords_are_literal() {
        let filter = RelevanceFilter::new(&["a.b"]).unwrap();
        assert!(filter.is_relevant(&item("x a.b y", "")));
        assert!(!filter.is_relevant(&item("axb", "")));
    }

    #[test]
    fn empty_keyword_list_passes_everything() {
        let filter = RelevanceFilter::new::<&str>(&[]).unwrap();
        assert!(filter.is_relevant(&item("anything", "")));
    }
}
