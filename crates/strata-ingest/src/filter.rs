//! Trigger filter: routes landed objects by exact, case-sensitive suffix.
//!
//! Each accepted suffix is an independent rule feeding the same invoker. An
//! object matching two rules would be invoked twice, so the filter refuses
//! rule sets where one suffix ends with another.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::event::ObjectCreatedEvent;

/// One accepted-suffix rule.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SuffixRule {
    id: String,
    suffix: String,
}

impl SuffixRule {
    /// Creates a rule; the id is derived from the suffix.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRule`] for an empty suffix.
    pub fn new(suffix: impl Into<String>) -> Result<Self> {
        let suffix = suffix.into();
        if suffix.is_empty() {
            return Err(Error::InvalidRule {
                message: "suffix must not be empty".into(),
            });
        }
        Ok(Self {
            id: format!("suffix:{suffix}"),
            suffix,
        })
    }

    /// Rule identifier, recorded with every invocation it triggers.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The accepted suffix.
    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Returns true if `key` ends with this rule's suffix.
    #[must_use]
    pub fn matches(&self, key: &str) -> bool {
        key.ends_with(&self.suffix)
    }
}

/// Outcome of routing one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingDecision<'a> {
    /// The event matched exactly one rule.
    Matched(&'a SuffixRule),
    /// No rule matched; the event is dropped without error.
    Ignored,
}

impl RoutingDecision<'_> {
    /// Returns true for [`RoutingDecision::Matched`].
    #[must_use]
    pub const fn is_matched(&self) -> bool {
        matches!(self, Self::Matched(_))
    }
}

/// The set of accepted-suffix rules.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerFilter {
    rules: Vec<SuffixRule>,
}

impl TriggerFilter {
    /// Creates a filter from rules.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OverlappingRules`] if any key could match two rules.
    pub fn new(rules: Vec<SuffixRule>) -> Result<Self> {
        for (i, first) in rules.iter().enumerate() {
            for second in &rules[i + 1..] {
                if first.suffix.ends_with(&second.suffix) || second.suffix.ends_with(&first.suffix)
                {
                    return Err(Error::OverlappingRules {
                        first: first.suffix.clone(),
                        second: second.suffix.clone(),
                    });
                }
            }
        }
        Ok(Self { rules })
    }

    /// Creates a filter with one rule per suffix.
    ///
    /// # Errors
    ///
    /// Returns an error for empty or overlapping suffixes.
    pub fn from_suffixes<I, S>(suffixes: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let rules = suffixes
            .into_iter()
            .map(SuffixRule::new)
            .collect::<Result<Vec<_>>>()?;
        Self::new(rules)
    }

    /// The configured rules.
    #[must_use]
    pub fn rules(&self) -> &[SuffixRule] {
        &self.rules
    }

    /// Routes a key.
    #[must_use]
    pub fn route_key(&self, key: &str) -> RoutingDecision<'_> {
        self.rules
            .iter()
            .find(|rule| rule.matches(key))
            .map_or(RoutingDecision::Ignored, RoutingDecision::Matched)
    }

    /// Routes an event.
    #[must_use]
    pub fn route(&self, event: &ObjectCreatedEvent) -> RoutingDecision<'_> {
        let decision = self.route_key(&event.key);
        match decision {
            RoutingDecision::Matched(rule) => {
                tracing::debug!(key = %event.key, rule = rule.id(), "event matched");
            }
            RoutingDecision::Ignored => {
                tracing::debug!(key = %event.key, "no suffix rule matched; ignoring");
            }
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const ACCEPTED: [&str; 4] = [".MF4", ".MFC", ".MFE", ".MFM"];

    fn filter() -> TriggerFilter {
        TriggerFilter::from_suffixes(ACCEPTED).expect("valid rules")
    }

    #[test]
    fn accepted_suffixes_match_their_rule() {
        let filter = filter();
        for suffix in ACCEPTED {
            let key = format!("logger/session{suffix}");
            match filter.route_key(&key) {
                RoutingDecision::Matched(rule) => assert_eq!(rule.suffix(), suffix),
                RoutingDecision::Ignored => panic!("{key} should match"),
            }
        }
    }

    #[test]
    fn matching_is_case_sensitive() {
        let filter = filter();
        assert_eq!(filter.route_key("session.mf4"), RoutingDecision::Ignored);
        assert_eq!(filter.route_key("notes.txt"), RoutingDecision::Ignored);
        assert_eq!(filter.route_key("MF4"), RoutingDecision::Ignored);
    }

    #[test]
    fn overlapping_rules_are_rejected() {
        let err = TriggerFilter::from_suffixes([".MF4", ".gz", ".tar.gz"]).expect_err("overlap");
        match err {
            Error::OverlappingRules { first, second } => {
                assert_eq!(first, ".gz");
                assert_eq!(second, ".tar.gz");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(TriggerFilter::from_suffixes([".MF4", ".MF4"]).is_err());
        assert!(TriggerFilter::from_suffixes([""]).is_err());
    }

    proptest! {
        #[test]
        fn unaccepted_suffixes_never_route(stem in "[a-z0-9/_-]{0,24}", ext in "[a-z]{1,4}") {
            let key = format!("{stem}.{ext}");
            let filter = filter();
            prop_assert_eq!(filter.route_key(&key), RoutingDecision::Ignored);
        }

        #[test]
        fn accepted_keys_match_exactly_one_rule(stem in "[A-Za-z0-9/_-]{1,24}", idx in 0usize..4) {
            let key = format!("{stem}{}", ACCEPTED[idx]);
            let filter = filter();
            let matching = filter.rules().iter().filter(|r| r.matches(&key)).count();
            prop_assert_eq!(matching, 1);
            prop_assert!(filter.route_key(&key).is_matched());
        }
    }
}
