//! Topic naming and subscription filters.
//!
//! Topics are dot-separated; the first segment is the family owned by one
//! store: `appointment.*`, `order.*`, `invoice.*`, `payment.*`.

/// Messages routed by topic.
pub trait Topical {
    fn topic(&self) -> &str;
}

/// Set of topic patterns a consumer is interested in.
///
/// A pattern is either an exact topic (`order.ready_for_billing`) or a family
/// wildcard (`order.*`). `*` alone matches everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicFilter {
    patterns: Vec<String>,
}

impl TopicFilter {
    pub fn new<I, S>(patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            patterns: patterns.into_iter().map(Into::into).collect(),
        }
    }

    pub fn all() -> Self {
        Self::new(["*"])
    }

    pub fn matches(&self, topic: &str) -> bool {
        self.patterns.iter().any(|p| pattern_matches(p, topic))
    }
}

fn pattern_matches(pattern: &str, topic: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    match pattern.strip_suffix(".*") {
        Some(family) => topic
            .strip_prefix(family)
            .is_some_and(|rest| rest.starts_with('.')),
        None => pattern == topic,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn family_wildcards_match_only_their_family() {
        let f = TopicFilter::new(["order.*"]);
        assert!(f.matches("order.created"));
        assert!(f.matches("order.ready_for_billing"));
        assert!(!f.matches("orders.created"));
        assert!(!f.matches("order"));
        assert!(!f.matches("invoice.created"));
    }

    #[test]
    fn exact_patterns_and_catch_all() {
        let f = TopicFilter::new(["appointment.completed"]);
        assert!(f.matches("appointment.completed"));
        assert!(!f.matches("appointment.created"));
        assert!(TopicFilter::all().matches("payment.registered"));
    }
}
