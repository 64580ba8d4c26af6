//! Selection criteria for configuration rules.
//!
//! A rule selects one or more module ids and may narrow its reach with the
//! optional `application`, `user`, `theme`, `locale` and `annotation`
//! dimensions. This crate parses selectors, decides whether a rule applies to
//! a request, and scores how specific a rule is.

mod context;
mod selector;

pub use context::{MatchRequest, SelectionContext};
pub use selector::{Accepted, Criteria, Selector, SelectorError};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Optional selection dimensions that participate in specificity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dimension {
    User,
    Theme,
    Locale,
    Application,
}

impl Dimension {
    /// All weighted dimensions, heaviest first.
    pub const ALL: [Dimension; 4] = [
        Dimension::User,
        Dimension::Theme,
        Dimension::Locale,
        Dimension::Application,
    ];

    /// Weight of this dimension in the specificity score.
    pub fn weight(self) -> u8 {
        match self {
            Dimension::User => 8,
            Dimension::Theme => 4,
            Dimension::Locale => 2,
            Dimension::Application => 1,
        }
    }
}

impl fmt::Display for Dimension {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dimension::User => write!(f, "user"),
            Dimension::Theme => write!(f, "theme"),
            Dimension::Locale => write!(f, "locale"),
            Dimension::Application => write!(f, "application"),
        }
    }
}

/// Decide whether `criteria` applies to `request`.
///
/// The `module` dimension is not checked here: callers look rules up by
/// module id, so it is satisfied by construction.
pub fn matches(criteria: &Criteria, request: &MatchRequest<'_>) -> bool {
    match (&criteria.annotation, request.annotation) {
        (Some(accepted), Some(requested)) => {
            if !accepted.contains(requested) {
                return false;
            }
        }
        // Annotation-scoped rules never leak into plain module resolution,
        // and plain module rules never answer annotation requests.
        (Some(_), None) | (None, Some(_)) => return false,
        (None, None) => {}
    }

    Dimension::ALL.iter().all(|&dim| match criteria.get(dim) {
        None => true,
        Some(accepted) => request
            .context
            .get(dim)
            .map(|actual| accepted.intersects(actual))
            .unwrap_or(false),
    })
}

/// Weighted specificity of `criteria`: `user:8 + theme:4 + locale:2 + application:1`.
///
/// Only dimensions the criteria actually constrain are counted. Since a
/// matching rule has every present dimension satisfied, this equals the
/// score of the satisfied dimensions for any request it matches.
pub fn specificity(criteria: &Criteria) -> u8 {
    Dimension::ALL
        .iter()
        .filter(|&&dim| criteria.get(dim).is_some())
        .map(|dim| dim.weight())
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn criteria(selector: Selector) -> Criteria {
        selector
            .into_criteria(|id| Ok::<_, SelectorError>(id.to_string()))
            .unwrap()
    }

    fn full_context() -> SelectionContext {
        SelectionContext::default()
            .with_application("app")
            .with_user("alice")
            .with_theme("dark")
            .with_locale("en-US")
    }

    #[test]
    fn test_unconstrained_rule_matches() {
        let c = criteria(Selector::module("test/type"));
        let ctx = SelectionContext::default();
        assert!(matches(&c, &MatchRequest::module(&ctx)));
    }

    #[test]
    fn test_dimension_must_be_satisfied() {
        let c = criteria(Selector::module("test/type").user("bob"));
        let ctx = full_context();
        assert!(!matches(&c, &MatchRequest::module(&ctx)));

        let c = criteria(Selector::module("test/type").user(["bob", "alice"]));
        assert!(matches(&c, &MatchRequest::module(&ctx)));
    }

    #[test]
    fn test_dimension_missing_from_context_fails() {
        let c = criteria(Selector::module("test/type").theme("dark"));
        let ctx = SelectionContext::default().with_user("alice");
        assert!(!matches(&c, &MatchRequest::module(&ctx)));
    }

    #[test]
    fn test_list_valued_context() {
        let c = criteria(Selector::module("test/type").locale("en"));
        let ctx = SelectionContext::default().with_locale(["en-US", "en"]);
        assert!(matches(&c, &MatchRequest::module(&ctx)));
    }

    #[test]
    fn test_annotation_scoping() {
        let ctx = SelectionContext::default();
        let plain = criteria(Selector::module("test/type"));
        let scoped = criteria(Selector::module("test/type").annotation("test/Label"));

        assert!(matches(&plain, &MatchRequest::module(&ctx)));
        assert!(!matches(&scoped, &MatchRequest::module(&ctx)));

        assert!(!matches(&plain, &MatchRequest::annotation(&ctx, "test/Label")));
        assert!(matches(&scoped, &MatchRequest::annotation(&ctx, "test/Label")));
        assert!(!matches(&scoped, &MatchRequest::annotation(&ctx, "test/Other")));
    }

    #[test]
    fn test_specificity_weights() {
        assert_eq!(specificity(&criteria(Selector::module("m"))), 0);
        assert_eq!(specificity(&criteria(Selector::module("m").application("a"))), 1);
        assert_eq!(specificity(&criteria(Selector::module("m").locale("l"))), 2);
        assert_eq!(specificity(&criteria(Selector::module("m").theme("t"))), 4);
        assert_eq!(specificity(&criteria(Selector::module("m").user("u"))), 8);
        let all = Selector::module("m")
            .user("u")
            .theme("t")
            .locale("l")
            .application("a");
        assert_eq!(specificity(&criteria(all)), 15);
    }

    #[test]
    fn test_annotation_does_not_add_specificity() {
        let c = criteria(Selector::module("m").annotation("x"));
        assert_eq!(specificity(&c), 0);
    }
}
