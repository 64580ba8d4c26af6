//! Selection context and match requests.

use serde::{Deserialize, Serialize};

use crate::{Accepted, Dimension};

/// The environment rules are matched against, fixed when an engine is built.
///
/// Each dimension may carry several values (for example a locale and its
/// fallbacks); a rule is satisfied if it accepts any of them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelectionContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application: Option<Accepted>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Accepted>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub theme: Option<Accepted>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub locale: Option<Accepted>,
}

impl SelectionContext {
    pub fn with_application(mut self, value: impl Into<Accepted>) -> Self {
        self.application = Some(value.into());
        self
    }

    pub fn with_user(mut self, value: impl Into<Accepted>) -> Self {
        self.user = Some(value.into());
        self
    }

    pub fn with_theme(mut self, value: impl Into<Accepted>) -> Self {
        self.theme = Some(value.into());
        self
    }

    pub fn with_locale(mut self, value: impl Into<Accepted>) -> Self {
        self.locale = Some(value.into());
        self
    }

    /// Values for a dimension, if the context defines it.
    pub fn get(&self, dim: Dimension) -> Option<&Accepted> {
        match dim {
            Dimension::User => self.user.as_ref(),
            Dimension::Theme => self.theme.as_ref(),
            Dimension::Locale => self.locale.as_ref(),
            Dimension::Application => self.application.as_ref(),
        }
    }

    /// Overlay `other` on top of this context, dimension by dimension.
    pub fn overlay(mut self, other: SelectionContext) -> Self {
        if other.application.is_some() {
            self.application = other.application;
        }
        if other.user.is_some() {
            self.user = other.user;
        }
        if other.theme.is_some() {
            self.theme = other.theme;
        }
        if other.locale.is_some() {
            self.locale = other.locale;
        }
        self
    }
}

/// One matching question: the engine's context plus the requested annotation.
#[derive(Debug, Clone, Copy)]
pub struct MatchRequest<'a> {
    pub context: &'a SelectionContext,
    pub annotation: Option<&'a str>,
}

impl<'a> MatchRequest<'a> {
    /// Plain module resolution.
    pub fn module(context: &'a SelectionContext) -> Self {
        Self {
            context,
            annotation: None,
        }
    }

    /// Resolution scoped to an annotation on the module.
    pub fn annotation(context: &'a SelectionContext, annotation: &'a str) -> Self {
        Self {
            context,
            annotation: Some(annotation),
        }
    }
}
