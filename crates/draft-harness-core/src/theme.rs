//! Keyword-based theme classification.
//!
//! Every content item lands in exactly one of seven fixed buckets. Rules
//! are evaluated in a fixed priority order and the first hit wins, so an
//! item mentioning both a fix and a feature is always filed under
//! [`Theme::StabilityAndFixes`].

use std::fmt;

use serde::{Serialize, Serializer};

use crate::models::RecordKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Theme {
    StabilityAndFixes,
    QualityAndTesting,
    Refactoring,
    InfraAndDelivery,
    KnowledgeAndDocumentation,
    FeatureDevelopment,
    GeneralEngineering,
}

impl Theme {
    pub fn label(&self) -> &'static str {
        match self {
            Theme::StabilityAndFixes => "Stability & Fixes",
            Theme::QualityAndTesting => "Quality & Testing",
            Theme::Refactoring => "Refactoring",
            Theme::InfraAndDelivery => "Infra & Delivery",
            Theme::KnowledgeAndDocumentation => "Knowledge & Documentation",
            Theme::FeatureDevelopment => "Feature Development",
            Theme::GeneralEngineering => "General Engineering",
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl Serialize for Theme {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.label())
    }
}

/// Priority-ordered keyword rules. Order matters.
const RULES: &[(Theme, &[&str])] = &[
    (Theme::StabilityAndFixes, &["fix", "bug", "hotfix"]),
    (Theme::QualityAndTesting, &["test", "spec", "qa"]),
    (Theme::Refactoring, &["refactor", "cleanup", "simplify"]),
    (Theme::InfraAndDelivery, &["deploy", "infra", "pipeline", "ci"]),
    (Theme::KnowledgeAndDocumentation, &["docs", "notion"]),
    (Theme::FeatureDevelopment, &["feat", "feature", "add"]),
];

/// Classify an item by case-insensitive substring match over title + body.
pub fn classify(title: &str, body: &str, kind: RecordKind) -> Theme {
    let haystack = format!("{} {}", title, body).to_lowercase();

    for (theme, keywords) in RULES {
        if keywords.iter().any(|k| haystack.contains(k)) {
            return *theme;
        }
        if *theme == Theme::KnowledgeAndDocumentation && kind == RecordKind::Notion {
            return *theme;
        }
    }

    Theme::GeneralEngineering
}
