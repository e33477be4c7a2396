//! Rule metadata.

use serde::{Deserialize, Serialize};

/// Area a rule belongs to.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Accessibility,
    Interoperability,
    Performance,
    Pwa,
    Security,
    #[default]
    Other,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Accessibility => "accessibility",
            Category::Interoperability => "interoperability",
            Category::Performance => "performance",
            Category::Pwa => "pwa",
            Category::Security => "security",
            Category::Other => "other",
        }
    }
}

/// Static metadata every rule declares.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleMeta {
    /// Rule category.
    #[serde(default)]
    pub category: Category,

    /// Human-readable description.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Whether the rule is part of the recommended set.
    #[serde(default)]
    pub recommended: bool,

    /// JSON Schema the rule's options must conform to.
    ///
    /// `None` means the rule takes no options and anything is accepted.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema: Option<serde_json::Value>,

    /// Whether the rule makes sense for `file:` targets.
    #[serde(default)]
    pub works_with_local_files: bool,
}

impl RuleMeta {
    /// Creates metadata for the given category.
    pub fn new(category: Category) -> Self {
        Self {
            category,
            ..Self::default()
        }
    }

    /// Sets the description.
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Marks the rule as recommended.
    pub fn with_recommended(mut self, recommended: bool) -> Self {
        self.recommended = recommended;
        self
    }

    /// Sets the options schema.
    pub fn with_schema(mut self, schema: serde_json::Value) -> Self {
        self.schema = Some(schema);
        self
    }

    /// Sets whether the rule runs against local files.
    pub fn with_local_files(mut self, works: bool) -> Self {
        self.works_with_local_files = works;
        self
    }
}
