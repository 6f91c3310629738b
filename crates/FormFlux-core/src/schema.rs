//! # Schema Model
//!
//! Pure data describing a form: sections, field definitions, validation rules and
//! dependency expressions. Nothing in here has behavior beyond lookups; loading and
//! checking live in [`crate::schema_loader`].
//!
//! The serialized shape is the schema exchange format (JSON or YAML).

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ValidationMode;

/// The root document of a form.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FormSchema {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Overrides the engine-wide validation mode for this form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub validation_mode: Option<ValidationMode>,
    pub sections: Vec<Section>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cross_field_rules: Vec<CrossFieldRuleDef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub fields: Vec<FieldDefinition>,
    /// Gates every field in the section.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<Dependency>,
}

/// Static description of one form input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct FieldDefinition {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: FieldKind,
    /// Key into the value bag. Unique across the whole schema.
    pub name: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placeholder: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub options: Vec<FieldOption>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub rules: Vec<ValidationRule>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dependency: Option<Dependency>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
}

/// The closed set of supported input types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum FieldKind {
    Text,
    Textarea,
    Email,
    Password,
    Number,
    Select,
    Multiselect,
    Radio,
    Checkbox,
    Date,
    File,
    Rating,
    Address,
}

impl FieldKind {
    pub const ALL: [FieldKind; 13] = [
        FieldKind::Text,
        FieldKind::Textarea,
        FieldKind::Email,
        FieldKind::Password,
        FieldKind::Number,
        FieldKind::Select,
        FieldKind::Multiselect,
        FieldKind::Radio,
        FieldKind::Checkbox,
        FieldKind::Date,
        FieldKind::File,
        FieldKind::Rating,
        FieldKind::Address,
    ];

    /// The tag used in the exchange format.
    pub fn tag(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::Textarea => "textarea",
            FieldKind::Email => "email",
            FieldKind::Password => "password",
            FieldKind::Number => "number",
            FieldKind::Select => "select",
            FieldKind::Multiselect => "multiselect",
            FieldKind::Radio => "radio",
            FieldKind::Checkbox => "checkbox",
            FieldKind::Date => "date",
            FieldKind::File => "file",
            FieldKind::Rating => "rating",
            FieldKind::Address => "address",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.tag() == tag)
    }

    /// Single-choice kinds whose value must be one of the declared options.
    pub fn is_single_choice(&self) -> bool {
        matches!(self, FieldKind::Select | FieldKind::Radio)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FieldOption {
    pub label: String,
    pub value: Value,
}

/// A declarative validation rule attached to a field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct ValidationRule {
    #[serde(flatten)]
    pub kind: RuleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Severity::is_error")]
    pub severity: Severity,
}

impl ValidationRule {
    pub fn new(kind: RuleKind) -> Self {
        Self {
            kind,
            message: None,
            severity: Severity::Error,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn warning(mut self) -> Self {
        self.severity = Severity::Warning;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleKind {
    Required,
    MinLength { value: usize },
    MaxLength { value: usize },
    Min { value: f64 },
    Max { value: f64 },
    Pattern { value: String },
    Email,
    Url,
    /// Resolved by name against the rule registry at validation time.
    Custom { name: String },
}

impl RuleKind {
    /// Stable machine-readable code reported with every issue.
    pub fn code(&self) -> &'static str {
        match self {
            RuleKind::Required => "required",
            RuleKind::MinLength { .. } => "min_length",
            RuleKind::MaxLength { .. } => "max_length",
            RuleKind::Min { .. } => "min",
            RuleKind::Max { .. } => "max",
            RuleKind::Pattern { .. } => "pattern",
            RuleKind::Email => "email",
            RuleKind::Url => "url",
            RuleKind::Custom { .. } => "custom",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    #[default]
    Error,
    Warning,
}

impl Severity {
    pub fn is_error(&self) -> bool {
        matches!(self, Severity::Error)
    }
}

/// A conditional expression over another field's value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Dependency {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
    #[serde(default, skip_serializing_if = "DependencyEffect::is_show")]
    pub effect: DependencyEffect,
}

impl Dependency {
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
            effect: DependencyEffect::Show,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    GreaterThan,
    LessThan,
}

/// What a failing dependency does to its target.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DependencyEffect {
    #[default]
    Show,
    Enable,
}

impl DependencyEffect {
    pub fn is_show(&self) -> bool {
        matches!(self, DependencyEffect::Show)
    }
}

/// A cross-field rule declared in the schema, resolved by name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct CrossFieldRuleDef {
    pub rule: String,
    /// The first field owns any failure message.
    pub fields: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl FormSchema {
    /// Iterates every field in document order, paired with its section.
    pub fn fields(&self) -> impl Iterator<Item = (&Section, &FieldDefinition)> {
        self.sections
            .iter()
            .flat_map(|s| s.fields.iter().map(move |f| (s, f)))
    }

    pub fn field_count(&self) -> usize {
        self.sections.iter().map(|s| s.fields.len()).sum()
    }

    pub fn field_by_name(&self, name: &str) -> Option<&FieldDefinition> {
        self.fields().map(|(_, f)| f).find(|f| f.name == name)
    }

    /// Field names in document order.
    pub fn field_names(&self) -> Vec<String> {
        self.fields().map(|(_, f)| f.name.clone()).collect()
    }

    /// True when the form carries custom (registry-resolved) cross-field rules.
    pub fn has_custom_cross_field_rules(&self) -> bool {
        !self.cross_field_rules.is_empty()
    }
}
