use formflux_core::schema::{FieldDefinition, FieldKind, FieldOption, FormSchema};
use formflux_core::state::{FieldStatus, FormState};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Everything the host needs to paint one field.
///
/// The host reports edits back with `FormManager::set_value(view.name, ..)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldView {
    pub name: String,
    pub label: String,
    pub kind: FieldKind,
    pub value: Value,
    /// First error only; hosts show one message at a time.
    pub error: Option<String>,
    pub warnings: Vec<String>,
    pub disabled: bool,
    pub validating: bool,
    pub touched: bool,
    pub required: bool,
    pub placeholder: Option<String>,
    pub description: Option<String>,
    pub options: Vec<FieldOption>,
    pub status: FieldStatus,
}

impl FieldView {
    pub fn from_definition(def: &FieldDefinition, state: &FormState) -> Self {
        let name = def.name.as_str();
        Self {
            name: def.name.clone(),
            label: label_for(def),
            kind: def.kind,
            value: state.values.get(name).cloned().unwrap_or(Value::Null),
            error: state.first_error(name).map(str::to_string),
            warnings: state.warnings.get(name).cloned().unwrap_or_default(),
            disabled: state.is_disabled(name),
            validating: state.is_validating(name),
            touched: state.is_touched(name),
            required: def.required,
            placeholder: def.placeholder.clone(),
            description: def.description.clone(),
            options: def.options.clone(),
            status: state.status(name),
        }
    }
}

fn label_for(def: &FieldDefinition) -> String {
    if !def.label.trim().is_empty() {
        return def.label.clone();
    }
    capitalize(&def.name)
}

fn capitalize(s: &str) -> String {
    let mut c = s.chars();
    match c.next() {
        None => String::new(),
        Some(f) => f.to_uppercase().collect::<String>() + c.as_str(),
    }
}

/// Names of the visible fields, in document order.
pub fn visible_names(schema: &FormSchema, state: &FormState) -> Vec<String> {
    schema
        .fields()
        .filter(|(_, f)| state.is_visible(&f.name))
        .map(|(_, f)| f.name.clone())
        .collect()
}
