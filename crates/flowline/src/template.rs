//! A small, sandboxed expression evaluator for `{{path.to.field}}` templates
//! with pipe filters, built on `tera`. No includes, no macros, no
//! filesystem loader — templates render a single string against a JSON
//! context and nothing else.

use crate::error::FlowError;
use serde_json::Value;
use tera::{Context, Tera};

/// Render `template` against `data`, returning the rendered string.
///
/// Syntax errors and missing-field errors both surface as
/// [`FlowError::template_invalid`], per §4.7's "on any syntax or path
/// error, delivery -> failed with captured error".
pub fn render(template: &str, data: &Value) -> Result<String, FlowError> {
    let mut tera = Tera::default();
    tera.add_raw_template("__flowline_template__", template)
        .map_err(|e| FlowError::template_invalid(format!("template syntax error: {e}")))?;

    let context = Context::from_value(data.clone())
        .map_err(|e| FlowError::template_invalid(format!("invalid template context: {e}")))?;

    tera.render("__flowline_template__", &context)
        .map_err(|e| FlowError::template_invalid(format!("template render error: {e}")))
}

/// Validate that `template` is syntactically well-formed, without
/// rendering it. Used at trigger create/update time before a sample event
/// is available.
pub fn validate_syntax(template: &str) -> Result<(), FlowError> {
    let mut tera = Tera::default();
    tera.add_raw_template("__flowline_validate__", template)
        .map_err(|e| FlowError::template_invalid(format!("template syntax error: {e}")))?;
    Ok(())
}

/// Whether a template references any field beyond static text — used to
/// decide whether a `sampleEvent` is required at trigger create/update
/// time (§4.7: "an optional `sampleEvent` is required when templates
/// reference dynamic fields").
pub fn references_dynamic_fields(template: &str) -> bool {
    template.contains("{{") || template.contains("{%")
}

/// Render `template` against `data` and require the result to resolve
/// every referenced field (no silently-empty substitutions caused by a
/// missing key), by first rendering against the sample event.
pub fn validate_against_sample(template: &str, sample_event: &Value) -> Result<(), FlowError> {
    render(template, sample_event).map(|_| ())
}

/// Render every string leaf of a JSON template tree against `data`,
/// leaving numbers/bools/null/structure untouched. Used for
/// `parameterTemplate`-shaped values, where the template lives in each
/// string field rather than as one flat template.
pub fn render_json(tmpl: &Value, data: &Value) -> Result<Value, FlowError> {
    match tmpl {
        Value::String(s) => render(s, data).map(Value::String),
        Value::Array(items) => items
            .iter()
            .map(|item| render_json(item, data))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), render_json(v, data)?);
            }
            Ok(Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}
