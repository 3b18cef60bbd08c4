//! `{{ variable }}` template rendering.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::bindings::Bindings;
use crate::error::ExampleError;
use crate::model::RequestTemplate;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_.-]*)\s*\}\}")
        .expect("PLACEHOLDER is a valid regex pattern")
});

/// A request ready to send upstream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderedRequest {
    pub method: String,
    pub url: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
}

/// Substitute bindings into one string. Unknown names are an error.
pub fn render_str(text: &str, bindings: &Bindings) -> Result<String, ExampleError> {
    let mut out = String::with_capacity(text.len());
    let mut last = 0;
    for caps in PLACEHOLDER.captures_iter(text) {
        let (Some(whole), Some(name)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        let value = bindings
            .get(name.as_str())
            .ok_or_else(|| ExampleError::UnknownPlaceholder(name.as_str().to_string()))?;
        out.push_str(&text[last..whole.start()]);
        out.push_str(value);
        last = whole.end();
    }
    out.push_str(&text[last..]);
    Ok(out)
}

fn render_value(value: &Value, bindings: &Bindings) -> Result<Value, ExampleError> {
    Ok(match value {
        Value::String(s) => Value::String(render_str(s, bindings)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| render_value(v, bindings))
                .collect::<Result<_, _>>()?,
        ),
        Value::Object(map) => {
            let mut rendered = serde_json::Map::new();
            for (k, v) in map {
                rendered.insert(k.clone(), render_value(v, bindings)?);
            }
            Value::Object(rendered)
        }
        other => other.clone(),
    })
}

/// Render `template` against `bindings`.
///
/// `default_headers` (the offering's upstream headers) are rendered too and
/// are overridden by headers the template sets. A relative path is joined to
/// the `base_url` binding.
pub fn render(
    template: &RequestTemplate,
    bindings: &Bindings,
    default_headers: &BTreeMap<String, String>,
) -> Result<RenderedRequest, ExampleError> {
    let path = render_str(&template.path, bindings)?;
    let url = if path.starts_with("http://") || path.starts_with("https://") {
        path
    } else {
        let base = bindings
            .get("base_url")
            .ok_or_else(|| ExampleError::UnknownPlaceholder("base_url".to_string()))?;
        format!(
            "{}/{}",
            base.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    };

    let mut headers = BTreeMap::new();
    for (name, value) in default_headers.iter().chain(template.headers.iter()) {
        headers.insert(name.clone(), render_str(value, bindings)?);
    }

    Ok(RenderedRequest {
        method: render_str(&template.method, bindings)?.to_uppercase(),
        url,
        headers,
        body: template
            .body
            .as_ref()
            .map(|b| render_value(b, bindings))
            .transpose()?,
    })
}
