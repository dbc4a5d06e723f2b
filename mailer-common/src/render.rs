//! Pure textual substitution renderer (§4.4). Mustache-compatible `{{name}}`
//! delimiters over a flat string->scalar map, with a `tenant_name`
//! fallthrough. Never performs I/O; safe to call from any component.

use std::collections::HashMap;

use crate::error::RenderError;

/// A scalar template variable. Non-scalar JSON values passed in at intake are
/// flattened to their string form before reaching the renderer (§5 of
/// SPEC_FULL.md, supplementing the distilled spec's flat-map assumption).
#[derive(Debug, Clone)]
pub enum Value {
    Str(String),
    Number(serde_json::Number),
    Bool(bool),
    Null,
}

impl Value {
    fn render(&self) -> String {
        match self {
            Value::Str(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Null => String::new(),
        }
    }
}

/// Flatten an arbitrary JSON object into the flat scalar map the renderer
/// expects. Nested objects/arrays are stringified as JSON rather than
/// rejected, since the original service accepts arbitrary `variables_data`.
pub fn flatten_variables(data: &serde_json::Value) -> HashMap<String, Value> {
    let mut out = HashMap::new();
    if let serde_json::Value::Object(map) = data {
        for (key, value) in map {
            let v = match value {
                serde_json::Value::String(s) => Value::Str(s.clone()),
                serde_json::Value::Number(n) => Value::Number(n.clone()),
                serde_json::Value::Bool(b) => Value::Bool(*b),
                serde_json::Value::Null => Value::Null,
                other => Value::Str(other.to_string()),
            };
            out.insert(key.clone(), v);
        }
    }
    out
}

/// Render `template` against `variables`, falling through to `tenant_name`
/// for any `{{tenant_name}}` placeholder not present in `variables`. Missing
/// variables render as empty string; malformed delimiters (`{{` with no
/// matching `}}`, or `{{}}`) raise [`RenderError`].
pub fn render(
    template: &str,
    variables: &HashMap<String, Value>,
    tenant_name: Option<&str>,
) -> Result<String, RenderError> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    loop {
        match rest.find("{{") {
            None => {
                out.push_str(rest);
                break;
            }
            Some(start) => {
                out.push_str(&rest[..start]);
                let after_open = &rest[start + 2..];
                let Some(end) = after_open.find("}}") else {
                    return Err(RenderError::UnterminatedDelimiter);
                };
                let name = after_open[..end].trim();
                if name.is_empty() {
                    return Err(RenderError::EmptyVariableName);
                }

                let rendered = variables
                    .get(name)
                    .map(Value::render)
                    .or_else(|| {
                        if name == "tenant_name" {
                            tenant_name.map(str::to_owned)
                        } else {
                            None
                        }
                    })
                    .unwrap_or_default();

                out.push_str(&rendered);
                rest = &after_open[end + 2..];
            }
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> HashMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), Value::Str(v.to_string())))
            .collect()
    }

    #[test]
    fn substitutes_known_variables() {
        let rendered = render("Hi {{name}}", &vars(&[("name", "Alice")]), None).unwrap();
        assert_eq!(rendered, "Hi Alice");
    }

    #[test]
    fn missing_variable_renders_empty() {
        let rendered = render("Hi {{name}}!", &HashMap::new(), None).unwrap();
        assert_eq!(rendered, "Hi !");
    }

    #[test]
    fn tenant_name_fallthrough() {
        let rendered = render(
            "Welcome to {{tenant_name}}",
            &HashMap::new(),
            Some("Acme"),
        )
        .unwrap();
        assert_eq!(rendered, "Welcome to Acme");
    }

    #[test]
    fn explicit_variable_wins_over_tenant_fallthrough() {
        let rendered = render(
            "{{tenant_name}}",
            &vars(&[("tenant_name", "Override")]),
            Some("Acme"),
        )
        .unwrap();
        assert_eq!(rendered, "Override");
    }

    #[test]
    fn unterminated_delimiter_is_an_error() {
        let err = render("Hi {{name", &HashMap::new(), None).unwrap_err();
        assert_eq!(err, RenderError::UnterminatedDelimiter);
    }

    #[test]
    fn empty_variable_name_is_an_error() {
        let err = render("Hi {{}}", &HashMap::new(), None).unwrap_err();
        assert_eq!(err, RenderError::EmptyVariableName);
    }

    #[test]
    fn multiple_substitutions() {
        let rendered = render(
            "{{greeting}}, {{name}}!",
            &vars(&[("greeting", "Hi"), ("name", "Bob")]),
            None,
        )
        .unwrap();
        assert_eq!(rendered, "Hi, Bob!");
    }

    #[test]
    fn no_delimiters_passes_through() {
        let rendered = render("plain text", &HashMap::new(), None).unwrap();
        assert_eq!(rendered, "plain text");
    }
}
