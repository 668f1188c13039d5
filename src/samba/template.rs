//! smb.conf template rendering
//!
//! Templates use `{{ key }}` placeholders. Every placeholder must resolve to
//! a value in the [`RenderContext`]; a missing key or an unterminated tag is
//! a render error, never an empty substitution.

use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Built-in template shipped with the binary
pub const DEFAULT_TEMPLATE: &str = include_str!("../../templates/smb.conf.tmpl");

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

/// Values available to a template
#[derive(Debug, Clone, Default)]
pub struct RenderContext {
    values: BTreeMap<String, String>,
}

impl RenderContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Insert a setting value, flattened to its smb.conf spelling
    pub fn insert_json(&mut self, key: impl Into<String>, value: &serde_json::Value) {
        self.insert(key, json_to_conf(value));
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }
}

/// Booleans become `yes`/`no`, arrays are space separated
pub fn json_to_conf(value: &serde_json::Value) -> String {
    use serde_json::Value;
    match value {
        Value::Null => String::new(),
        Value::Bool(true) => "yes".to_string(),
        Value::Bool(false) => "no".to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(json_to_conf)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(" "),
        Value::Object(_) => value.to_string(),
    }
}

fn line_of(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}

/// Render `source` against `ctx`
pub fn render(source: &str, ctx: &RenderContext) -> Result<String> {
    let mut out = String::with_capacity(source.len() * 2);
    let mut rest = source;
    let mut consumed = 0;

    while let Some(start) = rest.find(OPEN) {
        out.push_str(&rest[..start]);

        let after_open = &rest[start + OPEN.len()..];
        let end = after_open.find(CLOSE).ok_or_else(|| {
            Error::TemplateRender(format!(
                "unterminated tag at line {}",
                line_of(source, consumed + start)
            ))
        })?;

        let key = after_open[..end].trim();
        if key.is_empty() || key.contains(OPEN) {
            return Err(Error::TemplateRender(format!(
                "malformed tag at line {}",
                line_of(source, consumed + start)
            )));
        }

        let value = ctx.get(key).ok_or_else(|| {
            Error::TemplateRender(format!(
                "unknown placeholder '{}' at line {}",
                key,
                line_of(source, consumed + start)
            ))
        })?;
        out.push_str(value);

        let advance = start + OPEN.len() + end + CLOSE.len();
        consumed += advance;
        rest = &rest[advance..];
    }

    out.push_str(rest);
    Ok(out)
}
