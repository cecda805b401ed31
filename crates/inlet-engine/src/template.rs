//! Variable substitution for work-item-scoped strings.
//!
//! Templates reference dynamic parameters as `{{name}}`. Unknown
//! variables are left in place so a transport can report them verbatim.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{Map, Value};

static VAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{([A-Za-z_][A-Za-z0-9_.]*)\}\}").expect("valid variable regex")
});

/// Render a parameter value into a template. Strings are inserted bare;
/// other JSON values use their compact serialization.
fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Substitute `{{name}}` placeholders from `params` into `template`.
///
/// Returns the rendered string and the parameters that were *not*
/// consumed by the substitution, so callers can forward leftovers (e.g.
/// as query parameters or request fields).
#[must_use]
pub fn substitute(
    template: &str,
    params: &Map<String, Value>,
) -> (String, Map<String, Value>) {
    let mut consumed: HashSet<String> = HashSet::new();
    let result = VAR_RE.replace_all(template, |caps: &regex::Captures<'_>| {
        let name = &caps[1];
        match params.get(name) {
            Some(value) => {
                consumed.insert(name.to_string());
                render(value)
            }
            None => caps[0].to_string(),
        }
    });

    let remaining = params
        .iter()
        .filter(|(name, _)| !consumed.contains(name.as_str()))
        .map(|(name, value)| (name.clone(), value.clone()))
        .collect();

    (result.into_owned(), remaining)
}
