use std::collections::HashMap;

use crate::config::Subscription;

/// Template variables substituted into query payloads.
///
/// Passed explicitly to whatever needs substitution; there is no ambient
/// process-wide variable registry. Both `$name` and `${name}` forms are
/// replaced; unknown variables are left untouched.
#[derive(Debug, Clone, Default)]
pub struct TemplateVars {
    values: HashMap<String, String>,
}

impl TemplateVars {
    pub fn new(values: HashMap<String, String>) -> Self {
        Self { values }
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replaces every `$name` / `${name}` occurrence in `input`.
    pub fn replace(&self, input: &str) -> String {
        let mut out = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(pos) = rest.find('$') {
            out.push_str(&rest[..pos]);
            rest = &rest[pos..];

            let (consumed, replacement) = self.match_variable(rest);
            match replacement {
                Some(value) => out.push_str(value),
                None => out.push_str(&rest[..consumed]),
            }
            rest = &rest[consumed..];
        }

        out.push_str(rest);
        out
    }

    /// Applies substitution to a subscription's query payload.
    pub fn apply(&self, sub: &Subscription) -> Subscription {
        Subscription {
            query: self.replace(&sub.query),
            ..sub.clone()
        }
    }

    /// Matches a variable reference at the start of `input` (which begins
    /// with `$`). Returns how many bytes the reference spans and the value
    /// it resolves to, if any.
    fn match_variable<'a>(&'a self, input: &str) -> (usize, Option<&'a str>) {
        let after = &input[1..];

        if let Some(body) = after.strip_prefix('{') {
            let Some(end) = body.find('}') else {
                return (1, None);
            };
            let name = &body[..end];
            // `${name}` spans "$", "{", name, "}".
            return (name.len() + 3, self.values.get(name).map(String::as_str));
        }

        let name_len = after
            .find(|c: char| !c.is_ascii_alphanumeric() && c != '_')
            .unwrap_or(after.len());
        if name_len == 0 {
            return (1, None);
        }

        let name = &after[..name_len];
        (name_len + 1, self.values.get(name).map(String::as_str))
    }
}
