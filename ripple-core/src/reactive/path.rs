//! Dotted watch paths.

use crate::value::Value;

/// A parsed `a.b.c` path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathGetter {
    segments: Vec<String>,
}

/// Parse a dot-delimited path made of word characters and `$`.
///
/// Anything else (brackets, operators, whitespace) is rejected; callers that
/// need more should watch a function instead.
pub fn parse_path(path: &str) -> Option<PathGetter> {
    let valid = path
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$' || c == '.');
    if !valid {
        return None;
    }
    Some(PathGetter {
        segments: path.split('.').map(str::to_owned).collect(),
    })
}

impl PathGetter {
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Walk the path from `root`. Never panics: any null intermediate, missing
    /// key, or primitive in the middle resolves to `None`.
    pub fn resolve(&self, root: &Value) -> Option<Value> {
        let mut current = root.clone();
        for segment in &self.segments {
            current = match &current {
                Value::Object(object) => object.get(segment)?,
                Value::Array(array) if segment == "length" => Value::from(array.len()),
                Value::Array(array) => array.get(segment.parse().ok()?)?,
                _ => return None,
            };
        }
        Some(current)
    }
}
