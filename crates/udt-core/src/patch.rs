//! JSON Patch codec
//!
//! Computes and applies RFC 6902 style patches restricted to the `add`,
//! `remove` and `replace` operations. Application never mutates its input
//! and never aborts: ops whose path does not resolve are skipped and
//! reported next to the new document.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::PatchError;

/// A single patch operation addressing a document by JSON pointer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
pub enum PatchOp {
    Add { path: String, value: Value },
    Remove { path: String },
    Replace { path: String, value: Value },
}

impl PatchOp {
    pub fn add(path: impl Into<String>, value: Value) -> Self {
        PatchOp::Add {
            path: path.into(),
            value,
        }
    }

    pub fn remove(path: impl Into<String>) -> Self {
        PatchOp::Remove { path: path.into() }
    }

    pub fn replace(path: impl Into<String>, value: Value) -> Self {
        PatchOp::Replace {
            path: path.into(),
            value,
        }
    }

    pub fn path(&self) -> &str {
        match self {
            PatchOp::Add { path, .. } | PatchOp::Remove { path } | PatchOp::Replace { path, .. } => {
                path
            }
        }
    }

    /// True if this op targets `/<key>` or anything below it
    pub fn touches(&self, key: &str) -> bool {
        let path = self.path();
        path.strip_prefix('/')
            .and_then(|rest| rest.strip_prefix(key))
            .map(|rest| rest.is_empty() || rest.starts_with('/'))
            .unwrap_or(false)
    }
}

/// Result of applying a patch
#[derive(Debug, Clone, PartialEq)]
pub struct PatchOutcome {
    /// The patched document
    pub document: Value,
    /// Ops that could not be applied, in patch order
    pub skipped: Vec<PatchError>,
}

impl PatchOutcome {
    pub fn is_clean(&self) -> bool {
        self.skipped.is_empty()
    }
}

/// Escape a single reference token (`~` -> `~0`, `/` -> `~1`)
pub fn escape_token(token: &str) -> String {
    token.replace('~', "~0").replace('/', "~1")
}

fn unescape_token(token: &str) -> String {
    token.replace("~1", "/").replace("~0", "~")
}

/// Build a pointer from unescaped tokens
pub fn pointer<I, S>(tokens: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    tokens
        .into_iter()
        .map(|t| format!("/{}", escape_token(t.as_ref())))
        .collect()
}

/// Compute a patch turning `old` into `new`
pub fn diff(old: &Value, new: &Value) -> Vec<PatchOp> {
    let mut ops = Vec::new();
    diff_into(&mut ops, "", old, new);
    ops
}

fn child(path: &str, token: &str) -> String {
    format!("{}/{}", path, escape_token(token))
}

fn diff_into(ops: &mut Vec<PatchOp>, path: &str, old: &Value, new: &Value) {
    if old == new {
        return;
    }

    match (old, new) {
        (Value::Object(before), Value::Object(after)) => {
            for key in before.keys().filter(|k| !after.contains_key(*k)) {
                ops.push(PatchOp::remove(child(path, key)));
            }
            for (key, value) in after {
                match before.get(key) {
                    Some(previous) => diff_into(ops, &child(path, key), previous, value),
                    None => ops.push(PatchOp::add(child(path, key), value.clone())),
                }
            }
        }
        (Value::Array(before), Value::Array(after)) => diff_arrays(ops, path, before, after),
        _ => ops.push(PatchOp::replace(path, new.clone())),
    }
}

/// Diff two arrays after trimming their common prefix and suffix
///
/// The changed middle is diffed element-wise, then the length difference is
/// made up with appends or removals at the end of the middle section.
fn diff_arrays(ops: &mut Vec<PatchOp>, path: &str, before: &[Value], after: &[Value]) {
    let prefix = before
        .iter()
        .zip(after)
        .take_while(|(a, b)| a == b)
        .count();
    let max_suffix = before.len().min(after.len()) - prefix;
    let suffix = before
        .iter()
        .rev()
        .zip(after.iter().rev())
        .take(max_suffix)
        .take_while(|(a, b)| a == b)
        .count();

    let old_mid = &before[prefix..before.len() - suffix];
    let new_mid = &after[prefix..after.len() - suffix];
    let common = old_mid.len().min(new_mid.len());

    for i in 0..common {
        diff_into(
            ops,
            &child(path, &(prefix + i).to_string()),
            &old_mid[i],
            &new_mid[i],
        );
    }

    if new_mid.len() > common {
        for (offset, value) in new_mid[common..].iter().enumerate() {
            let index = prefix + common + offset;
            ops.push(PatchOp::add(child(path, &index.to_string()), value.clone()));
        }
    } else {
        let index = (prefix + common).to_string();
        for _ in common..old_mid.len() {
            ops.push(PatchOp::remove(child(path, &index)));
        }
    }
}

/// Apply a patch to a copy of `doc`
///
/// Ops that fail are skipped; the remaining ops still apply.
pub fn apply(doc: &Value, patch: &[PatchOp]) -> PatchOutcome {
    let mut document = doc.clone();
    let mut skipped = Vec::new();

    for (index, op) in patch.iter().enumerate() {
        if let Err(reason) = apply_op(&mut document, op) {
            skipped.push(PatchError {
                index,
                path: op.path().to_string(),
                reason,
            });
        }
    }

    PatchOutcome { document, skipped }
}

fn parse_pointer(path: &str) -> Result<Vec<String>, String> {
    if path.is_empty() {
        return Ok(Vec::new());
    }
    let Some(rest) = path.strip_prefix('/') else {
        return Err("pointer must start with '/'".to_string());
    };
    Ok(rest.split('/').map(unescape_token).collect())
}

fn parse_index(token: &str) -> Result<usize, String> {
    let valid = !token.is_empty()
        && token.bytes().all(|b| b.is_ascii_digit())
        && (token == "0" || !token.starts_with('0'));
    if !valid {
        return Err(format!("'{}' is not an array index", token));
    }
    token
        .parse()
        .map_err(|_| format!("'{}' is not an array index", token))
}

fn resolve_mut<'a>(doc: &'a mut Value, tokens: &[String]) -> Result<&'a mut Value, String> {
    let mut current = doc;
    for token in tokens {
        current = match current {
            Value::Object(map) => map
                .get_mut(token)
                .ok_or_else(|| format!("no member '{}'", token))?,
            Value::Array(items) => {
                let index = parse_index(token)?;
                items
                    .get_mut(index)
                    .ok_or_else(|| format!("index {} out of bounds", index))?
            }
            _ => return Err(format!("cannot descend into scalar at '{}'", token)),
        };
    }
    Ok(current)
}

fn apply_op(doc: &mut Value, op: &PatchOp) -> Result<(), String> {
    let tokens = parse_pointer(op.path())?;
    let Some((last, parents)) = tokens.split_last() else {
        return match op {
            PatchOp::Add { value, .. } | PatchOp::Replace { value, .. } => {
                *doc = value.clone();
                Ok(())
            }
            PatchOp::Remove { .. } => Err("cannot remove the document root".to_string()),
        };
    };

    match resolve_mut(doc, parents)? {
        Value::Object(map) => match op {
            PatchOp::Add { value, .. } => {
                map.insert(last.clone(), value.clone());
            }
            PatchOp::Remove { .. } => {
                map.remove(last)
                    .ok_or_else(|| format!("no member '{}'", last))?;
            }
            PatchOp::Replace { value, .. } => {
                let slot = map
                    .get_mut(last)
                    .ok_or_else(|| format!("no member '{}'", last))?;
                *slot = value.clone();
            }
        },
        Value::Array(items) => match op {
            PatchOp::Add { value, .. } => {
                let index = if last == "-" {
                    items.len()
                } else {
                    parse_index(last)?
                };
                if index > items.len() {
                    return Err(format!("index {} out of bounds", index));
                }
                items.insert(index, value.clone());
            }
            PatchOp::Remove { .. } => {
                let index = parse_index(last)?;
                if index >= items.len() {
                    return Err(format!("index {} out of bounds", index));
                }
                items.remove(index);
            }
            PatchOp::Replace { value, .. } => {
                let index = parse_index(last)?;
                let slot = items
                    .get_mut(index)
                    .ok_or_else(|| format!("index {} out of bounds", index))?;
                *slot = value.clone();
            }
        },
        _ => return Err(format!("parent of '{}' is not a container", last)),
    }

    Ok(())
}
