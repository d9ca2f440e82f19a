//! Placeholder substitution for stored and inline email templates.
//!
//! Templates carry `{{ path }}` tokens resolved against the job's variable
//! bag. Resolution is a pure function of the template and the variables, so
//! resolving twice always yields identical output.
//!
//! Lookup rules per token (path is dot-separated):
//! - map keys are matched exactly first, then case-insensitively
//! - a non-negative integer segment indexes into a sequence
//! - a multi-segment path that misses anywhere resolves to ""
//! - a single-segment path that misses at the top level falls back to a
//!   depth-first search of the whole tree for the first map owning the key.
//!   This is a best-effort convenience for templates that name a variable
//!   without knowing its nesting depth, not a strict schema-bound lookup.

use serde_json::Value;
use std::collections::HashSet;

/// Replace every `{{ path }}` token in `template` with its resolved value.
///
/// Whitespace around the path is insignificant; an unterminated `{{` is
/// copied through verbatim.
pub fn resolve(template: &str, variables: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let path = after[..end].trim();
                out.push_str(&lookup(path, variables));
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

fn lookup(path: &str, root: &Value) -> String {
    let mut segments = path.split('.');
    let first = segments.next().unwrap_or("");
    let tail: Vec<&str> = segments.collect();

    if tail.is_empty() {
        // Single segment: direct lookup, then the recursive tree fallback.
        return match step(root, first) {
            Some(found) => stringify(found),
            None => find_key_anywhere(root, first)
                .map(stringify)
                .unwrap_or_default(),
        };
    }

    // Multi-segment: strict descent, no recursive fallback.
    let mut cur = match step(root, first) {
        Some(next) => next,
        None => return String::new(),
    };
    for segment in tail {
        match step(cur, segment) {
            Some(next) => cur = next,
            None => return String::new(),
        }
    }
    stringify(cur)
}

/// Descend one path segment: map key (exact, then case-insensitive) or
/// sequence index.
fn step<'a>(cur: &'a Value, segment: &str) -> Option<&'a Value> {
    match cur {
        Value::Object(map) => map.get(segment).or_else(|| {
            let lowered = segment.to_lowercase();
            map.iter()
                .find(|(key, _)| key.to_lowercase() == lowered)
                .map(|(_, value)| value)
        }),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(text) => text.clone(),
        Value::Bool(flag) => flag.to_string(),
        Value::Number(number) => number.to_string(),
        // Maps and sequences fall back to their compact JSON text.
        structured => structured.to_string(),
    }
}

/// Depth-first search for the first map anywhere in `root` that owns `key`.
///
/// General-purpose "find a key in a possibly-cyclic nested structure"
/// utility: visited container identities guard against cycles, so it stays
/// safe even for tree-shaped values that alias or (in other value models)
/// loop back on themselves.
pub fn find_key_anywhere<'a>(root: &'a Value, key: &str) -> Option<&'a Value> {
    let mut visited: HashSet<*const Value> = HashSet::new();
    let mut stack: Vec<&'a Value> = vec![root];
    while let Some(node) = stack.pop() {
        match node {
            Value::Object(map) => {
                if !visited.insert(node as *const Value) {
                    continue;
                }
                if let Some(found) = map.get(key) {
                    return Some(found);
                }
                // Children pushed in reverse so earlier entries are searched first.
                for child in map.values().rev() {
                    stack.push(child);
                }
            }
            Value::Array(items) => {
                if !visited.insert(node as *const Value) {
                    continue;
                }
                for child in items.iter().rev() {
                    stack.push(child);
                }
            }
            _ => {}
        }
    }
    None
}
