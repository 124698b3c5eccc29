//! Parsing of the model's textual reply into analysis records
//!
//! The model is asked for a list of dictionaries. In practice the reply is
//! either JSON or a Python literal (single quotes, `True`/`False`/`None`),
//! frequently wrapped in a Markdown code fence. Both are accepted.

use serde_json::Value;

use crate::analyzer::AnalysisRecord;

/// Parse a model reply. Unparseable replies yield no records.
pub fn parse_reply(reply: &str) -> Vec<AnalysisRecord> {
    match try_parse_reply(reply) {
        Ok(records) => records,
        Err(err) => {
            tracing::error!(error = %err, reply = %reply, "Failed to parse analyzer reply");
            Vec::new()
        }
    }
}

/// Parse a model reply, reporting why it could not be understood
pub fn try_parse_reply(reply: &str) -> Result<Vec<AnalysisRecord>, String> {
    let body = strip_code_fence(reply);
    if body.is_empty() {
        return Err("empty reply".to_string());
    }

    let value = match serde_json::from_str::<Value>(body) {
        Ok(value) => value,
        Err(_) => {
            let translated = python_literal_to_json(body);
            serde_json::from_str::<Value>(&translated)
                .map_err(|e| format!("reply is neither JSON nor a Python literal: {}", e))?
        }
    };

    into_records(value)
}

fn into_records(value: Value) -> Result<Vec<AnalysisRecord>, String> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(fields) => Ok(AnalysisRecord::new(fields)),
                other => Err(format!("item {} is not an object: {}", i, other)),
            })
            .collect(),
        Value::Object(fields) => Ok(vec![AnalysisRecord::new(fields)]),
        other => Err(format!("expected a list of objects, got {}", other)),
    }
}

/// Remove a surrounding Markdown code fence, with or without a language tag
fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    // Drop the language tag line ("json", "python", or nothing)
    let rest = match rest.find('\n') {
        Some(idx) => &rest[idx + 1..],
        None => rest,
    };

    rest.trim_end()
        .strip_suffix("```")
        .unwrap_or(rest)
        .trim()
}

/// Rewrite Python literal syntax as JSON.
///
/// Handles single-quoted strings, `True`/`False`/`None`, and trailing commas
/// before a closing bracket. Double-quoted strings are copied unchanged.
fn python_literal_to_json(src: &str) -> String {
    let mut out = String::with_capacity(src.len());
    let mut chars = src.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' => {
                out.push('"');
                while let Some(ch) = chars.next() {
                    match ch {
                        '\\' => match chars.next() {
                            Some('\'') => out.push('\''),
                            Some(escaped) => {
                                out.push('\\');
                                out.push(escaped);
                            }
                            None => out.push_str("\\\\"),
                        },
                        '\'' => break,
                        '"' => out.push_str("\\\""),
                        other => out.push(other),
                    }
                }
                out.push('"');
            }
            '"' => {
                out.push('"');
                while let Some(ch) = chars.next() {
                    out.push(ch);
                    match ch {
                        '\\' => {
                            if let Some(escaped) = chars.next() {
                                out.push(escaped);
                            }
                        }
                        '"' => break,
                        _ => {}
                    }
                }
            }
            ']' | '}' => {
                let kept = out.trim_end().len();
                if out[..kept].ends_with(',') {
                    out.truncate(kept - 1);
                }
                out.push(c);
            }
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut ident = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        ident.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                match ident.as_str() {
                    "True" => out.push_str("true"),
                    "False" => out.push_str("false"),
                    "None" => out.push_str("null"),
                    _ => out.push_str(&ident),
                }
            }
            other => out.push(other),
        }
    }

    out
}
