//! Recovery of a [`Plan`] from raw model text.
//!
//! Models wrap JSON in prose and code fences, and token limits cut responses off
//! mid-string. The chain here is `raw text -> candidate substring -> parsed plan`,
//! with a handful of minimal repairs for truncated output. Nothing in this module
//! ever interprets the text as anything but data.

use serde_json::Value;

use crate::core::plan::Plan;

/// Fixed closing suffixes tried after the computed repairs.
const REPAIR_SUFFIXES: &[&str] = &["\"}", "\"]}", "\"}]}", "}", "]}", "}]}", "\"]}]}"];

/// Substrings of a model response that may hold the plan object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Extracted<'a> {
    /// From the first `{` to the last `}` (inclusive).
    pub candidate: &'a str,
    /// From the first `{` to the end of the region, for repairing truncated output.
    pub open_tail: &'a str,
}

/// Locate the JSON object inside a model response.
///
/// A code fence (with optional language tag) is stripped when it opens before
/// the first `{`; a closing fence ends the region. Returns `None` when no `{`
/// is present at all.
pub fn extract(raw: &str) -> Option<Extracted<'_>> {
    let mut text = raw.trim();
    if let Some(fence) = text.find("```")
        && text.find('{').is_none_or(|brace| fence < brace)
    {
        let after = &text[fence + 3..];
        let after = match after.find('\n') {
            Some(nl) if after[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
                &after[nl + 1..]
            }
            _ => after,
        };
        text = match after.find("```") {
            Some(end) => &after[..end],
            None => after,
        };
    }

    let open = text.find('{')?;
    let open_tail = text[open..].trim_end();
    let candidate = match text.rfind('}') {
        Some(close) if close > open => &text[open..=close],
        _ => open_tail,
    };
    Some(Extracted {
        candidate,
        open_tail,
    })
}

/// Extract, strictly parse, and if needed repair a plan from raw model text.
pub fn parse_plan(raw: &str) -> Result<Plan, String> {
    let extracted = extract(raw).ok_or_else(|| "no JSON object in model output".to_string())?;

    let strict_err = match parse_strict(extracted.candidate) {
        Ok(plan) => return Ok(plan),
        Err(err) => err,
    };

    let mut bases = vec![extracted.open_tail];
    if extracted.candidate != extracted.open_tail {
        bases.push(extracted.candidate);
    }
    for base in bases {
        for repaired in repair_candidates(base) {
            if let Ok(plan) = parse_strict(&repaired) {
                return Ok(plan);
            }
        }
    }
    Err(strict_err)
}

/// Parse text as JSON and check it against the plan schema.
pub fn parse_strict(text: &str) -> Result<Plan, String> {
    let value: Value = serde_json::from_str(text).map_err(|err| format!("invalid json: {err}"))?;
    Plan::from_value(value).map_err(|err| format!("plan schema: {err}"))
}

/// Repaired variants of possibly-truncated JSON, most specific first.
pub fn repair_candidates(text: &str) -> Vec<String> {
    let scan = scan(text);
    let mut out = vec![close_truncated(text, &scan)];
    if let Some((pos, stack)) = &scan.last_member_end {
        let mut cut = text[..*pos].to_string();
        cut.push_str(&closers(stack));
        out.push(cut);
    }
    for suffix in REPAIR_SUFFIXES {
        out.push(format!("{text}{suffix}"));
    }
    out.dedup();
    out
}

#[derive(Debug, Default)]
struct Scan {
    /// Expected closing characters for the containers still open at the end.
    stack: Vec<char>,
    in_string: bool,
    escaped: bool,
    /// Byte offset of the last `,` outside a string, with the open containers there.
    last_member_end: Option<(usize, Vec<char>)>,
}

fn scan(text: &str) -> Scan {
    let mut scan = Scan::default();
    for (i, ch) in text.char_indices() {
        if scan.in_string {
            if scan.escaped {
                scan.escaped = false;
            } else if ch == '\\' {
                scan.escaped = true;
            } else if ch == '"' {
                scan.in_string = false;
            }
            continue;
        }
        match ch {
            '"' => scan.in_string = true,
            '{' => scan.stack.push('}'),
            '[' => scan.stack.push(']'),
            '}' | ']' => {
                scan.stack.pop();
            }
            ',' => scan.last_member_end = Some((i, scan.stack.clone())),
            _ => {}
        }
    }
    scan
}

fn close_truncated(text: &str, scan: &Scan) -> String {
    let mut out = text.to_string();
    if scan.in_string {
        if scan.escaped {
            out.pop();
        }
        out.push('"');
    }
    out.truncate(out.trim_end().len());
    if out.ends_with(',') {
        out.pop();
    } else if out.ends_with(':') {
        out.push_str("null");
    }
    out.push_str(&closers(&scan.stack));
    out
}

fn closers(stack: &[char]) -> String {
    stack.iter().rev().collect()
}
