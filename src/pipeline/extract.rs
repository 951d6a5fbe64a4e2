//! JSON recovery from free-form model output.
//!
//! Text models asked to "return only JSON" routinely wrap it in a fenced
//! block, prepend a sentence, or append an explanation. The extractor tries a
//! fixed chain of strategies, each a pure `&str → Option<object>` function,
//! and stops at the first one that yields a JSON object:
//!
//! | # | Strategy | Input |
//! |---|----------|-------|
//! | 1 | [`parse_whole`] | entire text |
//! | 2 | [`parse_json_fence`] | ```` ```json ```` blocks, after stripping other fences |
//! | 3 | [`parse_any_fence`] | every fenced block regardless of tag |
//! | 4 | [`parse_brace_scan`] | non-greedy `{...}` substrings outside non-JSON fences |
//!
//! When all four miss, [`extract_concepts`] returns the sentinel result
//! rather than an error.

use crate::output::{Concepts, ExtractionResult, MatchValue};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::{debug, info};

/// A parsed JSON object.
pub type JsonObject = Map<String, Value>;

/// One link of the extraction chain.
pub type Strategy = fn(&str) -> Option<JsonObject>;

/// Strategies in the order they are tried.
pub const STRATEGIES: [(&str, Strategy); 4] = [
    ("whole", parse_whole),
    ("json-fence", parse_json_fence),
    ("any-fence", parse_any_fence),
    ("brace-scan", parse_brace_scan),
];

/// Accepted source keys for the subject name, in priority order.
pub const NAME_KEYS: [&str; 2] = ["姓名", "name"];

/// Accepted source keys for the signature-match flag, in priority order.
pub const MATCH_KEYS: [&str; 2] = ["签名一致", "signature_match"];

// Group 1: info string (language tag). Group 2: block body.
static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```([A-Za-z0-9_+.-]*)[ \t]*\r?\n?(.*?)```").unwrap());

static RE_BRACES: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)\{.*?\}").unwrap());

fn parse_object(candidate: &str) -> Option<JsonObject> {
    match serde_json::from_str::<Value>(candidate.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

fn is_json_tag(tag: &str) -> bool {
    tag.eq_ignore_ascii_case("json")
}

/// Strategy 1: the whole text is one JSON object.
pub fn parse_whole(text: &str) -> Option<JsonObject> {
    parse_object(text)
}

/// Remove every fenced block whose tag is not `json`.
pub fn strip_untagged_fences(text: &str) -> String {
    RE_FENCE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            if is_json_tag(&caps[1]) {
                caps[0].to_string()
            } else {
                String::new()
            }
        })
        .into_owned()
}

/// Strategy 2: first ```` ```json ```` block whose body parses.
pub fn parse_json_fence(text: &str) -> Option<JsonObject> {
    let stripped = strip_untagged_fences(text);
    RE_FENCE
        .captures_iter(&stripped)
        .filter(|caps| is_json_tag(&caps[1]))
        .find_map(|caps| parse_object(&caps[2]))
}

/// Strategy 3: first fenced block of any tag whose body parses.
pub fn parse_any_fence(text: &str) -> Option<JsonObject> {
    RE_FENCE
        .captures_iter(text)
        .find_map(|caps| parse_object(&caps[2]))
}

/// Strategy 4: first brace-delimited substring that parses.
///
/// Matching is non-greedy, so only flat objects are recovered; a nested
/// object is cut at its first `}` and fails to parse.
pub fn parse_brace_scan(text: &str) -> Option<JsonObject> {
    let stripped = strip_untagged_fences(text);
    RE_BRACES
        .find_iter(&stripped)
        .find_map(|m| parse_object(m.as_str()))
}

/// Run the chain; returns the object and the name of the strategy that hit.
pub fn recover_object(text: &str) -> Option<(&'static str, JsonObject)> {
    STRATEGIES
        .iter()
        .find_map(|(name, strategy)| strategy(text).map(|obj| (*name, obj)))
}

fn first_name(obj: &JsonObject) -> Option<String> {
    NAME_KEYS.iter().find_map(|k| match obj.get(*k) {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    })
}

/// Coerce a match flag to a strict boolean.
///
/// JSON `true`, any non-zero number, and the strings `"true"` / `"是"`
/// count as a match; everything else, including a missing key, is `false`.
fn match_flag(obj: &JsonObject) -> bool {
    let value = MATCH_KEYS
        .iter()
        .find_map(|k| obj.get(*k).filter(|v| !v.is_null()));
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|x| x != 0.0),
        Some(Value::String(s)) => {
            let s = s.trim();
            s.eq_ignore_ascii_case("true") || s == "是"
        }
        _ => false,
    }
}

/// Map a recovered object onto the two semantic fields.
pub fn concepts_from(obj: &JsonObject) -> Concepts {
    Concepts {
        name: first_name(obj).into_iter().collect(),
        signature_match: vec![MatchValue::Decided(match_flag(obj))],
    }
}

/// Recover the structured result from an extraction-stage completion.
///
/// Never fails: unparseable text yields [`Concepts::unrecognized`] with the
/// raw text kept for diagnostics.
pub fn extract_concepts(raw_text: &str) -> ExtractionResult {
    match recover_object(raw_text) {
        Some((strategy, obj)) => {
            debug!("Recovered JSON object via '{}' strategy", strategy);
            let concepts = concepts_from(&obj);
            info!(
                "Extracted: name={}, signature_match={}",
                concepts.name.first().map(String::as_str).unwrap_or("<empty>"),
                matches!(concepts.signature_match.first(), Some(MatchValue::Decided(true)))
            );
            ExtractionResult {
                concepts,
                raw: Value::Object(obj),
                strategy: Some(strategy),
            }
        }
        None => {
            info!("JSON recovery failed; returning unrecognized result");
            ExtractionResult {
                concepts: Concepts::unrecognized(),
                raw: Value::String(raw_text.to_string()),
                strategy: None,
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
