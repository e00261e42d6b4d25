//! Response cleaning: recover the JSON object from a model's raw text.
//!
//! Models asked for "JSON only" still wrap it in ```` ```json ```` fences or
//! add a sentence before or after the object. This is a best-effort
//! heuristic, not a JSON extractor: if the text has no `{ … }` pair the
//! trimmed text is returned unchanged and parsing fails downstream.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s*```(?:json|JSON)?\s*").unwrap());

/// Strip fences and surrounding prose, returning the outermost `{ … }` span.
///
/// Steps, in order:
/// 1. Remove every Markdown code-fence marker (with an optional `json` tag).
/// 2. Slice from the first `{` to the last `}` inclusive, if both exist.
/// 3. Trim surrounding whitespace.
pub fn clean_response(raw: &str) -> String {
    let text = RE_FENCE.replace_all(raw, "");

    let sliced = match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if start < end => &text[start..=end],
        _ => &text[..],
    };

    sliced.trim().to_string()
}
