//! Extraction and verdict parsing from noisy LLM output (C5 *Script Post-Processor*).
//!
//! Two independent concerns share this module because they both exist to make the rest of the
//! pipeline tolerant of whatever shape an LLM hands back: [`extract_script`] pulls a clean Robot
//! Framework script out of a draft that may carry prose, stray markdown fences, or repeated
//! section blocks (§4.4); [`parse_verdict`] recovers a [`ValidatorVerdict`] from any of the five
//! shapes a validator agent might emit it in (§4.5). Neither function ever panics on malformed
//! input — extraction degrades gracefully through its fallback chain, and verdict parsing returns
//! a `PipelineError::Generation` only once every strategy has been tried.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::PipelineError;

const SETTINGS_HEADER: &str = "*** Settings ***";
const VARIABLES_HEADER: &str = "*** Variables ***";
const TEST_CASES_HEADER: &str = "*** Test Cases ***";

/// The validator's decision on a draft script.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatorVerdict {
    pub valid: bool,
    pub reason: String,
}

/// Extract a clean script from noisy agent output, per §4.4's algorithm:
///
/// 1. Strip any opening/closing markdown code fences.
/// 2. Find `*** Settings ***` (case-insensitive); if it appears more than once, keep only the
///    text from the *last* occurrence onward — models often repeat the block, and the last copy
///    is empirically the cleanest. If it never appears, fall back to the first
///    `*** Variables ***`, then the first `*** Test Cases ***`, logging each fallback taken.
/// 3. Strip trailing blank lines.
///
/// Returns the verbatim remaining text, indentation untouched. Returns the stripped-fence input
/// unchanged (module-level fallback) if none of the three headers are present at all — the
/// caller is expected to treat that as a validator-visible structural failure rather than crash
/// extraction itself.
pub fn extract_script(raw: &str) -> String {
    let stripped = strip_code_fences(raw);

    let body = match last_occurrence_onward(&stripped, SETTINGS_HEADER) {
        Some(s) => s,
        None => {
            log::warn!("script_processor::extract_script: no '{SETTINGS_HEADER}' found, falling back to '{VARIABLES_HEADER}'");
            match first_occurrence_onward(&stripped, VARIABLES_HEADER) {
                Some(s) => s,
                None => {
                    log::warn!("script_processor::extract_script: no '{VARIABLES_HEADER}' found, falling back to '{TEST_CASES_HEADER}'");
                    match first_occurrence_onward(&stripped, TEST_CASES_HEADER) {
                        Some(s) => s,
                        None => {
                            log::warn!(
                                "script_processor::extract_script: no recognized section header found; returning fence-stripped text verbatim"
                            );
                            stripped.clone()
                        }
                    }
                }
            }
        }
    };

    strip_trailing_blank_lines(&body)
}

/// Strip a single opening ```` ```<lang> ```` fence and a single closing ```` ``` ```` fence, if
/// present. Only the outermost pair is removed here; an interior stray fence (e.g. a second code
/// block the model echoed back) is left for the section-header scan to discard.
fn strip_code_fences(raw: &str) -> String {
    let trimmed = raw.trim();
    let opening_fence = Regex::new(r"^```[a-zA-Z]*\s*\n").unwrap();
    let after_open = opening_fence.replace(trimmed, "");
    let trimmed_end = after_open.trim_end();
    let after_close = trimmed_end.strip_suffix("```").unwrap_or(trimmed_end);
    after_close.to_string()
}

fn last_occurrence_onward(haystack: &str, header: &str) -> Option<String> {
    let positions = case_insensitive_positions(haystack, header);
    positions.last().map(|&p| haystack[p..].to_string())
}

fn first_occurrence_onward(haystack: &str, header: &str) -> Option<String> {
    let positions = case_insensitive_positions(haystack, header);
    positions.first().map(|&p| haystack[p..].to_string())
}

fn case_insensitive_positions(haystack: &str, needle: &str) -> Vec<usize> {
    let haystack_lower = haystack.to_lowercase();
    let needle_lower = needle.to_lowercase();
    let mut positions = Vec::new();
    let mut start = 0;
    while let Some(found) = haystack_lower[start..].find(&needle_lower) {
        positions.push(start + found);
        start += found + needle_lower.len();
    }
    positions
}

fn strip_trailing_blank_lines(text: &str) -> String {
    text.trim_end_matches(['\n', '\r', ' ', '\t']).to_string()
}

/// Recover a [`ValidatorVerdict`] from whichever of the five forms §4.5 describes the validator
/// produced. `structured_field` is the preferred path: a task runner that already extracted a
/// typed field from the agent's native output should pass it here and skip the text strategies
/// entirely. `raw_text` is tried, in order, as: fenced JSON, a regex-extractable `{...}`
/// fragment, separate `valid`/`reason` regex matches, and finally a plain-text `VALID`/`INVALID`
/// scan (with `INVALID` outranking `VALID` when both appear).
///
/// Returns `Err(PipelineError::Generation)` with a generic parse-error message if nothing
/// matches — the raw model text is never forwarded to the caller in that case (§4.5, §7).
pub fn parse_verdict(
    raw_text: &str,
    structured_field: Option<&Value>,
) -> Result<ValidatorVerdict, PipelineError> {
    if let Some(value) = structured_field {
        if let Some(verdict) = verdict_from_value(value) {
            return Ok(verdict);
        }
    }

    if let Some(verdict) = verdict_from_fenced_json(raw_text) {
        return Ok(verdict);
    }

    if let Some(verdict) = verdict_from_bare_json(raw_text) {
        return Ok(verdict);
    }

    if let Some(verdict) = verdict_from_regex_fragment(raw_text) {
        return Ok(verdict);
    }

    if let Some(verdict) = verdict_from_separate_fields(raw_text) {
        return Ok(verdict);
    }

    if let Some(verdict) = verdict_from_plain_text(raw_text) {
        return Ok(verdict);
    }

    Err(PipelineError::Generation(
        "could not parse a validator verdict from the agent's output".to_string(),
    ))
}

fn verdict_from_value(value: &Value) -> Option<ValidatorVerdict> {
    let valid = value.get("valid")?.as_bool()?;
    let reason = value
        .get("reason")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    Some(ValidatorVerdict { valid, reason })
}

fn verdict_from_fenced_json(text: &str) -> Option<ValidatorVerdict> {
    let fence_re = Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)```").unwrap();
    for capture in fence_re.captures_iter(text) {
        let inner = capture.get(1)?.as_str().trim();
        if let Ok(value) = serde_json::from_str::<Value>(inner) {
            if let Some(verdict) = verdict_from_value(&value) {
                return Some(verdict);
            }
        }
    }
    None
}

fn verdict_from_bare_json(text: &str) -> Option<ValidatorVerdict> {
    serde_json::from_str::<Value>(text.trim())
        .ok()
        .and_then(|v| verdict_from_value(&v))
}

fn verdict_from_regex_fragment(text: &str) -> Option<ValidatorVerdict> {
    let fragment_re = Regex::new(r"\{[^{}]*\"valid\"[^{}]*\"reason\"[^{}]*\}|\{[^{}]*\"reason\"[^{}]*\"valid\"[^{}]*\}").unwrap();
    let candidate = fragment_re.find(text)?;
    serde_json::from_str::<Value>(candidate.as_str())
        .ok()
        .and_then(|v| verdict_from_value(&v))
}

fn verdict_from_separate_fields(text: &str) -> Option<ValidatorVerdict> {
    let valid_re = Regex::new(r#""?valid"?\s*[:=]\s*(true|false)"#).unwrap();
    let reason_re = Regex::new(r#""?reason"?\s*[:=]\s*"([^"]*)""#).unwrap();

    let valid = valid_re
        .captures(text)?
        .get(1)?
        .as_str()
        .eq_ignore_ascii_case("true");
    let reason = reason_re
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_default();

    Some(ValidatorVerdict { valid, reason })
}

fn verdict_from_plain_text(text: &str) -> Option<ValidatorVerdict> {
    let upper = text.to_uppercase();
    let has_invalid = upper.contains("INVALID");
    let has_valid = upper.contains("VALID");
    if !has_invalid && !has_valid {
        return None;
    }
    // INVALID outranks VALID since it also contains the substring "VALID".
    let valid = !has_invalid;
    Some(ValidatorVerdict {
        valid,
        reason: text.trim().to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_script_keeps_last_settings_block() {
        let raw = format!(
            "Here is the script:\n{SETTINGS_HEADER}\nLibrary    Browser\n\nOn second thought:\n{SETTINGS_HEADER}\nLibrary    Browser\n{TEST_CASES_HEADER}\nTest\n    Click    css:.x\n\n\n"
        );
        let extracted = extract_script(&raw);
        assert_eq!(extracted.matches(SETTINGS_HEADER).count(), 1);
        assert!(extracted.starts_with(SETTINGS_HEADER));
        assert!(!extracted.ends_with('\n'));
    }

    #[test]
    fn extract_script_strips_code_fences() {
        let raw = format!("```robotframework\n{SETTINGS_HEADER}\nLibrary    Browser\n```");
        let extracted = extract_script(&raw);
        assert!(extracted.starts_with(SETTINGS_HEADER));
        assert!(!extracted.contains("```"));
    }

    #[test]
    fn extract_script_falls_back_to_variables_then_test_cases() {
        let raw = format!("prose\n{VARIABLES_HEADER}\n${{URL}}    https://example.com\n");
        let extracted = extract_script(&raw);
        assert!(extracted.starts_with(VARIABLES_HEADER));

        let raw2 = format!("prose\n{TEST_CASES_HEADER}\nTest\n    Click    css:.x\n");
        let extracted2 = extract_script(&raw2);
        assert!(extracted2.starts_with(TEST_CASES_HEADER));
    }

    #[test]
    fn parse_verdict_prefers_structured_field() {
        let structured = serde_json::json!({"valid": true, "reason": "looks fine"});
        let verdict = parse_verdict("garbage text", Some(&structured)).unwrap();
        assert!(verdict.valid);
        assert_eq!(verdict.reason, "looks fine");
    }

    #[test]
    fn parse_verdict_handles_fenced_json_with_surrounding_prose() {
        let text = "Here's my review.\n```json\n{\"valid\": true, \"reason\": \"ok\"}\n```\nThanks.";
        let verdict = parse_verdict(text, None).unwrap();
        assert!(verdict.valid);
        assert_eq!(verdict.reason, "ok");
    }

    #[test]
    fn parse_verdict_handles_bare_json() {
        let text = "{\"valid\": false, \"reason\": \"missing teardown\"}";
        let verdict = parse_verdict(text, None).unwrap();
        assert!(!verdict.valid);
        assert_eq!(verdict.reason, "missing teardown");
    }

    #[test]
    fn parse_verdict_handles_regex_fragment_in_prose() {
        let text = "The verdict is {\"valid\": false, \"reason\": \"bad locator\"} per my analysis.";
        let verdict = parse_verdict(text, None).unwrap();
        assert!(!verdict.valid);
        assert_eq!(verdict.reason, "bad locator");
    }

    #[test]
    fn parse_verdict_handles_separate_field_matches() {
        let text = "valid: true\nreason: \"structure looks correct\"\nextra commentary";
        let verdict = parse_verdict(text, None).unwrap();
        assert!(verdict.valid);
        assert_eq!(verdict.reason, "structure looks correct");
    }

    #[test]
    fn parse_verdict_handles_plain_text_invalid_outranking_valid() {
        let text = "This script is INVALID because VALID syntax is missing a teardown.";
        let verdict = parse_verdict(text, None).unwrap();
        assert!(!verdict.valid);
    }

    #[test]
    fn parse_verdict_handles_plain_text_valid_only() {
        let text = "The script looks VALID to me.";
        let verdict = parse_verdict(text, None).unwrap();
        assert!(verdict.valid);
    }

    #[test]
    fn parse_verdict_fails_with_generic_message_when_unparseable() {
        let err = parse_verdict("absolutely nothing useful here", None).unwrap_err();
        assert!(matches!(err, PipelineError::Generation(_)));
    }

    #[test]
    fn five_forms_agree_with_a_reference_json_verdict() {
        let reference = ValidatorVerdict {
            valid: true,
            reason: "ok".to_string(),
        };
        let forms = [
            "{\"valid\": true, \"reason\": \"ok\"}".to_string(),
            "```json\n{\"valid\": true, \"reason\": \"ok\"}\n```".to_string(),
            "The verdict: {\"valid\": true, \"reason\": \"ok\"} end.".to_string(),
            "valid: true\nreason: \"ok\"".to_string(),
        ];
        for form in forms {
            assert_eq!(parse_verdict(&form, None).unwrap(), reference);
        }
    }
}
