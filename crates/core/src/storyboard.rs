//! Parsing of structured output produced by text backends.
//!
//! Language models wrap JSON in Markdown fences or surround it with prose,
//! so [`extract_json_block`] tries progressively looser strategies before
//! giving up. Callers decide how to degrade when parsing fails.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use serde_json::{json, Value};

use crate::error::CoreError;
use crate::scene::{Scene, DEFAULT_SCENE_DURATION};

/// Matches a fenced code block, with or without a `json` language tag.
static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").expect("valid regex"));

/// Fields every storyboard scene must carry.
const REQUIRED_SCENE_FIELDS: [&str; 3] = ["narration", "visual_prompt", "shot_type"];

/// Extract the first JSON document from model output.
///
/// Tries, in order: the whole text, the contents of a fenced block, and the
/// outermost `{...}` or `[...]` span.
pub fn extract_json_block(text: &str) -> Option<Value> {
    let trimmed = text.trim();
    if let Ok(value) = serde_json::from_str(trimmed) {
        return Some(value);
    }

    if let Some(caps) = FENCE_RE.captures(trimmed) {
        if let Ok(value) = serde_json::from_str(caps[1].trim()) {
            return Some(value);
        }
    }

    for (open, close) in [('{', '}'), ('[', ']')] {
        if let (Some(start), Some(end)) = (trimmed.find(open), trimmed.rfind(close)) {
            if start < end {
                if let Ok(value) = serde_json::from_str(&trimmed[start..=end]) {
                    return Some(value);
                }
            }
        }
    }
    None
}

/// Parse storyboard model output into scenes.
///
/// The document must be an object with a non-empty `scenes` list. Each
/// scene needs `scene_number` (or `sequence_number`), `narration`,
/// `visual_prompt` and `shot_type`; `duration` falls back to
/// [`DEFAULT_SCENE_DURATION`]. Sequence numbers must be unique and >= 1.
pub fn parse_storyboard(text: &str) -> Result<Vec<Scene>, CoreError> {
    let doc = extract_json_block(text)
        .ok_or_else(|| CoreError::Validation("Storyboard output is not valid JSON".into()))?;

    let items = doc
        .get("scenes")
        .and_then(Value::as_array)
        .ok_or_else(|| CoreError::Validation("Storyboard JSON has no 'scenes' list".into()))?;
    if items.is_empty() {
        return Err(CoreError::Validation("Storyboard 'scenes' list is empty".into()));
    }

    let mut seen = HashSet::new();
    let mut scenes = Vec::with_capacity(items.len());
    for (index, item) in items.iter().enumerate() {
        let scene = parse_scene(index, item)?;
        if !seen.insert(scene.sequence_number) {
            return Err(CoreError::Validation(format!(
                "Duplicate scene number {}",
                scene.sequence_number
            )));
        }
        scenes.push(scene);
    }
    scenes.sort_by_key(|s| s.sequence_number);
    Ok(scenes)
}

fn parse_scene(index: usize, item: &Value) -> Result<Scene, CoreError> {
    let number = item
        .get("scene_number")
        .or_else(|| item.get("sequence_number"))
        .and_then(Value::as_i64)
        .ok_or_else(|| CoreError::Validation(format!("Scene {index} has no scene_number")))?;
    let sequence_number = i32::try_from(number)
        .ok()
        .filter(|n| *n >= 1)
        .ok_or_else(|| CoreError::Validation(format!("Scene number {number} is out of range")))?;

    for field in REQUIRED_SCENE_FIELDS {
        if !item.get(field).is_some_and(Value::is_string) {
            return Err(CoreError::Validation(format!(
                "Scene {sequence_number} is missing '{field}'"
            )));
        }
    }
    let text = |field: &str| {
        item.get(field)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };

    let mut scene = Scene::new(sequence_number);
    scene.narration = text("narration");
    scene.visual_prompt = text("visual_prompt");
    scene.shot_type = text("shot_type");
    scene.duration = item
        .get("duration")
        .and_then(Value::as_f64)
        .filter(|d| *d > 0.0)
        .unwrap_or(DEFAULT_SCENE_DURATION);
    Ok(scene)
}

/// Parse a camera-movement descriptor, keeping raw text when it is not JSON.
pub fn parse_camera_movement(text: &str) -> Value {
    match extract_json_block(text) {
        Some(value @ Value::Object(_)) => value,
        _ => json!({ "raw_text": text }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    const STORYBOARD: &str = r#"Here is the storyboard:
```json
{"scenes": [
  {"scene_number": 2, "narration": "Night falls", "visual_prompt": "city at night", "shot_type": "wide"},
  {"scene_number": 1, "narration": "Dawn", "visual_prompt": "sunrise", "shot_type": "close", "duration": 4.5}
]}
```
Enjoy!"#;

    #[test]
    fn extracts_plain_json() {
        assert_eq!(extract_json_block(" {\"a\": 1} "), Some(json!({"a": 1})));
    }

    #[test]
    fn extracts_fenced_json() {
        let text = "```json\n{\"a\": [1, 2]}\n```";
        assert_eq!(extract_json_block(text), Some(json!({"a": [1, 2]})));
    }

    #[test]
    fn extracts_braced_span_from_prose() {
        let text = "Sure! {\"movement_type\": \"zoom\"} hope that helps";
        assert_eq!(
            extract_json_block(text),
            Some(json!({"movement_type": "zoom"}))
        );
    }

    #[test]
    fn non_json_returns_none() {
        assert_eq!(extract_json_block("no json here"), None);
    }

    #[test]
    fn parses_storyboard_sorted_with_default_duration() {
        let scenes = parse_storyboard(STORYBOARD).unwrap();
        assert_eq!(scenes.len(), 2);
        assert_eq!(scenes[0].sequence_number, 1);
        assert_eq!(scenes[0].duration, 4.5);
        assert_eq!(scenes[1].narration, "Night falls");
        assert_eq!(scenes[1].duration, DEFAULT_SCENE_DURATION);
    }

    #[test]
    fn rejects_missing_required_field() {
        let text = r#"{"scenes": [{"scene_number": 1, "narration": "x", "visual_prompt": "y"}]}"#;
        assert_matches!(parse_storyboard(text), Err(CoreError::Validation(msg)) if msg.contains("shot_type"));
    }

    #[test]
    fn rejects_duplicate_and_zero_numbers() {
        let dup = r#"{"scenes": [
            {"scene_number": 1, "narration": "a", "visual_prompt": "a", "shot_type": "a"},
            {"scene_number": 1, "narration": "b", "visual_prompt": "b", "shot_type": "b"}
        ]}"#;
        assert_matches!(parse_storyboard(dup), Err(CoreError::Validation(_)));

        let zero = r#"{"scenes": [{"scene_number": 0, "narration": "a", "visual_prompt": "a", "shot_type": "a"}]}"#;
        assert_matches!(parse_storyboard(zero), Err(CoreError::Validation(_)));
    }

    #[test]
    fn rejects_empty_scene_list() {
        assert_matches!(
            parse_storyboard(r#"{"scenes": []}"#),
            Err(CoreError::Validation(_))
        );
    }

    #[test]
    fn camera_movement_falls_back_to_raw_text() {
        assert_eq!(
            parse_camera_movement("slow pan left"),
            json!({"raw_text": "slow pan left"})
        );
        assert_eq!(
            parse_camera_movement(r#"{"movement_type": "pan", "params": {"speed": 1}}"#)["movement_type"],
            "pan"
        );
    }
}
