//! Scene Dataset: per-scene records threaded through stage payloads.
//!
//! Scenes live inside stage input/output payloads as
//! `{"scenes": [{"sequence_number": 1, ...}, ...]}`. Later stages only ever
//! *augment* a scene: every write goes through [`ScenePatch`], which touches
//! the patched fields of one scene and leaves all sibling scenes, and every
//! other field of the patched scene, exactly as they were.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::CoreError;

/// Duration assigned to a scene when the storyboard backend omits it.
pub const DEFAULT_SCENE_DURATION: f64 = 3.0;

/// Key of the scene list inside a stage payload.
pub const SCENES_KEY: &str = "scenes";

/// Key identifying a scene inside the scene list.
pub const SEQUENCE_KEY: &str = "sequence_number";

fn default_duration() -> f64 {
    DEFAULT_SCENE_DURATION
}

// ---------------------------------------------------------------------------
// Scene
// ---------------------------------------------------------------------------

/// One storyboard unit and everything later stages attach to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    /// 1-based, unique within a project.
    pub sequence_number: i32,
    #[serde(default)]
    pub narration: String,
    #[serde(default)]
    pub visual_prompt: String,
    #[serde(default)]
    pub shot_type: String,
    #[serde(default = "default_duration")]
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub image_urls: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub camera_movement: Option<Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub video_urls: Vec<String>,
}

impl Scene {
    pub fn new(sequence_number: i32) -> Self {
        Self {
            sequence_number,
            narration: String::new(),
            visual_prompt: String::new(),
            shot_type: String::new(),
            duration: DEFAULT_SCENE_DURATION,
            image_urls: Vec::new(),
            camera_movement: None,
            video_urls: Vec::new(),
        }
    }
}

/// Read the scene list of a payload, sorted by sequence number.
///
/// A payload without a `scenes` key yields an empty list; a malformed
/// entry is a validation error.
pub fn read_scenes(payload: &Value) -> Result<Vec<Scene>, CoreError> {
    let Some(list) = payload.get(SCENES_KEY) else {
        return Ok(Vec::new());
    };
    let mut scenes: Vec<Scene> = serde_json::from_value(list.clone())
        .map_err(|e| CoreError::Validation(format!("Malformed scene list: {e}")))?;
    scenes.sort_by_key(|s| s.sequence_number);
    Ok(scenes)
}

/// Find the raw JSON object for one scene.
pub fn find_scene(payload: &Value, sequence_number: i32) -> Option<&Value> {
    payload
        .get(SCENES_KEY)?
        .as_array()?
        .iter()
        .find(|item| scene_number_of(item) == Some(sequence_number))
}

/// Restrict a scene list to the selected sequence numbers, if any.
pub fn select_scenes(scenes: Vec<Scene>, selector: Option<&[i32]>) -> Vec<Scene> {
    match selector {
        Some(wanted) => scenes
            .into_iter()
            .filter(|s| wanted.contains(&s.sequence_number))
            .collect(),
        None => scenes,
    }
}

fn scene_number_of(item: &Value) -> Option<i32> {
    item.get(SEQUENCE_KEY)
        .and_then(Value::as_i64)
        .and_then(|n| i32::try_from(n).ok())
}

// ---------------------------------------------------------------------------
// ScenePatch
// ---------------------------------------------------------------------------

/// A field-level update to one scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScenePatch {
    pub sequence_number: i32,
    pub fields: Map<String, Value>,
}

impl ScenePatch {
    pub fn new(sequence_number: i32) -> Self {
        Self {
            sequence_number,
            fields: Map::new(),
        }
    }

    /// Set one field of the patch.
    pub fn set(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_string(), value.into());
        self
    }

    /// Build a patch carrying every field of `scene`.
    pub fn from_scene(scene: &Scene) -> Result<Self, CoreError> {
        match serde_json::to_value(scene) {
            Ok(Value::Object(mut fields)) => {
                fields.remove(SEQUENCE_KEY);
                Ok(Self {
                    sequence_number: scene.sequence_number,
                    fields,
                })
            }
            Ok(_) => Err(CoreError::Internal("Scene did not serialize to an object".into())),
            Err(e) => Err(CoreError::Internal(format!("Scene serialization failed: {e}"))),
        }
    }

    /// Apply this patch to a payload in place.
    ///
    /// The payload is coerced to an object and given a `scenes` list if it
    /// lacks one. If no scene with this sequence number exists yet it is
    /// appended rather than dropped.
    pub fn apply(&self, payload: &mut Value) {
        let Value::Array(scenes) = scenes_entry(payload) else {
            return;
        };
        let existing = scenes
            .iter_mut()
            .find(|item| scene_number_of(item) == Some(self.sequence_number));

        match existing {
            Some(Value::Object(scene)) => {
                for (key, value) in &self.fields {
                    scene.insert(key.clone(), value.clone());
                }
            }
            Some(other) => {
                *other = self.to_object();
            }
            None => scenes.push(self.to_object()),
        }
    }

    fn to_object(&self) -> Value {
        let mut scene = Map::with_capacity(self.fields.len() + 1);
        scene.insert(SEQUENCE_KEY.to_string(), Value::from(self.sequence_number));
        for (key, value) in &self.fields {
            scene.insert(key.clone(), value.clone());
        }
        Value::Object(scene)
    }
}

/// The `scenes` entry of a payload, coerced to an array. A payload that is
/// not an object becomes an empty one.
fn scenes_entry(payload: &mut Value) -> &mut Value {
    if !payload.is_object() {
        *payload = Value::Object(Map::new());
    }
    let entry = &mut payload[SCENES_KEY];
    if !entry.is_array() {
        *entry = Value::Array(Vec::new());
    }
    entry
}

/// Merge an incoming payload into an existing one.
///
/// Top-level keys other than `scenes` are overwritten; each incoming scene
/// is applied as a [`ScenePatch`], so scenes absent from `incoming` keep
/// their stored data.
pub fn merge_payload(existing: &mut Value, incoming: &Value) {
    if !existing.is_object() {
        *existing = Value::Object(Map::new());
    }
    let Some(incoming) = incoming.as_object() else {
        return;
    };

    for (key, value) in incoming {
        if key == SCENES_KEY {
            continue;
        }
        if let Value::Object(map) = existing {
            map.insert(key.clone(), value.clone());
        }
    }

    if let Some(Value::Array(items)) = incoming.get(SCENES_KEY) {
        for item in items {
            let (Some(number), Value::Object(fields)) = (scene_number_of(item), item) else {
                continue;
            };
            let mut fields = fields.clone();
            fields.remove(SEQUENCE_KEY);
            ScenePatch {
                sequence_number: number,
                fields,
            }
            .apply(existing);
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
