//! Assistant definitions loaded from YAML
//!
//! Files may compose other files and read the environment:
//! - `$include: other.yaml` replaces the mapping with the included file,
//!   sibling keys are merged over it
//! - `${ENV_VAR:default}` is expanded in every string
//!
//! ```yaml
//! assistants:
//!   - id: support
//!     name: Support bot
//!     metadata:
//!       graph_id: support
//!     graph:
//!       $include: graphs/support.yaml
//!       config:
//!         model: ${SUPPORT_MODEL:gpt-4o-mini}
//! ```

use crate::config::server::ServerConfigError;
use duragraph_core::graph::GraphDefinition;
use duragraph_core::StateMap;
use serde::Deserialize;
use serde_json::Value as JsonValue;
use serde_yaml::Value as YamlValue;
use std::env;
use std::fs;
use std::path::Path;

/// Nested includes deeper than this are treated as a cycle
const MAX_INCLUDE_DEPTH: usize = 16;

/// One preloaded assistant, optionally with its graph
#[derive(Debug, Clone, Deserialize)]
pub struct AssistantDefinition {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub metadata: StateMap,
    #[serde(default)]
    pub config: StateMap,
    #[serde(default)]
    pub graph: Option<GraphDefinition>,
}

#[derive(Debug, Deserialize)]
struct AssistantsFile {
    #[serde(default)]
    assistants: Vec<AssistantDefinition>,
}

/// Load the assistant definitions of a YAML file
pub fn load_assistants<P: AsRef<Path>>(path: P) -> Result<Vec<AssistantDefinition>, ServerConfigError> {
    let yaml = load_yaml_file(path)?;
    let file: AssistantsFile = serde_json::from_value(yaml_to_json(&yaml)?).map_err(|e| {
        ServerConfigError::InvalidConfig(format!("invalid assistant definitions: {e}"))
    })?;
    Ok(file.assistants)
}

/// Load and parse a YAML file with includes resolved and variables expanded
pub fn load_yaml_file<P: AsRef<Path>>(path: P) -> Result<YamlValue, ServerConfigError> {
    load_with_depth(path.as_ref(), 0)
}

fn load_with_depth(path: &Path, depth: usize) -> Result<YamlValue, ServerConfigError> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(ServerConfigError::InvalidConfig(format!(
            "include depth exceeded at {}",
            path.display()
        )));
    }

    let content = fs::read_to_string(path).map_err(|source| ServerConfigError::ReadError {
        path: path.to_path_buf(),
        source,
    })?;
    let mut value: YamlValue = serde_yaml::from_str(&content)?;

    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    process_includes(&mut value, base_dir, depth)?;
    expand_variables(&mut value);

    Ok(value)
}

fn process_includes(value: &mut YamlValue, base_dir: &Path, depth: usize) -> Result<(), ServerConfigError> {
    match value {
        YamlValue::Mapping(map) => {
            let include_key = YamlValue::String("$include".to_string());
            if let Some(YamlValue::String(include_path)) = map.remove(&include_key) {
                let mut included = load_with_depth(&base_dir.join(include_path), depth + 1)?;
                let mut overrides = YamlValue::Mapping(std::mem::take(map));
                process_includes(&mut overrides, base_dir, depth)?;
                deep_merge(&mut included, &overrides);
                *value = included;
                return Ok(());
            }

            for (_, v) in map.iter_mut() {
                process_includes(v, base_dir, depth)?;
            }
        }
        YamlValue::Sequence(seq) => {
            for item in seq.iter_mut() {
                process_includes(item, base_dir, depth)?;
            }
        }
        _ => {}
    }

    Ok(())
}

fn expand_variables(value: &mut YamlValue) {
    match value {
        YamlValue::String(s) => {
            if let Some(expanded) = expand_env_in_string(s) {
                *s = expanded;
            }
        }
        YamlValue::Mapping(map) => {
            for (_, v) in map.iter_mut() {
                expand_variables(v);
            }
        }
        YamlValue::Sequence(seq) => {
            for item in seq.iter_mut() {
                expand_variables(item);
            }
        }
        _ => {}
    }
}

/// Expand `${ENV_VAR:default}` occurrences; `None` when there is nothing to expand
fn expand_env_in_string(s: &str) -> Option<String> {
    if !s.contains("${") {
        return None;
    }

    let re = regex::Regex::new(r"\$\{([^:}]+)(?::([^}]*))?\}").ok()?;
    let expanded = re.replace_all(s, |cap: &regex::Captures<'_>| {
        let default_value = cap.get(2).map(|m| m.as_str()).unwrap_or("");
        env::var(&cap[1]).unwrap_or_else(|_| default_value.to_string())
    });
    Some(expanded.into_owned())
}

fn yaml_to_json(yaml: &YamlValue) -> Result<JsonValue, ServerConfigError> {
    match yaml {
        YamlValue::Null => Ok(JsonValue::Null),
        YamlValue::Bool(b) => Ok(JsonValue::Bool(*b)),
        YamlValue::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(JsonValue::Number(i.into()))
            } else if let Some(u) = n.as_u64() {
                Ok(JsonValue::Number(u.into()))
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(JsonValue::Number)
                    .ok_or_else(|| ServerConfigError::InvalidConfig(format!("invalid number: {n}")))
            }
        }
        YamlValue::String(s) => Ok(JsonValue::String(s.clone())),
        YamlValue::Sequence(seq) => Ok(JsonValue::Array(
            seq.iter().map(yaml_to_json).collect::<Result<_, _>>()?,
        )),
        YamlValue::Mapping(map) => {
            let mut json_map = serde_json::Map::new();
            for (k, v) in map {
                let YamlValue::String(key) = k else {
                    return Err(ServerConfigError::InvalidConfig(
                        "map keys must be strings".to_string(),
                    ));
                };
                json_map.insert(key.clone(), yaml_to_json(v)?);
            }
            Ok(JsonValue::Object(json_map))
        }
        YamlValue::Tagged(tagged) => yaml_to_json(&tagged.value),
    }
}

/// Merge `other` into `base`; mappings merge per key, anything else is replaced
pub fn deep_merge(base: &mut YamlValue, other: &YamlValue) {
    match (base, other) {
        (YamlValue::Mapping(base_map), YamlValue::Mapping(other_map)) => {
            for (key, other_value) in other_map {
                if let Some(base_value) = base_map.get_mut(key) {
                    deep_merge(base_value, other_value);
                } else {
                    base_map.insert(key.clone(), other_value.clone());
                }
            }
        }
        (base, other) => {
            *base = other.clone();
        }
    }
}
