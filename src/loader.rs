//! Scenario file loading: YAML parsing, `!include` resolution, and rewriting
//! of operator-key shorthand assertions into canonical form.
//!
//! Shorthand like `{path: metadata.turn_count, eq: 3}` becomes a canonical
//! `jmespath` assertion before typed deserialization, so the rest of the
//! crate only ever sees [`Assertion`] values.

use std::path::Path;

use serde_yaml::Value;

use crate::error::SalvoError;
use crate::scenario::Scenario;

const OPERATOR_KEYS: &[&str] = &["eq", "ne", "gt", "gte", "lt", "lte", "contains", "regex"];

const MAX_INCLUDE_DEPTH: usize = 8;

/// Load and validate a scenario from a YAML file.
pub fn load_scenario_file(path: &Path) -> Result<Scenario, SalvoError> {
    let raw = std::fs::read_to_string(path).map_err(|err| {
        SalvoError::ScenarioInvalid(format!("cannot read {}: {err}", path.display()))
    })?;
    let base_dir = path.parent().unwrap_or(Path::new("."));
    load_scenario_str(&raw, base_dir)
}

/// Load and validate a scenario from YAML text, resolving `!include` tags
/// relative to `base_dir`.
pub fn load_scenario_str(raw: &str, base_dir: &Path) -> Result<Scenario, SalvoError> {
    let mut value: Value = serde_yaml::from_str(raw)?;
    resolve_includes(&mut value, base_dir, 0)?;
    normalize_assertions(&mut value)?;

    let scenario: Scenario = serde_yaml::from_value(value)?;
    scenario.validate()?;
    Ok(scenario)
}

/// Replace `!include <file>` nodes with the parsed content of the referenced
/// sibling file. Includes nest up to a fixed depth.
fn resolve_includes(value: &mut Value, base_dir: &Path, depth: usize) -> Result<(), SalvoError> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(SalvoError::ScenarioInvalid(format!(
            "!include nesting exceeds {MAX_INCLUDE_DEPTH} levels"
        )));
    }

    match value {
        Value::Tagged(tagged) if tagged.tag == "!include" => {
            let relative = tagged.value.as_str().ok_or_else(|| {
                SalvoError::ScenarioInvalid("!include expects a file path string".to_string())
            })?;
            let target = base_dir.join(relative);
            let raw = std::fs::read_to_string(&target).map_err(|err| {
                SalvoError::ScenarioInvalid(format!(
                    "!include cannot read {}: {err}",
                    target.display()
                ))
            })?;
            let mut included: Value = serde_yaml::from_str(&raw)?;
            let included_dir = target.parent().unwrap_or(base_dir).to_path_buf();
            resolve_includes(&mut included, &included_dir, depth + 1)?;
            *value = included;
        }
        Value::Mapping(map) => {
            for (_, entry) in map.iter_mut() {
                resolve_includes(entry, base_dir, depth)?;
            }
        }
        Value::Sequence(items) => {
            for item in items.iter_mut() {
                resolve_includes(item, base_dir, depth)?;
            }
        }
        _ => {}
    }

    Ok(())
}

/// Rewrite operator-key shorthand entries in the `assertions` list.
fn normalize_assertions(value: &mut Value) -> Result<(), SalvoError> {
    let Some(assertions) = value
        .as_mapping_mut()
        .and_then(|map| map.get_mut("assertions"))
        .and_then(Value::as_sequence_mut)
    else {
        return Ok(());
    };

    for entry in assertions.iter_mut() {
        let Some(map) = entry.as_mapping() else {
            return Err(SalvoError::ScenarioInvalid(
                "assertion entries must be mappings".to_string(),
            ));
        };

        if map.contains_key("type") {
            continue;
        }

        let found: Vec<&str> = OPERATOR_KEYS
            .iter()
            .copied()
            .filter(|op| map.contains_key(*op))
            .collect();

        match found.as_slice() {
            [] => {
                return Err(SalvoError::ScenarioInvalid(format!(
                    "assertion has no 'type' and no operator key from {OPERATOR_KEYS:?}"
                )));
            }
            [operator] => {
                let operator = *operator;
                let expression = map
                    .get("path")
                    .and_then(Value::as_str)
                    .unwrap_or("response.content")
                    .to_string();
                let expected = map.get(operator).cloned().unwrap_or(Value::Null);
                let weight = map.get("weight").cloned();
                let required = map.get("required").cloned();

                let mut canonical = serde_yaml::Mapping::new();
                canonical.insert("type".into(), "jmespath".into());
                canonical.insert("expression".into(), expression.into());
                canonical.insert("operator".into(), operator.into());
                canonical.insert("value".into(), expected);
                if let Some(weight) = weight {
                    canonical.insert("weight".into(), weight);
                }
                if let Some(required) = required {
                    canonical.insert("required".into(), required);
                }
                *entry = Value::Mapping(canonical);
            }
            many => {
                return Err(SalvoError::ScenarioInvalid(format!(
                    "assertion has multiple operator keys: {many:?}; use exactly one"
                )));
            }
        }
    }

    Ok(())
}
