//! CN-011: YAML parsing and validation.
//!
//! Parses cairn.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Unit, resource and output identifiers must be usable as path components
//! - Resource types must be set
//! - depends_on and template references must point at declared nodes

use super::resolver::{parse_template, Segment, TemplateRef};
use super::types::*;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Parse a cairn.yaml file from disk.
pub fn parse_config_file(path: &Path) -> Result<AppConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    parse_config(&content)
}

/// Parse a cairn.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<AppConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &AppConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError { message });

    if config.version != "1.0" {
        push(format!("version must be \"1.0\", got \"{}\"", config.version));
    }
    if config.name.is_empty() {
        push("name must not be empty".to_string());
    }

    let mut param_keys: Vec<&String> = config.params.keys().collect();
    param_keys.sort();
    for key in param_keys {
        if contains_template(&config.params[key]) {
            push(format!(
                "param '{}' contains a template; param values are literal",
                key
            ));
        }
    }

    for (unit_name, unit) in &config.units {
        if !is_identifier(unit_name) {
            push(format!("unit '{}' has an invalid name", unit_name));
        }

        for (id, resource) in &unit.resources {
            if id.split('/').any(|part| !is_identifier(part)) {
                push(format!("resource '{}/{}' has an invalid id", unit_name, id));
            }
            if resource.resource_type.trim().is_empty() {
                push(format!("resource '{}/{}' has no type", unit_name, id));
            }
            // A resource cannot double as a group
            let parts: Vec<&str> = id.split('/').collect();
            for depth in 1..parts.len() {
                let prefix = parts[..depth].join("/");
                if unit.resources.contains_key(&prefix) {
                    push(format!(
                        "resource '{}/{}' is nested under resource '{}'",
                        unit_name, id, prefix
                    ));
                }
            }

            for dep in &resource.depends_on {
                if dep == id || *dep == format!("{}/{}", unit_name, id) {
                    push(format!("resource '{}/{}' depends on itself", unit_name, id));
                } else if !unit_contains(unit, dep) && !config_contains(config, dep) {
                    push(format!(
                        "resource '{}/{}' depends on unknown resource '{}'",
                        unit_name, id, dep
                    ));
                }
            }

            for value in resource.properties.values() {
                check_templates(config, &format!("{}/{}", unit_name, id), value, &mut push);
            }
        }

        for (id, output) in &unit.outputs {
            if !is_identifier(id) {
                push(format!("output '{}/{}' has an invalid id", unit_name, id));
            }
            if unit_contains(unit, id) {
                push(format!(
                    "output '{}/{}' collides with a resource or group",
                    unit_name, id
                ));
            }
            check_templates(config, &format!("{}/{}", unit_name, id), &output.value, &mut push);
        }
    }

    errors
}

/// Letters, digits, `-` and `_`.
fn is_identifier(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

/// True if `path` names a resource or group inside `unit`.
fn unit_contains(unit: &UnitConfig, path: &str) -> bool {
    let group = format!("{}/", path);
    unit.resources
        .keys()
        .any(|id| id == path || id.starts_with(&group))
}

/// True if `path` is `unit/resource-or-group`.
fn config_contains(config: &AppConfig, path: &str) -> bool {
    path.split_once('/')
        .and_then(|(unit, rest)| config.units.get(unit).map(|u| unit_contains(u, rest)))
        .unwrap_or(false)
}

fn contains_template(value: &serde_yaml_ng::Value) -> bool {
    use serde_yaml_ng::Value as Yaml;
    match value {
        Yaml::String(s) => s.contains("{{"),
        Yaml::Sequence(items) => items.iter().any(contains_template),
        Yaml::Mapping(map) => map.values().any(contains_template),
        Yaml::Tagged(tagged) => contains_template(&tagged.value),
        _ => false,
    }
}

fn check_templates(
    config: &AppConfig,
    owner: &str,
    value: &serde_yaml_ng::Value,
    push: &mut impl FnMut(String),
) {
    use serde_yaml_ng::Value as Yaml;
    match value {
        Yaml::String(s) if s.contains("{{") => match parse_template(s) {
            Ok(segments) => {
                for segment in segments {
                    let Segment::Expr(expr) = segment else {
                        continue;
                    };
                    match expr {
                        TemplateRef::Param(key) if !config.params.contains_key(&key) => {
                            push(format!("'{}' uses unknown param '{}'", owner, key));
                        }
                        TemplateRef::Ref(target) | TemplateRef::Attr { target, .. }
                            if !config_contains(config, &target) =>
                        {
                            push(format!("'{}' references unknown resource '{}'", owner, target));
                        }
                        _ => {}
                    }
                }
            }
            Err(e) => push(format!("'{}': {}", owner, e)),
        },
        Yaml::Sequence(items) => {
            for item in items {
                check_templates(config, owner, item, push);
            }
        }
        Yaml::Mapping(map) => {
            for v in map.values() {
                check_templates(config, owner, v, push);
            }
        }
        Yaml::Tagged(tagged) => check_templates(config, owner, &tagged.value, push),
        _ => {}
    }
}
