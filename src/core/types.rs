//! CN-001: Core value model, application schema, and document types.
//!
//! `Value` is the property-bag currency of the synthesizer: literals, ordered
//! maps, lists, and deferred handles. The YAML application schema mirrors the
//! node tree (units → resources/outputs) and derives Serialize/Deserialize.

use super::deferred::DeferredHandle;
use indexmap::IndexMap;
use serde::ser::SerializeSeq;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// Values
// ============================================================================

/// A property value, possibly containing unresolved deferred handles.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Number(serde_json::Number),
    String(String),
    List(Vec<Value>),
    /// Insertion-ordered mapping.
    Map(IndexMap<String, Value>),
    /// Placeholder for a value produced during synthesis.
    Deferred(DeferredHandle),
}

impl Value {
    /// Build an ordered map from key/value pairs.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
        I: IntoIterator<Item = (K, V)>,
    {
        Self::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Build a list.
    pub fn list<V, I>(items: I) -> Self
    where
        V: Into<Value>,
        I: IntoIterator<Item = V>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Null or an empty map: nothing worth emitting as a property bag.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Null => true,
            Self::Map(m) => m.is_empty(),
            _ => false,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_map(&self) -> Option<&IndexMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Look up a key in a map value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }

    /// True if any deferred handle remains anywhere in the structure.
    pub fn contains_deferred(&self) -> bool {
        match self {
            Self::Deferred(_) => true,
            Self::List(items) => items.iter().any(Value::contains_deferred),
            Self::Map(m) => m.values().any(Value::contains_deferred),
            _ => false,
        }
    }
}

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Null => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Number(n) => n.serialize(serializer),
            Self::String(s) => serializer.serialize_str(s),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(m) => m.serialize(serializer),
            // An unresolved handle serializes as its marker so the residual
            // scan can find it.
            Self::Deferred(h) => serializer.serialize_str(&h.marker()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(n.into())
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Number(n.into())
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        serde_json::Number::from_f64(n).map_or(Self::Null, Self::Number)
    }
}

impl From<DeferredHandle> for Value {
    fn from(h: DeferredHandle) -> Self {
        Self::Deferred(h)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Self::List(items)
    }
}

impl From<IndexMap<String, Value>> for Value {
    fn from(m: IndexMap<String, Value>) -> Self {
        Self::Map(m)
    }
}

// ============================================================================
// Top-level cairn.yaml
// ============================================================================

/// Root application definition: a set of deployment units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Application name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Global parameters (templatable)
    #[serde(default)]
    pub params: HashMap<String, serde_yaml_ng::Value>,

    /// Deployment units (order-preserving)
    #[serde(default)]
    pub units: IndexMap<String, UnitConfig>,

    /// Synthesis settings
    #[serde(default)]
    pub settings: SynthSettings,
}

/// One deployment unit: emitted as one document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitConfig {
    #[serde(default)]
    pub description: Option<String>,

    /// Resource declarations; ids may contain `/` to nest under groups
    #[serde(default)]
    pub resources: IndexMap<String, ResourceConfig>,

    /// Unit outputs
    #[serde(default)]
    pub outputs: IndexMap<String, OutputConfig>,
}

/// A single resource declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConfig {
    /// Provider resource type (e.g. `AWS::S3::Bucket`)
    #[serde(rename = "type")]
    pub resource_type: String,

    /// Property bag; string leaves may contain templates
    #[serde(default)]
    pub properties: IndexMap<String, serde_yaml_ng::Value>,

    /// Resources that must be emitted first
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// A unit output declaration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    pub value: serde_yaml_ng::Value,

    #[serde(default)]
    pub description: Option<String>,

    /// Export name, if the output should be importable by other units
    #[serde(default)]
    pub export: Option<String>,
}

// ============================================================================
// Settings
// ============================================================================

/// Synthesis settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SynthSettings {
    /// Serialization format of emitted documents
    #[serde(default)]
    pub format: DocumentFormat,

    /// Assembly output directory
    #[serde(default = "default_outdir")]
    pub outdir: String,

    /// Write manifest.json next to the documents
    #[serde(default = "default_true")]
    pub manifest: bool,
}

impl Default for SynthSettings {
    fn default() -> Self {
        Self {
            format: DocumentFormat::default(),
            outdir: default_outdir(),
            manifest: true,
        }
    }
}

fn default_outdir() -> String {
    "cairn.out".to_string()
}

fn default_true() -> bool {
    true
}

/// Document serialization format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DocumentFormat {
    #[default]
    Json,
    Yaml,
}

impl DocumentFormat {
    /// File extension for emitted documents.
    pub fn extension(self) -> &'static str {
        match self {
            Self::Json => "json",
            Self::Yaml => "yaml",
        }
    }
}

impl fmt::Display for DocumentFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for DocumentFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(Self::Json),
            "yaml" | "yml" => Ok(Self::Yaml),
            other => Err(format!("unknown document format '{}'", other)),
        }
    }
}

// ============================================================================
// Emitted documents
// ============================================================================

/// One deployment document.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct Template {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub metadata: IndexMap<String, Value>,

    pub resources: IndexMap<String, ResourceEntry>,

    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub outputs: IndexMap<String, OutputEntry>,
}

/// A resource body in a document.
#[derive(Debug, Clone, Serialize)]
pub struct ResourceEntry {
    #[serde(rename = "Type")]
    pub resource_type: String,

    #[serde(rename = "Properties", skip_serializing_if = "Value::is_empty")]
    pub properties: Value,

    /// Predecessor logical ids, de-duplicated, in declaration order
    #[serde(rename = "DependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

/// An output entry in a document.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct OutputEntry {
    pub value: Value,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub export: Option<ExportName>,
}

/// `Export: { Name: ... }` block of an output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ExportName {
    pub name: String,
}

// ============================================================================
// Template helper
// ============================================================================

/// Convert a serde_yaml_ng::Value to a string for template resolution.
pub fn yaml_value_to_string(val: &serde_yaml_ng::Value) -> String {
    match val {
        serde_yaml_ng::Value::String(s) => s.clone(),
        serde_yaml_ng::Value::Number(n) => n.to_string(),
        serde_yaml_ng::Value::Bool(b) => b.to_string(),
        serde_yaml_ng::Value::Null => String::new(),
        other => format!("{:?}", other),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cn001_config_parse() {
        let yaml = r#"
version: "1.0"
name: web-app
params:
  env: prod
units:
  network:
    description: Shared networking
    resources:
      vpc:
        type: AWS::EC2::VPC
        properties:
          CidrBlock: 10.0.0.0/16
  app:
    resources:
      web/bucket:
        type: AWS::S3::Bucket
        depends_on: [web/role]
      web/role:
        type: AWS::IAM::Role
    outputs:
      bucket-name:
        value: "{{ref:app/web/bucket}}"
        export: app-bucket
settings:
  format: yaml
"#;
        let config: AppConfig = serde_yaml_ng::from_str(yaml).unwrap();
        assert_eq!(config.version, "1.0");
        assert_eq!(config.units.len(), 2);
        let keys: Vec<_> = config.units.keys().collect();
        assert_eq!(keys, vec!["network", "app"]);
        assert_eq!(config.units["app"].resources["web/bucket"].depends_on, vec!["web/role"]);
        assert_eq!(
            config.units["app"].outputs["bucket-name"].export.as_deref(),
            Some("app-bucket")
        );
        assert_eq!(config.settings.format, DocumentFormat::Yaml);
        assert_eq!(config.settings.outdir, "cairn.out");
    }

    #[test]
    fn test_cn001_settings_defaults() {
        let s = SynthSettings::default();
        assert_eq!(s.format, DocumentFormat::Json);
        assert_eq!(s.outdir, "cairn.out");
        assert!(s.manifest);
    }

    #[test]
    fn test_cn001_document_format_parse() {
        assert_eq!("json".parse::<DocumentFormat>().unwrap(), DocumentFormat::Json);
        assert_eq!("yml".parse::<DocumentFormat>().unwrap(), DocumentFormat::Yaml);
        assert!("toml".parse::<DocumentFormat>().is_err());
        assert_eq!(DocumentFormat::Yaml.to_string(), "yaml");
    }

    #[test]
    fn test_cn001_value_serializes_in_insertion_order() {
        let v = Value::map([("zeta", Value::from(1i64)), ("alpha", Value::from("a"))]);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"{"zeta":1,"alpha":"a"}"#);
    }

    #[test]
    fn test_cn001_deferred_serializes_as_marker() {
        let v = Value::list([Value::from(DeferredHandle::from_raw(3)), Value::Null]);
        let json = serde_json::to_string(&v).unwrap();
        assert_eq!(json, r#"["${Token[3]}",null]"#);
        assert!(v.contains_deferred());
    }

    #[test]
    fn test_cn001_value_is_empty() {
        assert!(Value::Null.is_empty());
        assert!(Value::Map(IndexMap::new()).is_empty());
        assert!(!Value::from("x").is_empty());
        assert!(Value::from(f64::NAN).is_null());
    }

    #[test]
    fn test_cn001_template_omits_empty_sections() {
        let mut t = Template::default();
        t.resources.insert(
            "Bucket1234ABCD".to_string(),
            ResourceEntry {
                resource_type: "AWS::S3::Bucket".to_string(),
                properties: Value::Null,
                depends_on: vec![],
            },
        );
        let json = serde_json::to_string(&t).unwrap();
        assert_eq!(
            json,
            r#"{"Resources":{"Bucket1234ABCD":{"Type":"AWS::S3::Bucket"}}}"#
        );
    }

    #[test]
    fn test_cn001_yaml_value_to_string() {
        assert_eq!(
            yaml_value_to_string(&serde_yaml_ng::Value::String("hello".into())),
            "hello"
        );
        assert_eq!(yaml_value_to_string(&serde_yaml_ng::Value::Bool(true)), "true");
        assert_eq!(yaml_value_to_string(&serde_yaml_ng::Value::Null), "");
    }
}
