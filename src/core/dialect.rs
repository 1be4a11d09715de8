//! CN-005: Provider expression dialect.
//!
//! Values that cannot become literals at synthesis time stay in the document
//! as provider-evaluated expressions. Which expressions those are is the
//! dialect's business; the engine only asks it to build them.

use super::types::Value;

/// Builds provider-evaluated expressions.
pub trait ExpressionDialect {
    /// Reference to a resource's primary identifier.
    fn reference(&self, logical_id: &str) -> Value;

    /// Reference to a named attribute of a resource.
    fn attribute(&self, logical_id: &str, attribute: &str) -> Value;

    /// Concatenation of literal and expression parts.
    fn join(&self, separator: &str, parts: Vec<Value>) -> Value;

    /// Import of a value exported by another unit.
    fn import_value(&self, export_name: &str) -> Value;
}

/// CloudFormation intrinsic functions.
#[derive(Debug, Clone, Copy, Default)]
pub struct CloudFormation;

impl ExpressionDialect for CloudFormation {
    fn reference(&self, logical_id: &str) -> Value {
        Value::map([("Ref", logical_id)])
    }

    fn attribute(&self, logical_id: &str, attribute: &str) -> Value {
        Value::map([("Fn::GetAtt", Value::list([logical_id, attribute]))])
    }

    fn join(&self, separator: &str, parts: Vec<Value>) -> Value {
        Value::map([(
            "Fn::Join",
            Value::list([Value::from(separator), Value::List(parts)]),
        )])
    }

    fn import_value(&self, export_name: &str) -> Value {
        Value::map([("Fn::ImportValue", export_name)])
    }
}
