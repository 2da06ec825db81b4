//! Column values and entity identities.

mod key;
mod value;

pub use key::EntityKey;
pub use value::{Value, ValueKind};

#[cfg(test)]
mod tests {
    use super::*;
    use ntest::timeout;
    use std::cmp::Ordering;

    #[timeout(1000)]
    #[test]
    fn test_null_sorts_first() {
        assert_eq!(Value::Null.total_cmp(&Value::Int(-5)), Ordering::Less);
        assert_eq!(Value::Text("a".into()).total_cmp(&Value::Null), Ordering::Greater);
    }

    #[timeout(1000)]
    #[test]
    fn test_mixed_numeric_compare() {
        assert_eq!(Value::Int(2).total_cmp(&Value::Float(2.5)), Ordering::Less);
        assert_eq!(Value::Float(3.0).total_cmp(&Value::Int(3)), Ordering::Equal);
    }

    #[timeout(1000)]
    #[test]
    fn test_conforms_to() {
        assert!(Value::Null.conforms_to(ValueKind::Text));
        assert!(Value::from("x").conforms_to(ValueKind::Text));
        assert!(!Value::from(1i64).conforms_to(ValueKind::Text));
    }

    #[timeout(1000)]
    #[test]
    fn test_untagged_json() {
        let json = serde_json::to_string(&vec![Value::Null, Value::Int(3), Value::from("n")]).unwrap();
        assert_eq!(json, r#"[null,3,"n"]"#);
        let back: Vec<Value> = serde_json::from_str(&json).unwrap();
        assert_eq!(back[1], Value::Int(3));
    }

    #[timeout(1000)]
    #[test]
    fn test_entity_key_display() {
        assert_eq!(EntityKey::new("Node", 7).to_string(), "Node#7");
    }
}
