//! A generic JSON key/value model.

use std::collections::BTreeMap;

use serde_json::Value;

use super::{DecodeError, Model, Update};

/// Session state as a flat map of string keys to JSON values.
///
/// This is the model the bundled CLI serves. It covers the common case of
/// a shared scratchpad without asking anyone to define their own types.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    entries: BTreeMap<String, Value>,
}

impl Document {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.get(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }
}

/// Mutations accepted by [`Document`].
#[derive(Debug, Clone, PartialEq)]
pub enum DocumentMutation {
    Set { key: String, value: Value },
    Remove { key: String },
    Clear,
}

impl Model for Document {
    type Snapshot = BTreeMap<String, Value>;
    type Mutation = DocumentMutation;

    fn init() -> Self {
        Self::default()
    }

    fn save(&self) -> Self::Snapshot {
        self.entries.clone()
    }

    fn load(snapshot: Self::Snapshot) -> Self {
        Self { entries: snapshot }
    }

    fn decode(update: &Update) -> Result<Self::Mutation, DecodeError> {
        match update.name.as_str() {
            "set" => {
                let (key, value) = update.parse_args()?;
                Ok(DocumentMutation::Set { key, value })
            }
            "remove" => {
                let (key,) = update.parse_args()?;
                Ok(DocumentMutation::Remove { key })
            }
            "clear" => Ok(DocumentMutation::Clear),
            _ => Err(update.unknown()),
        }
    }

    fn encode(mutation: &Self::Mutation) -> Update {
        match mutation {
            DocumentMutation::Set { key, value } => Update::new(
                "set",
                vec![Value::String(key.clone()), value.clone()],
            ),
            DocumentMutation::Remove { key } => {
                Update::new("remove", vec![Value::String(key.clone())])
            }
            DocumentMutation::Clear => Update::new("clear", Vec::new()),
        }
    }

    fn apply(&mut self, mutation: &Self::Mutation) {
        match mutation {
            DocumentMutation::Set { key, value } => {
                self.entries.insert(key.clone(), value.clone());
            }
            DocumentMutation::Remove { key } => {
                self.entries.remove(key);
            }
            DocumentMutation::Clear => self.entries.clear(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn set(key: &str, value: Value) -> DocumentMutation {
        DocumentMutation::Set {
            key: key.to_string(),
            value,
        }
    }

    #[test]
    fn test_apply_set_remove_clear() {
        let mut doc = Document::init();
        doc.apply(&set("a", json!(1)));
        doc.apply(&set("b", json!({"nested": true})));
        assert_eq!(doc.get("a"), Some(&json!(1)));
        assert_eq!(doc.len(), 2);

        doc.apply(&DocumentMutation::Remove { key: "a".into() });
        assert_eq!(doc.get("a"), None);

        doc.apply(&DocumentMutation::Remove { key: "missing".into() });
        assert_eq!(doc.len(), 1);

        doc.apply(&DocumentMutation::Clear);
        assert!(doc.is_empty());
    }

    #[test]
    fn test_snapshot_round_trip_between_mutations() {
        let mutations = [
            set("x", json!("first")),
            set("y", json!([1, 2, 3])),
            DocumentMutation::Remove { key: "x".into() },
            set("z", json!(null)),
        ];

        let mut doc = Document::init();
        for mutation in &mutations {
            doc.apply(mutation);
            let reloaded = Document::load(doc.save());
            assert_eq!(reloaded, doc);
        }
    }

    #[test]
    fn test_decode_wire_updates() {
        let update: Update =
            serde_json::from_str(r#"{"name":"set","args":["count",1]}"#).unwrap();
        assert_eq!(
            Document::decode(&update).unwrap(),
            set("count", json!(1))
        );

        let update: Update = serde_json::from_str(r#"{"name":"clear","args":[]}"#).unwrap();
        assert_eq!(Document::decode(&update).unwrap(), DocumentMutation::Clear);
    }

    #[test]
    fn test_decode_rejects_unknown_operation() {
        let update = Update::new("rotate", vec![]);
        assert!(matches!(
            Document::decode(&update),
            Err(DecodeError::UnknownOperation { name }) if name == "rotate"
        ));
    }

    #[test]
    fn test_decode_rejects_bad_arity() {
        let update = Update::new("remove", vec![]);
        assert!(matches!(
            Document::decode(&update),
            Err(DecodeError::BadArguments { .. })
        ));
    }

    #[test]
    fn test_encode_decode_inverse() {
        let mutations = [
            set("k", json!({"deep": [1, null, "s"]})),
            DocumentMutation::Remove { key: "k".into() },
            DocumentMutation::Clear,
        ];
        for mutation in &mutations {
            let decoded = Document::decode(&Document::encode(mutation)).unwrap();
            assert_eq!(&decoded, mutation);
        }
    }
}
