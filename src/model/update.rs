//! Wire form of a mutation.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// A named mutation with positional JSON arguments, exactly as it travels
/// over the wire: `{"name": "set", "args": ["count", 1]}`.
///
/// The server rebroadcasts the raw frame it received, so an `Update` is
/// only re-serialized on the sending side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Update {
    pub name: String,
    pub args: Vec<Value>,
}

impl Update {
    pub fn new(name: impl Into<String>, args: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            args,
        }
    }

    /// Deserialize the argument list into a concrete tuple type.
    ///
    /// Models call this from `decode` after matching on the name, so a
    /// wrong arity or type surfaces as a [`DecodeError`] carrying the
    /// operation name.
    pub fn parse_args<T: DeserializeOwned>(&self) -> Result<T, DecodeError> {
        serde_json::from_value(Value::Array(self.args.clone())).map_err(|source| {
            DecodeError::BadArguments {
                name: self.name.clone(),
                source,
            }
        })
    }

    pub fn unknown(&self) -> DecodeError {
        DecodeError::UnknownOperation {
            name: self.name.clone(),
        }
    }

    /// Commit message recorded when the mutation is persisted: the name,
    /// a blank line, then the arguments as a JSON array.
    pub fn commit_message(&self) -> String {
        let args = serde_json::to_string(&self.args).unwrap_or_else(|_| "[]".to_string());
        format!("{}\n\n{}", self.name, args)
    }
}

/// Why an [`Update`] could not be turned into a typed mutation.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown operation {name:?}")]
    UnknownOperation { name: String },

    #[error("bad arguments for {name:?}: {source}")]
    BadArguments {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}
