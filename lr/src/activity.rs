//! Stream activities

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One record of the stream
///
/// Only `body` and `sources` are touched by the relay. Any other provider
/// fields ride along in `extra` and are republished unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activity {
    /// Text that may contain links
    pub body: String,

    /// Identifier of the resource the activity came from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,

    /// Provenance tags, one appended per processing hop
    #[serde(default)]
    pub sources: Vec<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Activity {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            resource: None,
            sources: Vec::new(),
            extra: Map::new(),
        }
    }
}
