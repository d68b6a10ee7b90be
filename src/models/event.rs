// Runtime lifecycle events

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One record from the runtime's live event stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeEvent {
    /// Object type the event is about ("container", "network", ...).
    pub kind: String,
    pub action: String,
    pub actor_id: String,
    #[serde(default)]
    pub attributes: HashMap<String, String>,
    /// Unix seconds.
    pub time: i64,
}

impl RuntimeEvent {
    pub fn is_container(&self) -> bool {
        self.kind == "container"
    }

    /// Container name from the actor attributes, if present.
    pub fn actor_name(&self) -> &str {
        self.attributes
            .get("name")
            .map(String::as_str)
            .unwrap_or("unknown")
    }
}
