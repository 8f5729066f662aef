//! ---
//! fab_section: "02-messaging"
//! fab_subsection: "module"
//! fab_type: "source"
//! fab_scope: "code"
//! fab_description: "Topic naming for device readings."
//! fab_version: "v0.1.0"
//! fab_owner: "tbd"
//! ---
use serde::{Deserialize, Serialize};

/// Builds `<prefix>/<machine_id>/<kind>` topics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopicScheme {
    prefix: String,
}

impl TopicScheme {
    /// Scheme rooted at `prefix`; surrounding slashes are ignored.
    pub fn new(prefix: impl AsRef<str>) -> Self {
        Self {
            prefix: prefix.as_ref().trim_matches('/').to_owned(),
        }
    }

    /// Topic prefix without trailing separator.
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Topic for one reading kind of one device.
    pub fn topic(&self, machine_id: &str, kind: &str) -> String {
        if self.prefix.is_empty() {
            format!("{machine_id}/{kind}")
        } else {
            format!("{}/{machine_id}/{kind}", self.prefix)
        }
    }

    /// Split a topic produced by this scheme into `(machine_id, kind)`.
    pub fn parse<'a>(&self, topic: &'a str) -> Option<(&'a str, &'a str)> {
        let rest = if self.prefix.is_empty() {
            topic
        } else {
            topic.strip_prefix(self.prefix.as_str())?.strip_prefix('/')?
        };
        let (machine, kind) = rest.split_once('/')?;
        if machine.is_empty() || kind.is_empty() || kind.contains('/') {
            return None;
        }
        Some((machine, kind))
    }
}

impl Default for TopicScheme {
    fn default() -> Self {
        Self::new("factory")
    }
}
