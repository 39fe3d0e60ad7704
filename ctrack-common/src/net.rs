use serde::{Deserialize, Serialize};
use strum::IntoStaticStr;

/// Whether the attributed owner (workload or node) initiated
/// the connection or accepted it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, IntoStaticStr)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Direction {
    Outgoing,
    Incoming,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        self.into()
    }
}
