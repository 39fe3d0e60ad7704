use ctrack_common::CtrackErr;
use ctrack_common::consts::WORKLOAD_LABEL_PREFIX;
use ctrack_common::types::Workload;
use std::collections::HashSet;

/// Labels of connection gauges after the workload labels
pub const CONNECTION_LABELS: [&str; 6] = [
    "state",
    "protocol",
    "destination",
    "destination_name",
    "destination_zone",
    "direction",
];

/// Labels of byte counters after the workload labels
pub const BYTES_LABELS: [&str; 4] = [
    "destination",
    "destination_name",
    "destination_zone",
    "direction",
];

/// Replaces every character outside `[A-Za-z0-9_]` with `_`
pub fn sanitize_label_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

/// Workload label names fixed once at startup: the provider kind carrying
/// the workload name, then one `label_<key>` per configured key, in
/// configuration order
#[derive(Debug, Clone)]
pub struct LabelSchema {
    keys: Vec<String>,
    names: Vec<String>,
}

impl LabelSchema {
    pub fn new(kind: &str, keys: &[String]) -> Result<Self, CtrackErr> {
        let mut names = vec![kind.to_string()];
        let mut seen = HashSet::new();

        for key in keys {
            let name = format!("{}{}", WORKLOAD_LABEL_PREFIX, sanitize_label_name(key));
            if !seen.insert(name.clone()) {
                return Err(CtrackErr::DuplicateLabel(name));
            }
            names.push(name);
        }

        Ok(Self {
            keys: keys.to_vec(),
            names,
        })
    }

    pub fn workload_label_names(&self) -> &[String] {
        &self.names
    }

    pub fn connection_label_names(&self) -> Vec<String> {
        self.with(&CONNECTION_LABELS)
    }

    pub fn bytes_label_names(&self) -> Vec<String> {
        self.with(&BYTES_LABELS)
    }

    /// Workload label values in schema order, a missing key reads as empty
    pub fn workload_values(&self, workload: &Workload) -> Vec<String> {
        std::iter::once(workload.name.clone())
            .chain(
                self.keys
                    .iter()
                    .map(|k| workload.labels.get(k).cloned().unwrap_or_default()),
            )
            .collect()
    }

    fn with(&self, tail: &[&str]) -> Vec<String> {
        self.names
            .iter()
            .cloned()
            .chain(tail.iter().map(|s| s.to_string()))
            .collect()
    }
}
