use serde::{Deserialize, Serialize};
use std::collections::HashMap;

fn default_worker_group() -> String {
    "default".to_string()
}

fn default_auto_restart() -> bool {
    true
}

fn default_retry_backoff() -> f64 {
    1.0
}

/// One entry of the `slots` map (SPEC_FULL §4.7/§6). `watcher` names a
/// factory registered with the embedding binary's [`crate::WatcherRegistry`]
/// rather than a runtime-loadable class (see DESIGN.md).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlotConfig {
    pub watcher: String,
    pub publications: Vec<String>,
    #[serde(default)]
    pub temporary: bool,
    #[serde(default = "default_worker_group")]
    pub worker: String,
    #[serde(default = "default_auto_restart")]
    pub auto_restart: bool,
    #[serde(default)]
    pub retries: Option<u32>,
    #[serde(default = "default_retry_backoff")]
    pub retry_backoff: f64,
    #[serde(default)]
    pub retry_backoff_exponent: Option<f64>,
}

/// The Runner's whole configuration: a connection string shared by every
/// slot and metadata connection, plus the `slots` map.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    pub connection_string: String,
    pub slots: HashMap<String, SlotConfig>,
}

impl RunnerConfig {
    /// Partitions `slots` by their `worker` attribute, preserving slot names.
    pub fn groups(&self) -> HashMap<String, Vec<(String, SlotConfig)>> {
        let mut groups: HashMap<String, Vec<(String, SlotConfig)>> = HashMap::new();
        for (name, slot) in &self.slots {
            groups
                .entry(slot.worker.clone())
                .or_default()
                .push((name.clone(), slot.clone()));
        }
        groups
    }

    /// A copy of this configuration restricted to slots in `group`, used to
    /// hand a worker-group subprocess only the state it needs (SPEC_FULL §9
    /// "fork hooks": the parent never opens a DB connection, so this is the
    /// entire before-fork contract).
    pub fn for_group(&self, group: &str) -> RunnerConfig {
        RunnerConfig {
            connection_string: self.connection_string.clone(),
            slots: self
                .slots
                .iter()
                .filter(|(_, slot)| slot.worker == group)
                .map(|(name, slot)| (name.clone(), slot.clone()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn slot(worker: &str) -> SlotConfig {
        SlotConfig {
            watcher: "noop".into(),
            publications: vec!["pub1".into()],
            temporary: false,
            worker: worker.into(),
            auto_restart: true,
            retries: None,
            retry_backoff: 1.0,
            retry_backoff_exponent: None,
        }
    }

    #[test]
    fn groups_partitions_by_worker_attribute() {
        let mut slots = HashMap::new();
        slots.insert("a".to_string(), slot("ingest"));
        slots.insert("b".to_string(), slot("ingest"));
        slots.insert("c".to_string(), slot("reporting"));
        let config = RunnerConfig { connection_string: "postgres://x".into(), slots };

        let groups = config.groups();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups["ingest"].len(), 2);
        assert_eq!(groups["reporting"].len(), 1);
    }

    #[test]
    fn single_group_default_when_worker_omitted() {
        let json = r#"{"watcher": "noop", "publications": ["p"]}"#;
        let slot: SlotConfig = serde_json::from_str(json).unwrap();
        assert_eq!(slot.worker, "default");
        assert!(slot.auto_restart);
        assert_eq!(slot.retry_backoff, 1.0);
    }

    #[test]
    fn for_group_drops_slots_outside_the_requested_group() {
        let mut slots = HashMap::new();
        slots.insert("a".to_string(), slot("ingest"));
        slots.insert("c".to_string(), slot("reporting"));
        let config = RunnerConfig { connection_string: "postgres://x".into(), slots };

        let subset = config.for_group("ingest");
        assert_eq!(subset.slots.len(), 1);
        assert!(subset.slots.contains_key("a"));
    }
}
