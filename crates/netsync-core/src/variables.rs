//! Global and per-client variable tables.
//!
//! Values are opaque strings. Writes are last-write-wins; writing the value a
//! variable already holds is not a change.

use std::collections::{BTreeMap, HashMap};

use netsync_proto::{ClientNo, RoomSnapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VariableError {
    #[error("Variable name is empty")]
    EmptyName,

    #[error("Variable name too long: {len} bytes (max {max})")]
    NameTooLong { len: usize, max: usize },

    #[error("Value of '{name}' too long: {len} bytes (max {max})")]
    ValueTooLong { name: String, len: usize, max: usize },

    #[error("Variable table full: at most {max} variables")]
    TooManyVariables { max: usize },
}

/// Size limits applied to every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VariableLimits {
    pub max_name_len: usize,
    pub max_value_len: usize,
    /// Global variables per room.
    pub max_global_variables: usize,
    /// Variables per client.
    pub max_client_variables: usize,
}

impl Default for VariableLimits {
    fn default() -> Self {
        Self {
            max_name_len: 64,
            max_value_len: 1024,
            max_global_variables: 100,
            max_client_variables: 20,
        }
    }
}

impl VariableLimits {
    /// Check name and value sizes. Table capacity is checked by the table itself.
    pub fn validate(&self, name: &str, value: &str) -> Result<(), VariableError> {
        if name.is_empty() {
            return Err(VariableError::EmptyName);
        }
        if name.len() > self.max_name_len {
            return Err(VariableError::NameTooLong {
                len: name.len(),
                max: self.max_name_len,
            });
        }
        if value.len() > self.max_value_len {
            return Err(VariableError::ValueTooLong {
                name: name.to_string(),
                len: value.len(),
                max: self.max_value_len,
            });
        }
        Ok(())
    }
}

/// A single applied write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariableChange {
    pub name: String,
    /// `None` when the variable did not exist before.
    pub previous: Option<String>,
    pub current: String,
}

/// Name-ordered variable map.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableTable {
    entries: BTreeMap<String, String>,
}

impl VariableTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from trusted pairs (e.g. a server snapshot) without limit checks.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            entries: pairs.into_iter().collect(),
        }
    }

    /// Apply a write.
    ///
    /// Returns `Ok(None)` when the value is unchanged.
    pub fn set(
        &mut self,
        name: &str,
        value: &str,
        limits: &VariableLimits,
        capacity: usize,
    ) -> Result<Option<VariableChange>, VariableError> {
        limits.validate(name, value)?;

        if let Some(existing) = self.entries.get_mut(name) {
            if existing == value {
                return Ok(None);
            }
            let previous = std::mem::replace(existing, value.to_string());
            return Ok(Some(VariableChange {
                name: name.to_string(),
                previous: Some(previous),
                current: value.to_string(),
            }));
        }

        if self.entries.len() >= capacity {
            return Err(VariableError::TooManyVariables { max: capacity });
        }
        self.entries.insert(name.to_string(), value.to_string());
        Ok(Some(VariableChange {
            name: name.to_string(),
            previous: None,
            current: value.to_string(),
        }))
    }

    /// Apply a change decided elsewhere (the server), bypassing limits.
    pub fn apply(&mut self, name: &str, value: &str) -> Option<String> {
        self.entries.insert(name.to_string(), value.to_string())
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn get_or(&self, name: &str, default: &str) -> String {
        self.get(name).unwrap_or(default).to_string()
    }

    pub fn remove(&mut self, name: &str) -> Option<String> {
        self.entries.remove(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.entries.clone()
    }

    pub fn to_pairs(&self) -> Vec<(String, String)> {
        self.entries
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }
}

/// Global table plus one table per client.
#[derive(Debug, Clone, Default)]
pub struct VariableStore {
    limits: VariableLimits,
    globals: VariableTable,
    clients: HashMap<ClientNo, VariableTable>,
}

impl VariableStore {
    pub fn new(limits: VariableLimits) -> Self {
        Self {
            limits,
            globals: VariableTable::new(),
            clients: HashMap::new(),
        }
    }

    pub fn limits(&self) -> &VariableLimits {
        &self.limits
    }

    pub fn set_global(
        &mut self,
        name: &str,
        value: &str,
    ) -> Result<Option<VariableChange>, VariableError> {
        self.globals
            .set(name, value, &self.limits, self.limits.max_global_variables)
    }

    pub fn set_client(
        &mut self,
        client_no: ClientNo,
        name: &str,
        value: &str,
    ) -> Result<Option<VariableChange>, VariableError> {
        let capacity = self.limits.max_client_variables;
        self.clients
            .entry(client_no)
            .or_default()
            .set(name, value, &self.limits, capacity)
    }

    pub fn globals(&self) -> &VariableTable {
        &self.globals
    }

    pub fn globals_mut(&mut self) -> &mut VariableTable {
        &mut self.globals
    }

    pub fn client(&self, client_no: ClientNo) -> Option<&VariableTable> {
        self.clients.get(&client_no)
    }

    pub fn client_mut(&mut self, client_no: ClientNo) -> &mut VariableTable {
        self.clients.entry(client_no).or_default()
    }

    /// Drop every variable owned by a client.
    pub fn remove_client(&mut self, client_no: ClientNo) -> Option<VariableTable> {
        self.clients.remove(&client_no)
    }

    pub fn clear(&mut self) {
        self.globals = VariableTable::new();
        self.clients.clear();
    }

    /// Snapshot of the variables (clients list left empty for the caller to fill).
    pub fn to_snapshot(&self) -> RoomSnapshot {
        let mut client_variables: Vec<(ClientNo, Vec<(String, String)>)> = self
            .clients
            .iter()
            .filter(|(_, table)| !table.is_empty())
            .map(|(client_no, table)| (*client_no, table.to_pairs()))
            .collect();
        client_variables.sort_by_key(|(client_no, _)| *client_no);

        RoomSnapshot {
            clients: Vec::new(),
            globals: self.globals.to_pairs(),
            client_variables,
        }
    }

    /// Replace all contents with a snapshot.
    pub fn load_snapshot(&mut self, snapshot: &RoomSnapshot) {
        self.globals = VariableTable::from_pairs(snapshot.globals.iter().cloned());
        self.clients = snapshot
            .client_variables
            .iter()
            .map(|(client_no, pairs)| (*client_no, VariableTable::from_pairs(pairs.iter().cloned())))
            .collect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_reports_previous_value() {
        let mut store = VariableStore::default();

        let first = store.set_global("Scale", "1.0").unwrap().unwrap();
        assert_eq!(first.previous, None);
        assert_eq!(first.current, "1.0");

        let second = store.set_global("Scale", "2.5").unwrap().unwrap();
        assert_eq!(second.previous.as_deref(), Some("1.0"));
        assert_eq!(store.globals().get("Scale"), Some("2.5"));
    }

    #[test]
    fn test_same_value_is_not_a_change() {
        let mut store = VariableStore::default();
        store.set_client(1, "Color", "1,0,0,1").unwrap();
        assert_eq!(store.set_client(1, "Color", "1,0,0,1").unwrap(), None);
    }

    #[test]
    fn test_limits_rejected() {
        let limits = VariableLimits {
            max_name_len: 4,
            max_value_len: 3,
            max_global_variables: 1,
            max_client_variables: 1,
        };
        let mut store = VariableStore::new(limits);

        assert_eq!(store.set_global("", "x"), Err(VariableError::EmptyName));
        assert!(matches!(
            store.set_global("toolong", "x"),
            Err(VariableError::NameTooLong { len: 7, max: 4 })
        ));
        assert!(matches!(
            store.set_global("a", "1234"),
            Err(VariableError::ValueTooLong { len: 4, .. })
        ));

        store.set_global("a", "1").unwrap();
        assert_eq!(
            store.set_global("b", "1"),
            Err(VariableError::TooManyVariables { max: 1 })
        );
        // Overwriting an existing name is allowed at capacity.
        assert!(store.set_global("a", "2").unwrap().is_some());
    }

    #[test]
    fn test_client_tables_are_isolated() {
        let mut store = VariableStore::default();
        store.set_client(1, "Mode", "VR").unwrap();
        store.set_client(2, "Mode", "MR").unwrap();

        assert_eq!(store.client(1).unwrap().get("Mode"), Some("VR"));
        assert_eq!(store.client(2).unwrap().get("Mode"), Some("MR"));

        store.remove_client(1);
        assert!(store.client(1).is_none());
        assert_eq!(store.client(2).unwrap().get_or("Mode", "-"), "MR");
    }

    #[test]
    fn test_snapshot_reload() {
        let mut store = VariableStore::default();
        store.set_global("Scale", "1.5").unwrap();
        store.set_client(4, "Color", "0,1,0,1").unwrap();
        store.set_client(2, "Mode", "VR").unwrap();

        let snapshot = store.to_snapshot();
        assert_eq!(snapshot.client_variables[0].0, 2);

        let mut replica = VariableStore::default();
        replica.load_snapshot(&snapshot);
        assert_eq!(replica.globals().get("Scale"), Some("1.5"));
        assert_eq!(replica.client(4).unwrap().get("Color"), Some("0,1,0,1"));
    }
}
