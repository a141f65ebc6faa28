use std::collections::HashMap;

use crate::error::{DmngrError, DmngrResult};

/// One supervised child: the PID currently serving `service_name` for this
/// endpoint, the arguments used to spawn it, and whether it should be
/// respawned if it dies.
#[derive(Debug, Clone)]
pub struct ChildEntry {
    pub pid: i32,
    pub service_name: String,
    pub spawn_args: Vec<String>,
    pub desired_alive: bool,
}

/// Mapping from endpoint identifier to its current child. Invariant: at
/// most one live child per endpoint.
#[derive(Debug, Default)]
pub struct Registry {
    children: HashMap<String, ChildEntry>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            children: HashMap::new(),
        }
    }

    pub fn insert(&mut self, endpoint: impl Into<String>, entry: ChildEntry) {
        self.children.insert(endpoint.into(), entry);
    }

    pub fn get(&self, endpoint: &str) -> Option<&ChildEntry> {
        self.children.get(endpoint)
    }

    pub fn find_by_pid(&self, pid: i32) -> Option<&str> {
        self.children
            .iter()
            .find(|(_, c)| c.pid == pid)
            .map(|(endpoint, _)| endpoint.as_str())
    }

    pub fn set_pid(&mut self, endpoint: &str, pid: i32) -> DmngrResult<()> {
        self.children
            .get_mut(endpoint)
            .map(|c| c.pid = pid)
            .ok_or_else(|| DmngrError::UnknownEndpoint(endpoint.to_string()))
    }

    pub fn desired_alive(&self, endpoint: &str) -> bool {
        self.children.get(endpoint).map(|c| c.desired_alive).unwrap_or(false)
    }

    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.children.keys().map(|s| s.as_str())
    }
}
