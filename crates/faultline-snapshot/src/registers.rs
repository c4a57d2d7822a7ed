//! Register file

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const INSTRUCTION_POINTERS: [&str; 3] = ["rip", "eip", "pc"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RegisterFile {
    values: BTreeMap<String, u64>,
}

impl RegisterFile {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, value: u64) {
        self.values.insert(name.into().to_lowercase(), value);
    }

    pub fn get(&self, name: &str) -> Option<u64> {
        self.values.get(&name.to_lowercase()).copied()
    }

    pub fn instruction_pointer(&self) -> Option<u64> {
        INSTRUCTION_POINTERS.iter().find_map(|name| self.get(name))
    }

    /// Page-fault linear address (CR2)
    pub fn fault_address(&self) -> Option<u64> {
        self.get("cr2")
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }
}
