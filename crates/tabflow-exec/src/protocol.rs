//! Per-key message protocol: `Open` -> `Finishing` -> `Closed`.
//!
//! One tracker per input port and one for each node's output. A table for a
//! key that is finishing or closed, or a second finish, is a protocol fault.

use std::collections::HashMap;

use tabflow_core::group_key::GroupKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyState {
    Open,
    Finishing,
    Closed,
}

#[derive(Debug, Default)]
pub struct KeyTracker {
    states: HashMap<GroupKey, KeyState>,
}

impl KeyTracker {
    pub fn state(&self, key: &GroupKey) -> Option<KeyState> {
        self.states.get(key).copied()
    }

    pub fn on_process(&mut self, key: &GroupKey) -> Result<(), String> {
        match self.states.get(key) {
            None => {
                self.states.insert(key.clone(), KeyState::Open);
                Ok(())
            }
            Some(KeyState::Open) => Ok(()),
            Some(state) => Err(format!("table for key {key} while {state:?}")),
        }
    }

    /// A key may be finished without any table having been seen.
    pub fn begin_finish(&mut self, key: &GroupKey) -> Result<(), String> {
        match self.states.get_mut(key) {
            None => {
                self.states.insert(key.clone(), KeyState::Finishing);
                Ok(())
            }
            Some(s @ KeyState::Open) => {
                *s = KeyState::Finishing;
                Ok(())
            }
            Some(state) => Err(format!("second finish for key {key} (already {state:?})")),
        }
    }

    pub fn end_finish(&mut self, key: &GroupKey) {
        if let Some(s) = self.states.get_mut(key) {
            *s = KeyState::Closed;
        }
    }

    /// Keys with tables but no finish yet, in key order.
    pub fn open_keys(&self) -> Vec<GroupKey> {
        let mut keys: Vec<GroupKey> = self
            .states
            .iter()
            .filter(|(_, s)| **s == KeyState::Open)
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }
}
