use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::lisp::{MapKey, Value};

/// What happens when a turn pushes memory past `memory_limit_bytes`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryStrategy {
    /// Exceeding the limit is fatal for the mission.
    #[default]
    Strict,
    /// The offending turn's updates are discarded and the LLM is told.
    Rollback,
}

/// Outcome of applying one turn's updates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryOutcome {
    Applied { size_bytes: u64 },
    /// Rollback strategy: updates discarded, mission continues.
    RolledBack { attempted_bytes: u64 },
    /// Strict strategy: mission must terminate.
    LimitExceeded { attempted_bytes: u64 },
}

/// Cross-turn symbol bindings for one mission.
///
/// Single-writer: only the loop between turns mutates it; executions see an
/// immutable snapshot. Keys only grow or rebind, they are never silently
/// dropped.
#[derive(Debug, Clone)]
pub struct TurnMemory {
    entries: BTreeMap<String, Value>,
    limit_bytes: u64,
    strategy: MemoryStrategy,
}

impl TurnMemory {
    pub fn new(limit_bytes: u64, strategy: MemoryStrategy) -> Self {
        TurnMemory {
            entries: BTreeMap::new(),
            limit_bytes,
            strategy,
        }
    }

    /// The immutable copy handed to the next execution.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.entries.clone()
    }

    pub fn symbols(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Deep external size of the current contents.
    pub fn size_bytes(&self) -> u64 {
        Self::size_of(&self.entries)
    }

    fn size_of(entries: &BTreeMap<String, Value>) -> u64 {
        entries
            .iter()
            .map(|(name, value)| 16 + name.len() as u64 + value.estimated_size())
            .sum()
    }

    /// Applies one turn's updates (top-level `def`s plus merged return-map
    /// keys), enforcing the size limit per the strategy.
    pub fn apply_turn(&mut self, updates: BTreeMap<String, Value>) -> MemoryOutcome {
        if updates.is_empty() {
            return MemoryOutcome::Applied {
                size_bytes: self.size_bytes(),
            };
        }
        let mut candidate = self.entries.clone();
        candidate.extend(updates);
        let attempted_bytes = Self::size_of(&candidate);
        if attempted_bytes <= self.limit_bytes {
            self.entries = candidate;
            return MemoryOutcome::Applied {
                size_bytes: attempted_bytes,
            };
        }
        match self.strategy {
            MemoryStrategy::Strict => MemoryOutcome::LimitExceeded { attempted_bytes },
            MemoryStrategy::Rollback => MemoryOutcome::RolledBack { attempted_bytes },
        }
    }
}

/// Splits a turn's result per the memory contract.
///
/// A map without a `:return` key merges wholly into memory; a map with one
/// merges the rest and the `:return` value becomes the turn result. Anything
/// else leaves memory untouched.
pub fn split_turn_result(result: &Value) -> (BTreeMap<String, Value>, Option<Value>) {
    let Some(entries) = result.as_map() else {
        return (BTreeMap::new(), None);
    };
    let mut updates = BTreeMap::new();
    let mut returned = None;
    for (key, value) in entries {
        match key {
            MapKey::Keyword(name) | MapKey::Str(name) => {
                if name == "return" {
                    returned = Some(value.clone());
                } else {
                    updates.insert(name.clone(), value.clone());
                }
            }
            // Only named keys can become symbols.
            _ => {}
        }
    }
    (updates, returned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn value_of_size(bytes: usize) -> Value {
        Value::string("x".repeat(bytes))
    }

    #[test]
    fn test_apply_grows_and_rebinds() {
        let mut memory = TurnMemory::new(10_000, MemoryStrategy::Strict);
        memory.apply_turn(BTreeMap::from([("a".to_string(), Value::Int(1))]));
        memory.apply_turn(BTreeMap::from([("a".to_string(), Value::Int(2))]));
        assert_eq!(memory.snapshot().get("a"), Some(&Value::Int(2)));
        assert_eq!(memory.symbols().count(), 1);
    }

    #[test]
    fn test_strict_limit_is_fatal() {
        let mut memory = TurnMemory::new(64, MemoryStrategy::Strict);
        let outcome =
            memory.apply_turn(BTreeMap::from([("big".to_string(), value_of_size(200))]));
        assert!(matches!(outcome, MemoryOutcome::LimitExceeded { .. }));
    }

    #[test]
    fn test_rollback_discards_only_this_turn() {
        let mut memory = TurnMemory::new(200, MemoryStrategy::Rollback);
        memory.apply_turn(BTreeMap::from([("keep".to_string(), Value::Int(1))]));
        let outcome =
            memory.apply_turn(BTreeMap::from([("big".to_string(), value_of_size(500))]));
        assert!(matches!(outcome, MemoryOutcome::RolledBack { .. }));
        assert!(memory.snapshot().contains_key("keep"));
        assert!(!memory.snapshot().contains_key("big"));
    }

    #[test]
    fn test_split_turn_result_without_return_key() {
        let result = Value::map_builder()
            .keyword_entry("users", Value::vector(vec![]))
            .keyword_entry("total", Value::Int(3))
            .build();
        let (updates, returned) = split_turn_result(&result);
        assert_eq!(updates.len(), 2);
        assert!(returned.is_none());
    }

    #[test]
    fn test_split_turn_result_with_return_key() {
        let result = Value::map_builder()
            .keyword_entry("summary", Value::string("done"))
            .keyword_entry("return", Value::Int(42))
            .build();
        let (updates, returned) = split_turn_result(&result);
        assert_eq!(updates.len(), 1);
        assert!(updates.contains_key("summary"));
        assert_eq!(returned, Some(Value::Int(42)));
    }

    #[test]
    fn test_non_map_results_leave_memory_alone() {
        let (updates, returned) = split_turn_result(&Value::Int(7));
        assert!(updates.is_empty());
        assert!(returned.is_none());
    }
}
