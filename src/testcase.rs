//! Test-case I/O.
//!
//! The original `SymbolicFormat` class (`symbolic_format.cpp/h`) reads a
//! bencode-framed `(name, size, value)` triple list plus a free-form
//! constraint field, and builds a `ConcreteStore` plus a sequence of
//! `assume()` calls from it. We keep the same content model —
//! ordered name/bytes entries, each either concrete or coming from a
//! declared symbol, plus optional constraint text — but serialize it as
//! JSON via `serde`/`serde_json`, the format this workspace otherwise
//! uses for structured data, rather than reimplementing a bencode
//! decoder.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::solver::{Solver, SymbolEnv};
use crate::store::ConcreteStore;
use crate::trace::Trace;
use crate::value::ConcolicValue;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredEntry {
    name: String,
    bytes: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TestCaseFile {
    entries: Vec<StoredEntry>,
    /// Free-form constraints captured alongside the assignment, parsed
    /// with `Solver::from_string` and replayed as `assume()`s so a
    /// captured error can be reproduced deterministically.
    constraints: Vec<String>,
}

impl TestCaseFile {
    pub fn from_store(store: &ConcreteStore) -> Self {
        let entries = store.iter().map(|(name, bytes)| StoredEntry { name: name.to_string(), bytes: bytes.to_vec() }).collect();
        TestCaseFile { entries, constraints: Vec::new() }
    }

    pub fn with_constraint(mut self, text: impl Into<String>) -> Self {
        self.constraints.push(text.into());
        self
    }

    pub fn to_store(&self) -> ConcreteStore {
        let mut store = ConcreteStore::new();
        for entry in &self.entries {
            store.insert(entry.name.clone(), entry.bytes.clone());
        }
        store
    }

    pub fn write(&self, path: impl AsRef<Path>) -> Result<()> {
        let file = File::create(path)?;
        let writer = BufWriter::new(file);
        serde_json::to_writer_pretty(writer, self)
            .map_err(|e| crate::error::Error::TestCase(e.to_string()))
    }

    pub fn read(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path)?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).map_err(|e| crate::error::Error::TestCase(e.to_string()))
    }

    /// Replays this test case's constraints against `trace`, declaring
    /// each referenced name's width as `width_of` resolves it (the
    /// constraint text alone does not carry widths).
    pub fn replay_constraints(
        &self,
        solver: &Solver,
        trace: &mut Trace,
        width_of: impl Fn(&str) -> u32,
    ) -> Result<()> {
        for (i, text) in self.constraints.iter().enumerate() {
            let mut env = SymbolEnv::new();
            for name in referenced_names(text) {
                env.declare(name.clone(), width_of(&name));
            }
            let value: ConcolicValue = solver.from_string(&env, text)?;
            if trace.assume(&value).is_err() {
                tracing::debug!(index = i, "replayed constraint narrowed a fresh path");
            }
        }
        Ok(())
    }
}

fn referenced_names(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|tok| !tok.is_empty() && tok.chars().next().unwrap().is_alphabetic())
        .map(|tok| tok.to_string())
        .collect()
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::path_tree::Node;

    #[test]
    fn store_round_trips_through_json() {
        let mut store = ConcreteStore::new();
        store.insert("x", vec![1, 2, 3, 4]);
        store.insert("y", vec![0xff]);
        let file = TestCaseFile::from_store(&store);
        let dir = std::env::temp_dir().join(format!("vp-symex-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("case.json");
        file.write(&path).unwrap();
        let reloaded = TestCaseFile::read(&path).unwrap();
        assert_eq!(reloaded.to_store(), store);
        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn replay_constraints_feeds_assume() {
        let solver = Solver::new();
        let root = Node::new_ref();
        let mut trace = Trace::new(root);
        let file = TestCaseFile::default().with_constraint("x == 5");
        file.replay_constraints(&solver, &mut trace, |_| 32).unwrap();
        assert_eq!(trace.constraints().len(), 1);
    }
}
