//! Agent checkpoints.
//!
//! A checkpoint maps `"<kind><id>"` to `{position, radius, creation_step, origin}`,
//! `origin` being the creation position of an agent that has moved.
//! The incremental variant nests one such map per `step_<n>`. Files are
//! written by the root rank only; a failed write fails the save on every rank.

use crate::agent::Agent;
use crate::comm::{CommExt, Communicator, ROOT};
use crate::error::{AngioError, Result};
use crate::registry::AgentRegistry;
use angio_common::{AgentCheckpoint, IncrementalCheckpoint};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointFormat {
    Json,
    Bincode,
    MessagePack,
}

impl CheckpointFormat {
    /// `.json`, `.bin` or `.msgpack`.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Ok(CheckpointFormat::Json),
            Some("bin") => Ok(CheckpointFormat::Bincode),
            Some("msgpack") => Ok(CheckpointFormat::MessagePack),
            _ => Err(AngioError::Configuration(format!(
                "unsupported checkpoint file {}: expected .json, .bin or .msgpack",
                path.display()
            ))),
        }
    }

    pub fn encode<T: Serialize>(self, value: &T) -> Result<Vec<u8>> {
        Ok(match self {
            CheckpointFormat::Json => serde_json::to_vec_pretty(value)?,
            CheckpointFormat::Bincode => bincode::serialize(value)?,
            CheckpointFormat::MessagePack => rmp_serde::to_vec_named(value)?,
        })
    }

    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        Ok(match self {
            CheckpointFormat::Json => serde_json::from_slice(bytes)?,
            CheckpointFormat::Bincode => bincode::deserialize(bytes)?,
            CheckpointFormat::MessagePack => rmp_serde::from_slice(bytes)?,
        })
    }
}

pub fn agent_key<A: Agent>(agent: &A) -> String {
    format!("{}{}", A::KIND, agent.id())
}

/// Every agent of the registry, in registry order.
pub fn make_checkpoint<A: Agent>(registry: &AgentRegistry<A>) -> AgentCheckpoint {
    registry.agents().map(|agent| (agent_key(agent), agent.to_record())).collect()
}

// Root writes and broadcasts whether it failed, so every rank returns an error together.
fn write_on_root<F>(comm: &dyn Communicator, write: F) -> Result<()>
where
    F: FnOnce() -> Result<()>,
{
    let outcome = if comm.is_root() { write() } else { Ok(()) };
    let failure = outcome.as_ref().err().map(ToString::to_string);
    let verdict: Option<String> = comm.broadcast(comm.is_root().then_some(failure), ROOT)?;
    match (outcome, verdict) {
        (Err(e), _) => Err(e),
        (Ok(()), Some(message)) => Err(AngioError::RootFailed(message)),
        (Ok(()), None) => Ok(()),
    }
}

/// Saves the registry to `path`. Collective.
pub fn save_agents<A: Agent>(
    comm: &dyn Communicator,
    registry: &AgentRegistry<A>,
    path: &Path,
) -> Result<()> {
    let format = CheckpointFormat::from_path(path)?;
    write_on_root(comm, || {
        let bytes = format.encode(&make_checkpoint(registry))?;
        fs::write(path, bytes)?;
        log::info!("Saved {} agents to {}", registry.len(), path.display());
        Ok(())
    })
}

/// Reads a snapshot checkpoint back into agents, in file order.
pub fn load_agents<A: Agent>(path: &Path) -> Result<Vec<A>> {
    let format = CheckpointFormat::from_path(path)?;
    let bytes = fs::read(path)?;
    let checkpoint: AgentCheckpoint = format.decode(&bytes)?;
    checkpoint.values().map(A::from_record).collect()
}

/// Accumulates one snapshot per step and rewrites the file on every save.
#[derive(Debug)]
pub struct IncrementalCheckpointWriter {
    path: PathBuf,
    format: CheckpointFormat,
    saved: IncrementalCheckpoint,
}

impl IncrementalCheckpointWriter {
    pub fn new(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let format = CheckpointFormat::from_path(&path)?;
        Ok(IncrementalCheckpointWriter { path, format, saved: IncrementalCheckpoint::new() })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Appends the registry under `step_<step>` and rewrites the file. Collective.
    pub fn save<A: Agent>(
        &mut self,
        comm: &dyn Communicator,
        registry: &AgentRegistry<A>,
        step: u64,
    ) -> Result<()> {
        let Self { path, format, saved } = self;
        write_on_root(comm, || {
            saved.insert(format!("step_{}", step), make_checkpoint(registry));
            fs::write(path.as_path(), format.encode(&*saved)?)?;
            log::debug!("Appended step {} to {}", step, path.display());
            Ok(())
        })
    }
}

/// Reads an incremental checkpoint.
pub fn load_incremental(path: &Path) -> Result<IncrementalCheckpoint> {
    let format = CheckpointFormat::from_path(path)?;
    format.decode(&fs::read(path)?)
}
