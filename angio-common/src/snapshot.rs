use indexmap::IndexMap;
use serde::{Serialize, Deserialize};

/// A snapshot of the agent population at a specific step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// The simulation step at which the snapshot was taken.
    pub step: u64,
    /// Simulation time (`step * dt`).
    pub time: f64,
    /// Number of active tip cells (global list).
    pub tip_cell_count: u32,
    /// Number of source cells still expressing angiogenic factor.
    pub source_count: u32,
    /// Fraction of owned mesh nodes, over all ranks, covered by the latest tip cell field.
    pub painted_node_fraction: f64,
    /// Optional: tip cell positions at the snapshot time.
    /// Included only if `output.save_positions_in_snapshot` is true.
    pub tip_cell_positions: Option<Vec<Vec<f64>>>,
}

/// Persisted form of a single agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub position: Vec<f64>,
    /// Tip cells carry a radius, source cells don't.
    #[serde(default)]
    pub radius: Option<f64>,
    pub creation_step: u64,
    /// Where the agent was created, if it has moved since. Agent identities
    /// derive from this position, not the current one.
    #[serde(default)]
    pub origin: Option<Vec<f64>>,
}

/// One saved population, keyed by a stable per-agent identifier.
pub type AgentCheckpoint = IndexMap<String, AgentRecord>;

/// Populations saved over time, keyed by `step_<n>`.
pub type IncrementalCheckpoint = IndexMap<String, AgentCheckpoint>;
