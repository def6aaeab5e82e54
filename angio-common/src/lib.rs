pub mod config;
pub mod sim_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    FieldsConfig, MeshConfig, OutputConfig, ParallelConfig, SimulationConfig, SourceLayout,
    SourcesConfig, TimingConfig, TipCellConfig,
};
pub use sim_params::AngioParams;
pub use snapshot::{AgentCheckpoint, AgentRecord, IncrementalCheckpoint, Snapshot};
pub use vecmath::Point;
