//! Agent management for phase-field angiogenesis on a distributed mesh.
//!
//! Tip cells and source cells are replicated on every rank; each rank
//! evaluates the agents near its own slab of the mesh and the results are
//! reconciled through the collectives in [`comm`].

pub mod agent;
pub mod checkpoint;
pub mod comm;
pub mod error;
pub mod field;
pub mod mesh;
pub mod oracle;
pub mod painter;
pub mod partition;
pub mod registry;
pub mod simulation;
pub mod sources;
pub mod tip_cells;

pub use agent::{Agent, AgentId, MobileAgent, SourceCell, TipCell};
pub use comm::{CommExt, Communicator, LocalCluster, LocalRank, SingleProcess, ROOT};
pub use error::{AngioError, Result};
pub use field::{Field, GridFunction, PaintTarget};
pub use mesh::{GridMesh, MeshPartition};
pub use simulation::AngioSimulation;
pub use sources::{SourceMap, SourcesManager};
pub use tip_cells::{TipCellManager, TipCellStepReport};
