use crate::agent::{Agent, TipCell};
use crate::comm::{CommExt, Communicator};
use crate::error::{AngioError, Result};
use crate::field::GridFunction;
use crate::mesh::{GridMesh, MeshPartition};
use crate::sources::{sources_in_circle_points, SourceMap, SourcesManager};
use crate::tip_cells::{TipCellManager, TipCellStepReport};
use angio_common::{AngioParams, Point, SimulationConfig, Snapshot, SourceLayout};
use log::{debug, info, trace};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

/// One rank's share of an angiogenesis run: its mesh slab, the vessel and
/// angiogenic factor fields on it, and the replicated agent managers.
///
/// Every method that advances or inspects global state is collective; all
/// ranks drive their `AngioSimulation` through the same calls.
pub struct AngioSimulation<C: Communicator> {
    comm: C,
    config: SimulationConfig,
    params: AngioParams,
    mesh: Arc<GridMesh>,
    /// Vessel phase field `c`.
    vessel: GridFunction,
    /// Angiogenic factor `af`.
    af: GridFunction,
    tip_cells: TipCellManager,
    sources: SourcesManager,
    current_step: u64,
    last_report: TipCellStepReport,
    recorded_snapshots: Vec<Snapshot>,
}

impl<C: Communicator> AngioSimulation<C> {
    /// Builds the mesh slab, the initial fields and the source map of this rank.
    ///
    /// Collective.
    pub fn new(comm: C, config: SimulationConfig) -> Result<Self> {
        let params = config.get_sim_params();
        let mesh = Arc::new(GridMesh::from_config(&config.mesh, comm.rank(), comm.size()));

        // Initial vessel: phi_max left of vessel_x, phi_min elsewhere.
        let vessel_x = config.fields.vessel_x;
        let vessel = GridFunction::interpolate(Arc::clone(&mesh), |p| {
            if p.x() < vessel_x { params.phi_max } else { params.phi_min }
        });
        let af_slope = config.fields.af_slope;
        let af_background = params.t_min;
        let mut af =
            GridFunction::interpolate(Arc::clone(&mesh), |p| af_background + af_slope * p.x());

        let margin = params.d.unwrap_or(0.0).max(params.source_r_c);
        let source_map = build_source_map(&comm, &config, &params, &mesh, margin)?;
        info!(
            "p{}: {} sources, {} tracked locally",
            comm.rank(),
            source_map.len(),
            source_map.local_source_cells().count()
        );
        let sources = SourcesManager::new(source_map, Arc::clone(&mesh), &params)?;
        sources.apply_sources(&comm, &mut af)?;

        let tip_cells = TipCellManager::new(&comm, Arc::clone(&mesh), &params, Vec::new())?;

        Ok(AngioSimulation {
            comm,
            config,
            params,
            mesh,
            vessel,
            af,
            tip_cells,
            sources,
            current_step: 0,
            last_report: TipCellStepReport::default(),
            recorded_snapshots: Vec::new(),
        })
    }

    /// Advances the agents by one step. Collective.
    pub fn step(&mut self) -> Result<()> {
        let step = self.current_step;

        // Without a configured interaction radius, sources are consumed on contact.
        let fallback = self.params.d.is_none().then_some(self.params.source_r_c);
        self.sources.remove_sources_near_vessels(&self.comm, &self.vessel, fallback)?;
        self.sources.apply_sources(&self.comm, &mut self.af)?;

        self.last_report = self.tip_cells.step(&self.comm, &mut self.vessel, &self.af, step)?;
        trace!("p{}: step {} report {:?}", self.comm.rank(), step, self.last_report);

        if self.config.output.save_incremental_tip_cells {
            let path = self.output_path("tip_cells_incremental.json");
            self.tip_cells.save_incremental_tip_cells(&self.comm, &path, step)?;
        }

        self.current_step += 1;
        Ok(())
    }

    /// Stores a [`Snapshot`] of the current step. Collective.
    pub fn record_snapshot(&mut self) -> Result<()> {
        let time = self.current_step as f64 * self.params.dt;
        debug!("p{}: recording snapshot at t = {:.3}", self.comm.rank(), time);

        let painted_node_fraction = self.painted_node_fraction()?;
        let tip_cell_positions = if self.config.output.save_positions_in_snapshot {
            Some(self.get_results())
        } else {
            None
        };

        self.recorded_snapshots.push(Snapshot {
            step: self.current_step,
            time,
            tip_cell_count: self.tip_cells.len() as u32,
            source_count: self.sources.source_map().len() as u32,
            painted_node_fraction,
            tip_cell_positions,
        });
        Ok(())
    }

    // Share of owned mesh nodes where the latest tip cell field is positive.
    fn painted_node_fraction(&self) -> Result<f64> {
        let local = match self.tip_cells.latest_tip_cells_field() {
            Ok(field) => {
                let ghosts: HashSet<usize> =
                    self.mesh.ghost_vertices().into_iter().map(|(local, _)| local).collect();
                let owned = (0..self.mesh.local_vertices().len()).filter(|v| !ghosts.contains(v));
                owned.fold((0u64, 0u64), |(painted, total), v| {
                    (painted + u64::from(field.node_value(v, 0) > 0.0), total + 1)
                })
            }
            // Nothing painted yet.
            Err(AngioError::Precondition(_)) => (0, 0),
            Err(e) => return Err(e),
        };
        let (painted, total) = self
            .comm
            .all_gather(&local)?
            .into_iter()
            .fold((0u64, 0u64), |(p, t), (lp, lt)| (p + lp, t + lt));
        Ok(if total > 0 { painted as f64 / total as f64 } else { 0.0 })
    }

    /// Writes the current tip cells to `<base_filename>_tip_cells.json`. Collective.
    pub fn save_tip_cells(&self) -> Result<PathBuf> {
        let path = self.output_path("tip_cells.json");
        self.tip_cells.save_tip_cells(&self.comm, &path)?;
        Ok(path)
    }

    fn output_path(&self, suffix: &str) -> PathBuf {
        PathBuf::from(format!("{}_{}", self.config.output.base_filename, suffix))
    }

    /// Tip cell positions, in registry order.
    pub fn get_results(&self) -> Vec<Vec<f64>> {
        self.tip_cells.tip_cells().map(|tc| tc.position().coords().to_vec()).collect()
    }

    pub fn tip_cell_list(&self) -> Vec<TipCell> {
        self.tip_cells.tip_cells().cloned().collect()
    }

    pub fn current_step(&self) -> u64 {
        self.current_step
    }

    pub fn last_report(&self) -> &TipCellStepReport {
        &self.last_report
    }

    pub fn comm(&self) -> &C {
        &self.comm
    }

    pub fn params(&self) -> &AngioParams {
        &self.params
    }

    pub fn config(&self) -> &SimulationConfig {
        &self.config
    }

    pub fn tip_cells(&self) -> &TipCellManager {
        &self.tip_cells
    }

    pub fn sources(&self) -> &SourcesManager {
        &self.sources
    }

    pub fn vessel(&self) -> &GridFunction {
        &self.vessel
    }

    pub fn af(&self) -> &GridFunction {
        &self.af
    }

    pub fn get_recorded_snapshots(&self) -> &Vec<Snapshot> {
        &self.recorded_snapshots
    }
}

fn build_source_map(
    comm: &dyn Communicator,
    config: &SimulationConfig,
    params: &AngioParams,
    mesh: &GridMesh,
    margin: f64,
) -> Result<SourceMap> {
    let sources = &config.sources;
    match sources.layout {
        SourceLayout::Circle => {
            let center = sources
                .center
                .as_deref()
                .and_then(Point::from_slice)
                .ok_or_else(|| missing("circle layout needs sources.center"))?;
            let radius = sources
                .circle_radius
                .ok_or_else(|| missing("circle layout needs sources.circle_radius"))?;
            let points = sources_in_circle_points(&center, radius, params.source_r_c);
            SourceMap::new(mesh, &points, margin)
        }
        SourceLayout::Random => {
            let count = sources
                .count
                .ok_or_else(|| missing("random layout needs sources.count"))?;
            let x_min = sources.x_min.unwrap_or(f64::NEG_INFINITY);
            SourceMap::random(comm, mesh, count, margin, params.seed, |p| p.x() >= x_min)
        }
    }
}

fn missing(message: &str) -> AngioError {
    AngioError::Configuration(message.to_string())
}
