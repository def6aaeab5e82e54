//! Source cells: placement, consumption by approaching vessels, and painting
//! of the angiogenic factor they express.

use crate::agent::{Agent, AgentId, SourceCell};
use crate::checkpoint;
use crate::comm::{CommExt, Communicator, ROOT};
use crate::error::{AngioError, Result};
use crate::field::{Field, GridFunction, PaintTarget};
use crate::mesh::{GridMesh, MeshPartition};
use crate::oracle::{ProximityOracle, StartPoint};
use crate::painter::{ConstantSourcesProfile, FieldPainter};
use crate::partition::SpatialPartition;
use crate::registry::AgentRegistry;
use angio_common::{AngioParams, Point};
use indexmap::IndexMap;
use rand::rngs::StdRng;
use rand::seq::IndexedRandom;
use rand::SeedableRng;
use rayon::prelude::*;
use std::f64::consts::PI;
use std::path::Path;
use std::sync::Arc;

/// Points filling a disk: the centre, then rings of radius `2rc, 4rc, ...`
/// below `floor(circle_radius)`, each holding `floor(2 pi r / 2rc)` evenly
/// spaced points. Extra coordinates of `center` are kept as is.
pub fn sources_in_circle_points(
    center: &Point,
    circle_radius: f64,
    cell_radius: f64,
) -> Vec<Point> {
    let mut points = vec![*center];
    let diameter = 2.0 * cell_radius;
    if diameter <= 0.0 {
        return points;
    }
    let limit = circle_radius.floor();
    let mut ring = 1;
    loop {
        let radius = diameter * ring as f64;
        if radius >= limit {
            break;
        }
        let count = (2.0 * PI * radius / diameter).floor() as usize;
        for k in 0..count {
            let angle = 2.0 * PI * k as f64 / count as f64;
            points.push(
                center
                    .with(0, center.x() + radius * angle.cos())
                    .with(1, center.y() + radius * angle.sin()),
            );
        }
        ring += 1;
    }
    points
}

/// Positions of every source cell, replicated on all ranks.
#[derive(Debug, Clone)]
pub struct SourceMap {
    registry: AgentRegistry<SourceCell>,
}

impl SourceMap {
    /// Sources at `points`, identical on every rank. `margin` pads the local box.
    /// Repeated points yield a single source.
    pub fn new(mesh: &dyn MeshPartition, points: &[Point], margin: f64) -> Result<Self> {
        let partition = SpatialPartition::build(mesh, margin);
        let registry = AgentRegistry::from_points(partition, points, |p| SourceCell::new(p, 0))?;
        Ok(SourceMap { registry })
    }

    /// `n` distinct mesh vertices satisfying `pick`, drawn on the root.
    ///
    /// Collective. If fewer than `n` vertices qualify, all of them are used.
    pub fn random<W>(
        comm: &dyn Communicator,
        mesh: &GridMesh,
        n: usize,
        margin: f64,
        seed: u64,
        pick: W,
    ) -> Result<Self>
    where
        W: Fn(&Point) -> bool + Sync,
    {
        let globals = mesh.local_global_indices();
        let pickable: Vec<(usize, Point)> = mesh
            .local_vertices()
            .par_iter()
            .zip(globals.par_iter())
            .filter(|&(point, _)| pick(point))
            .map(|(point, &global)| (global, *point))
            .collect();

        let chosen = comm.gather(&pickable, ROOT)?.map(|per_rank| {
            let candidates: Vec<Point> = per_rank
                .into_iter()
                .flatten()
                .collect::<IndexMap<usize, Point>>()
                .into_values()
                .collect();
            if candidates.len() <= n {
                log::warn!(
                    "Asked for {} random sources but only {} vertices qualify; using all of them",
                    n,
                    candidates.len()
                );
                candidates
            } else {
                let mut rng = StdRng::seed_from_u64(seed);
                candidates.choose_multiple(&mut rng, n).copied().collect()
            }
        });
        let points: Vec<Point> = comm.broadcast(chosen, ROOT)?;
        log::info!("p{}: placed {} random sources", comm.rank(), points.len());
        Self::new(mesh, &points, margin)
    }

    pub fn registry(&self) -> &AgentRegistry<SourceCell> {
        &self.registry
    }

    pub fn global_source_cells(&self) -> impl Iterator<Item = &SourceCell> + '_ {
        self.registry.agents()
    }

    pub fn local_source_cells(&self) -> impl Iterator<Item = &SourceCell> + '_ {
        self.registry.local_agents()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// Removes the union of every rank's candidates. Collective.
    pub fn remove_sources(
        &mut self,
        comm: &dyn Communicator,
        candidates: &[AgentId],
    ) -> Result<Vec<SourceCell>> {
        self.registry.remove_many(comm, candidates)
    }
}

pub struct SourcesManager {
    mesh: Arc<GridMesh>,
    params: AngioParams,
    source_map: SourceMap,
    default_oracle: Option<ProximityOracle>,
}

impl SourcesManager {
    pub fn new(source_map: SourceMap, mesh: Arc<GridMesh>, params: &AngioParams) -> Result<Self> {
        let default_oracle = match params.d {
            Some(d) => Some(ProximityOracle::new(&*mesh, d, StartPoint::East)?),
            None => {
                log::debug!("no interaction radius configured; callers must supply one");
                None
            }
        };
        Ok(SourcesManager { mesh, params: params.clone(), source_map, default_oracle })
    }

    pub fn source_map(&self) -> &SourceMap {
        &self.source_map
    }

    /// Removes sources with vessel (`c > phi_th`) within the interaction
    /// radius, or within `d` when given. Collective.
    pub fn remove_sources_near_vessels<C>(
        &mut self,
        comm: &dyn Communicator,
        c: &C,
        d: Option<f64>,
    ) -> Result<Vec<SourceCell>>
    where
        C: Field + ?Sized,
    {
        let supplied;
        let oracle = match d {
            Some(d) => {
                supplied = ProximityOracle::new(&*self.mesh, d, StartPoint::East)?;
                &supplied
            }
            None => self.default_oracle.as_ref().ok_or_else(|| {
                let message = "source removal needs an interaction radius, configured or explicit";
                AngioError::Configuration(message.to_string())
            })?,
        };

        let phi_th = self.params.phi_th;
        let local: Vec<(AgentId, Point)> =
            self.source_map.local_source_cells().map(|sc| (sc.id(), *sc.position())).collect();
        let consumed: Vec<AgentId> = local
            .par_iter()
            .filter(|(_, position)| {
                oracle.check(position, c, phi_th, |value, threshold| value > threshold)
            })
            .map(|(id, _)| *id)
            .collect();
        log::debug!("p{}: {} local sources reached by vessels", comm.rank(), consumed.len());

        let removed = self.source_map.remove_sources(comm, &consumed)?;
        if !removed.is_empty() {
            log::info!(
                "p{}: removed {} sources, {} left",
                comm.rank(),
                removed.len(),
                self.source_map.len()
            );
        }
        Ok(removed)
    }

    /// Paints `T_s` around every local source onto `af` with positive
    /// overwrite. Collective. Returns the painted field.
    pub fn apply_sources<T>(&self, comm: &dyn Communicator, af: &mut T) -> Result<GridFunction>
    where
        T: PaintTarget + ?Sized,
    {
        let centres: Vec<Point> =
            self.source_map.local_source_cells().map(|sc| *sc.position()).collect();
        let params = &self.params;
        let profile =
            ConstantSourcesProfile::new(centres, params.source_r_c, params.t_s, params.t_min);
        FieldPainter::new(profile).apply_to(af, comm)
    }

    /// Writes the remaining sources to `path`. Collective.
    pub fn save_sources(&self, comm: &dyn Communicator, path: &Path) -> Result<()> {
        checkpoint::save_agents(comm, self.source_map.registry(), path)
    }
}
