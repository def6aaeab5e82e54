//! Tip cell life cycle: activation, movement, reversion and painting.
//!
//! Every public method that touches the registry is collective and must be
//! called by all ranks in the same order. Random draws happen on the root
//! only and are broadcast.

use crate::agent::{Agent, AgentId, TipCell};
use crate::checkpoint::{self, IncrementalCheckpointWriter};
use crate::comm::{CommExt, Communicator, ROOT};
use crate::error::{AngioError, Result};
use crate::field::{Field, GridFunction, PaintTarget};
use crate::mesh::{GridMesh, MeshPartition};
use crate::oracle::{ProximityOracle, StartPoint};
use crate::painter::{FieldPainter, TipCellsProfile};
use crate::partition::{inside_global_mesh, SpatialPartition};
use crate::registry::AgentRegistry;
use angio_common::{AngioParams, Point};
use indexmap::{IndexMap, IndexSet};
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::SeedableRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;

/// What one call to [`TipCellManager::step`] changed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TipCellStepReport {
    pub activated: Option<AgentId>,
    pub left_mesh: usize,
    pub deactivated: usize,
    pub painted: usize,
}

// Velocity and angiogenic factor seen by a cell during its last move.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
struct MoveSample {
    velocity: Point,
    af: f64,
}

pub struct TipCellManager {
    mesh: Arc<GridMesh>,
    params: AngioParams,
    registry: AgentRegistry<TipCell>,
    oracle: ProximityOracle,
    rng: StdRng,
    last_moves: IndexMap<AgentId, MoveSample>,
    latest_field: Option<GridFunction>,
    incremental: Option<IncrementalCheckpointWriter>,
}

impl TipCellManager {
    /// Manager seeded with `initial` tip cells, which must be identical on every rank.
    pub fn new(
        comm: &dyn Communicator,
        mesh: Arc<GridMesh>,
        params: &AngioParams,
        initial: Vec<TipCell>,
    ) -> Result<Self> {
        let partition = SpatialPartition::build(&*mesh, params.r_c);
        let oracle = ProximityOracle::new(&*mesh, params.r_c, StartPoint::West)?;
        let mut registry = AgentRegistry::new(partition);
        for cell in initial {
            registry.add(comm, cell)?;
        }
        log::info!("p{}: tip cell manager starts with {} cells", comm.rank(), registry.len());
        Ok(TipCellManager {
            mesh,
            params: params.clone(),
            registry,
            oracle,
            rng: StdRng::seed_from_u64(params.seed),
            last_moves: IndexMap::new(),
            latest_field: None,
            incremental: None,
        })
    }

    pub fn registry(&self) -> &AgentRegistry<TipCell> {
        &self.registry
    }

    pub fn tip_cells(&self) -> impl Iterator<Item = &TipCell> + '_ {
        self.registry.agents()
    }

    pub fn len(&self) -> usize {
        self.registry.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registry.is_empty()
    }

    /// True if `point` is at least `min_tipcell_distance` away from every tip cell.
    pub fn is_distant_from_tip_cells(&self, point: &Point) -> bool {
        let positions = self.registry.agents().map(|tc| *tc.position());
        distant_from_all(positions, point, self.params.min_tipcell_distance)
    }

    /// Velocity for gradient `grad_af`: `chi * grad_af`, rescaled to norm
    /// `chi * G_M` when the gradient is steeper than `G_M`.
    pub fn tip_cell_velocity(&self, grad_af: &Point) -> Point {
        let g = grad_af.norm();
        if g > self.params.g_max {
            *grad_af * (self.params.chi * self.params.g_max / g)
        } else {
            *grad_af * self.params.chi
        }
    }

    /// Creates at most one tip cell at a randomly chosen activation site.
    pub fn activate_tip_cell<C, A>(
        &mut self,
        comm: &dyn Communicator,
        c: &C,
        af: &A,
        step: u64,
    ) -> Result<Option<AgentId>>
    where
        C: Field + ?Sized,
        A: Field + ?Sized,
    {
        log::info!("p{}: activate_tip_cell", comm.rank());
        let tips: Vec<Point> = self.registry.agents().map(|tc| *tc.position()).collect();
        let params = &self.params;
        let oracle = &self.oracle;
        let globals = self.mesh.local_global_indices();

        let local: Vec<(usize, Point)> = self
            .mesh
            .local_vertices()
            .par_iter()
            .zip(globals.par_iter())
            .filter(|(point, _)| {
                distant_from_all(tips.iter().copied(), point, params.min_tipcell_distance)
                    && is_activation_site(params, oracle, c, af, point)
            })
            .map(|(point, &global)| (global, *point))
            .collect();
        log::debug!("p{}: {} local activation sites", comm.rank(), local.len());

        let choice = comm.gather(&local, ROOT)?.map(|per_rank| {
            let sites: Vec<Point> = per_rank
                .into_iter()
                .flatten()
                .collect::<IndexMap<usize, Point>>()
                .into_values()
                .collect();
            sites.choose(&mut self.rng).copied()
        });
        let Some(position) = comm.broadcast(choice, ROOT)? else {
            return Ok(None);
        };

        let cell = TipCell::new(position, params.r_c, step);
        let id = cell.id();
        self.registry.add(comm, cell)?;
        log::debug!("p{}: created tip cell {} at {:?}", comm.rank(), id, position.coords());
        Ok(Some(id))
    }

    /// Moves every tip cell along the angiogenic factor gradient. Cells that
    /// leave the global mesh are removed and returned.
    pub fn move_tip_cells<A>(&mut self, comm: &dyn Communicator, af: &A) -> Result<Vec<AgentId>>
    where
        A: Field + ?Sized,
    {
        log::info!("p{}: move_tip_cells", comm.rank());
        let cells: Vec<(AgentId, Point)> =
            self.registry.agents().map(|tc| (tc.id(), *tc.position())).collect();

        // Any rank owning the cell's position can evaluate it; the first answer wins.
        let local: Vec<Option<MoveSample>> = cells
            .iter()
            .map(|(_, position)| {
                if !self.mesh.contains_local(position) {
                    return None;
                }
                let grad = af.gradient_at(position)?;
                let value = af.value_at(position)?;
                Some(MoveSample { velocity: self.tip_cell_velocity(&grad), af: value })
            })
            .collect();
        let per_rank = comm.all_gather(&local)?;

        let mut moves = Vec::with_capacity(cells.len());
        let mut unknown = Vec::new();
        for (i, (id, position)) in cells.iter().enumerate() {
            match per_rank.iter().find_map(|samples| samples[i]) {
                Some(sample) => {
                    moves.push((*id, *position + sample.velocity * self.params.dt, sample))
                }
                None => unknown.push(*id),
            }
        }

        let targets: Vec<Point> = moves.iter().map(|(_, target, _)| *target).collect();
        let inside = inside_global_mesh(comm, &*self.mesh, &targets)?;

        self.last_moves.clear();
        let mut outside = unknown;
        for ((id, target, sample), inside) in moves.into_iter().zip(inside) {
            self.registry.move_agent(&id, target)?;
            if inside {
                self.last_moves.insert(id, sample);
            } else {
                outside.push(id);
            }
        }

        let removed = self.registry.remove_many(comm, &outside)?;
        if !removed.is_empty() {
            log::debug!("p{}: {} tip cells left the mesh", comm.rank(), removed.len());
        }
        Ok(removed.iter().map(|tc| tc.id()).collect())
    }

    /// Deactivates tip cells that lost their signal, left the mesh or are
    /// too close to another tip cell. Returns the removed ids.
    pub fn revert_tip_cells<A>(&mut self, comm: &dyn Communicator, af: &A) -> Result<Vec<AgentId>>
    where
        A: Field + ?Sized,
    {
        log::info!("p{}: revert_tip_cells", comm.rank());
        let mut to_remove: Vec<AgentId> = Vec::new();
        let mut to_check: Vec<(AgentId, Point)> = Vec::new();

        for tc in self.registry.local_agents() {
            let position = tc.position();
            let signal = if self.mesh.contains_local(position) {
                af.value_at(position).zip(af.gradient_at(position))
            } else {
                None
            };
            match signal {
                Some((value, grad)) => {
                    if value < self.params.t_c || grad.norm() < self.params.g_m {
                        to_remove.push(tc.id());
                    }
                }
                None => to_check.push((tc.id(), *position)),
            }
        }

        // Cells outside this rank's mesh may still be inside another rank's.
        let unchecked: Vec<(AgentId, Point)> = comm
            .all_gather(&to_check)?
            .into_iter()
            .flatten()
            .collect::<IndexMap<AgentId, Point>>()
            .into_iter()
            .collect();
        let positions: Vec<Point> = unchecked.iter().map(|(_, p)| *p).collect();
        let inside = inside_global_mesh(comm, &*self.mesh, &positions)?;
        to_remove.extend(
            unchecked.iter().zip(inside).filter(|(_, inside)| !inside).map(|((id, _), _)| *id),
        );

        let inhibited = self.lateral_inhibition(comm)?;
        to_remove.extend(inhibited);

        let removed = self.registry.remove_many(comm, &to_remove)?;
        for tc in &removed {
            self.last_moves.shift_remove(&tc.id());
        }
        Ok(removed.iter().map(|tc| tc.id()).collect())
    }

    // Root shuffles the global list and prunes the conflict graph; the
    // pruned ids are broadcast.
    fn lateral_inhibition(&mut self, comm: &dyn Communicator) -> Result<Vec<AgentId>> {
        let proposal = if comm.is_root() {
            let mut cells: Vec<(AgentId, Point)> =
                self.registry.agents().map(|tc| (tc.id(), *tc.position())).collect();
            cells.shuffle(&mut self.rng);
            let positions: Vec<Point> = cells.iter().map(|(_, p)| *p).collect();
            let pruned = prune_conflicts(&positions, self.params.min_tipcell_distance);
            Some(pruned.into_iter().map(|i| cells[i].0).collect::<Vec<_>>())
        } else {
            None
        };
        let pruned = comm.broadcast(proposal, ROOT)?;
        if !pruned.is_empty() {
            log::debug!("p{}: lateral inhibition removes {} tip cells", comm.rank(), pruned.len());
        }
        Ok(pruned)
    }

    /// Paints the surviving tip cells onto `c` and keeps the painted field.
    pub fn paint_tip_cells<T>(&mut self, comm: &dyn Communicator, c: &mut T) -> Result<usize>
    where
        T: PaintTarget + ?Sized,
    {
        let mut profile = TipCellsProfile::from_params(&self.params);
        for tc in self.registry.agents() {
            if let Some(sample) = self.last_moves.get(&tc.id()) {
                profile.add_tip_cell(tc, &sample.velocity, sample.af);
            }
        }
        let painted = profile.len();
        let field = FieldPainter::new(profile).apply_to(c, comm)?;
        self.latest_field = Some(field);
        Ok(painted)
    }

    /// One full tip cell update in fixed order: activate, move, revert, paint.
    pub fn step<T, A>(
        &mut self,
        comm: &dyn Communicator,
        c: &mut T,
        af: &A,
        step: u64,
    ) -> Result<TipCellStepReport>
    where
        T: Field + PaintTarget + ?Sized,
        A: Field + ?Sized,
    {
        let activated = self.activate_tip_cell(comm, &*c, af, step)?;
        let left_mesh = self.move_tip_cells(comm, af)?.len();
        let deactivated = self.revert_tip_cells(comm, af)?.len();
        let painted = self.paint_tip_cells(comm, c)?;
        Ok(TipCellStepReport { activated, left_mesh, deactivated, painted })
    }

    /// Field produced by the most recent painting.
    pub fn latest_tip_cells_field(&self) -> Result<&GridFunction> {
        self.latest_field
            .as_ref()
            .ok_or(AngioError::Precondition("tip cell field requested before any painting"))
    }

    /// Writes the current tip cells to `path`. Collective.
    pub fn save_tip_cells(&self, comm: &dyn Communicator, path: &Path) -> Result<()> {
        checkpoint::save_agents(comm, &self.registry, path)
    }

    /// Appends the current tip cells under `step_<step>`. The first call
    /// fixes the file; later calls must name the same one. Collective.
    pub fn save_incremental_tip_cells(
        &mut self,
        comm: &dyn Communicator,
        path: &Path,
        step: u64,
    ) -> Result<()> {
        let writer = match &mut self.incremental {
            Some(writer) if writer.path() == path => writer,
            Some(writer) => {
                return Err(AngioError::Configuration(format!(
                    "incremental tip cells already go to {}, not {}",
                    writer.path().display(),
                    path.display()
                )))
            }
            empty => empty.insert(IncrementalCheckpointWriter::new(path)?),
        };
        writer.save(comm, &self.registry, step)
    }
}

fn distant_from_all<I>(tips: I, point: &Point, min_distance: f64) -> bool
where
    I: IntoIterator<Item = Point>,
{
    tips.into_iter().all(|tip| tip.distance(point) >= min_distance)
}

// Conditions (b) to (e) of activation; distance is checked by the caller.
fn is_activation_site<C, A>(
    params: &AngioParams,
    oracle: &ProximityOracle,
    c: &C,
    af: &A,
    point: &Point,
) -> bool
where
    C: Field + ?Sized,
    A: Field + ?Sized,
{
    c.value_at(point).is_some_and(|v| v > params.phi_th)
        && af.value_at(point).is_some_and(|v| v > params.t_c)
        && af.gradient_at(point).is_some_and(|g| g.norm() > params.g_m)
        && !oracle.check(point, c, -params.phi_th, |value, threshold| value < threshold)
}

/// Greedy max-degree elimination on the conflict graph of `positions`
/// (edges between points closer than `min_distance`).
///
/// Repeatedly removes the node with the most remaining conflicts, the
/// earliest index winning ties, until no conflict is left. Returns removed
/// indices in removal order. The survivors are pairwise at least
/// `min_distance` apart; the surviving set is valid, not necessarily maximum.
pub fn prune_conflicts(positions: &[Point], min_distance: f64) -> Vec<usize> {
    let n = positions.len();
    let mut neighbours: Vec<IndexSet<usize>> = vec![IndexSet::new(); n];
    for i in 0..n {
        for j in (i + 1)..n {
            if positions[i].distance(&positions[j]) < min_distance {
                neighbours[i].insert(j);
                neighbours[j].insert(i);
            }
        }
    }

    let mut removed = Vec::new();
    let mut alive = vec![true; n];
    loop {
        let worst = (0..n)
            .filter(|&i| alive[i])
            .map(|i| (neighbours[i].len(), i))
            .fold(None, |best: Option<(usize, usize)>, (degree, i)| match best {
                Some((best_degree, _)) if best_degree >= degree => best,
                _ => Some((degree, i)),
            });
        let Some((degree, victim)) = worst else { break };
        if degree == 0 {
            break;
        }
        alive[victim] = false;
        for other in std::mem::take(&mut neighbours[victim]) {
            neighbours[other].shift_remove(&victim);
        }
        removed.push(victim);
    }
    removed
}
