//! Rasterizes agent profiles onto field nodes.
//!
//! Painting never sums: where the painted value is strictly positive it
//! replaces the target value, everywhere else the target is left alone.

use crate::agent::{Agent, TipCell};
use crate::comm::Communicator;
use crate::error::Result;
use crate::field::{GridFunction, PaintTarget};
use crate::mesh::GridMesh;
use angio_common::{AngioParams, Point};
use std::f64::consts::PI;
use std::sync::Arc;

/// Value painted at a point.
pub trait Profile: Sync {
    fn evaluate(&self, point: &Point) -> f64;
}

/// `inside` within `radius` (strictly) of any source, `outside` elsewhere.
#[derive(Debug, Clone)]
pub struct ConstantSourcesProfile {
    centres: Vec<Point>,
    radius: f64,
    inside: f64,
    outside: f64,
}

impl ConstantSourcesProfile {
    pub fn new(centres: Vec<Point>, radius: f64, inside: f64, outside: f64) -> Self {
        ConstantSourcesProfile { centres, radius, inside, outside }
    }
}

impl Profile for ConstantSourcesProfile {
    fn evaluate(&self, point: &Point) -> f64 {
        let r2 = self.radius * self.radius;
        if self.centres.iter().any(|c| c.distance_squared(point) < r2) {
            self.inside
        } else {
            self.outside
        }
    }
}

#[derive(Debug, Clone)]
struct PaintedTipCell {
    position: Point,
    radius: f64,
    velocity_norm: f64,
    af: f64,
}

/// Vessel field produced by moving tip cells.
///
/// Inside a cell the value is `C * alpha_p * af' * radius / |v|`, where `af'`
/// is the local angiogenic factor clamped to `[0, T_p]` and `C` is `pi / 2` in
/// 2D and `4 / 3` in 3D. Overlapping cells take the maximum. Outside every
/// cell the value is `phi_min`.
#[derive(Debug, Clone)]
pub struct TipCellsProfile {
    dim_constant: f64,
    alpha_p: f64,
    t_p: f64,
    phi_min: f64,
    cells: Vec<PaintedTipCell>,
}

impl TipCellsProfile {
    pub fn new(dim: usize, alpha_p: f64, t_p: f64, phi_min: f64) -> Self {
        let dim_constant = if dim == 2 { PI / 2.0 } else { 4.0 / 3.0 };
        TipCellsProfile { dim_constant, alpha_p, t_p, phi_min, cells: Vec::new() }
    }

    pub fn from_params(params: &AngioParams) -> Self {
        Self::new(params.dim, params.alpha_p, params.t_p, params.phi_min)
    }

    /// Registers a cell moving with `velocity` through angiogenic factor `af`.
    /// Returns false, registering nothing, when the cell is at rest.
    pub fn add_tip_cell(&mut self, cell: &TipCell, velocity: &Point, af: f64) -> bool {
        let velocity_norm = velocity.norm();
        if velocity_norm == 0.0 {
            log::debug!("tip cell {} has zero velocity, not painted", cell.id());
            return false;
        }
        self.cells.push(PaintedTipCell {
            position: *cell.position(),
            radius: cell.radius(),
            velocity_norm,
            af,
        });
        true
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    fn clamp_af(&self, af: f64) -> f64 {
        af.clamp(0.0, self.t_p)
    }
}

impl Profile for TipCellsProfile {
    fn evaluate(&self, point: &Point) -> f64 {
        self.cells
            .iter()
            .filter(|cell| cell.position.distance_squared(point) <= cell.radius * cell.radius)
            .map(|cell| {
                self.dim_constant * self.alpha_p * self.clamp_af(cell.af) * cell.radius
                    / cell.velocity_norm
            })
            .reduce(f64::max)
            .unwrap_or(self.phi_min)
    }
}

#[derive(Debug, Clone)]
pub struct FieldPainter<P: Profile> {
    profile: P,
}

impl<P: Profile> FieldPainter<P> {
    pub fn new(profile: P) -> Self {
        FieldPainter { profile }
    }

    pub fn profile(&self) -> &P {
        &self.profile
    }

    /// The profile sampled at every local node of `mesh`.
    pub fn interpolate(&self, mesh: Arc<GridMesh>) -> GridFunction {
        GridFunction::interpolate(mesh, |p| self.profile.evaluate(p))
    }

    /// Paints onto `target` with positive overwrite and returns the painted field.
    ///
    /// Collective: ghost values of the target are refreshed before writing back.
    pub fn apply_to<T>(&self, target: &mut T, comm: &dyn Communicator) -> Result<GridFunction>
    where
        T: PaintTarget + ?Sized,
    {
        let mut collapsed = target.collapse()?;
        let painted = self.interpolate(Arc::clone(collapsed.mesh()));
        let merged: Vec<f64> = collapsed
            .local_values()
            .iter()
            .zip(painted.local_values())
            .map(|(&current, &paint)| if paint > 0.0 { paint } else { current })
            .collect();
        collapsed.set_local_values(&merged)?;
        collapsed.update_ghost_values(comm)?;
        target.assign(&collapsed)?;
        Ok(painted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{LocalCluster, SingleProcess};
    use crate::field::Field;
    use crate::mesh::MeshPartition;

    fn square_slab(rank: usize, size: usize) -> Arc<GridMesh> {
        let corner = Point::new2(20.0, 20.0);
        Arc::new(GridMesh::rectangle(Point::new2(0.0, 0.0), corner, 20, 20, rank, size))
    }

    fn square() -> Arc<GridMesh> {
        square_slab(0, 1)
    }

    fn disc(
        centre: Point,
        radius: f64,
        inside: f64,
        outside: f64,
    ) -> FieldPainter<ConstantSourcesProfile> {
        FieldPainter::new(ConstantSourcesProfile::new(vec![centre], radius, inside, outside))
    }

    #[test]
    fn source_radius_is_exclusive() {
        let profile = ConstantSourcesProfile::new(vec![Point::new2(10.0, 10.0)], 2.0, 1.0, 0.0);
        assert_eq!(profile.evaluate(&Point::new2(11.9, 10.0)), 1.0);
        assert_eq!(profile.evaluate(&Point::new2(12.0, 10.0)), 0.0);
    }

    #[test]
    fn tip_cell_value_follows_the_shape_constant() {
        let mut profile = TipCellsProfile::new(2, 2.0, 0.3, -1.0);
        let cell = TipCell::new(Point::new2(10.0, 10.0), 4.0, 0);
        assert!(profile.add_tip_cell(&cell, &Point::new2(3.0, 4.0), 0.2));
        let expected = PI / 2.0 * 2.0 * 0.2 * 4.0 / 5.0;
        assert!((profile.evaluate(&Point::new2(14.0, 10.0)) - expected).abs() < 1e-12);
        assert_eq!(profile.evaluate(&Point::new2(14.1, 10.0)), -1.0);

        let mut box_profile = TipCellsProfile::new(3, 1.0, 0.3, -1.0);
        let cell3 = TipCell::new(Point::new3(1.0, 1.0, 1.0), 1.0, 0);
        box_profile.add_tip_cell(&cell3, &Point::new3(0.0, 0.0, 1.0), 0.9);
        let inside = box_profile.evaluate(&Point::new3(1.0, 1.0, 1.0));
        assert!((inside - 4.0 / 3.0 * 0.3).abs() < 1e-12);
    }

    #[test]
    fn non_positive_factor_paints_zero_and_overlaps_take_the_maximum() {
        let mut profile = TipCellsProfile::new(2, 1.0, 1.0, -1.0);
        let a = TipCell::new(Point::new2(10.0, 10.0), 3.0, 0);
        let b = TipCell::new(Point::new2(12.0, 10.0), 3.0, 0);
        profile.add_tip_cell(&a, &Point::new2(1.0, 0.0), -0.5);
        profile.add_tip_cell(&b, &Point::new2(2.0, 0.0), 0.5);
        assert_eq!(profile.evaluate(&Point::new2(8.0, 10.0)), 0.0);
        let overlap = profile.evaluate(&Point::new2(11.0, 10.0));
        assert!((overlap - PI / 2.0 * 0.5 * 3.0 / 2.0).abs() < 1e-12);
    }

    #[test]
    fn resting_cells_are_not_registered() {
        let mut profile = TipCellsProfile::new(2, 1.0, 1.0, -1.0);
        let cell = TipCell::new(Point::new2(5.0, 5.0), 2.0, 0);
        assert!(!profile.add_tip_cell(&cell, &Point::zero(2), 1.0));
        assert!(profile.is_empty());
        assert_eq!(profile.evaluate(&Point::new2(5.0, 5.0)), -1.0);
    }

    #[test]
    fn positive_overwrite_replaces_only_painted_nodes() {
        let mesh = square();
        let mut target = GridFunction::interpolate(Arc::clone(&mesh), |_| 0.25);
        let painter = disc(Point::new2(5.0, 5.0), 1.5, 2.0, -3.0);
        let painted = painter.apply_to(&mut target, &SingleProcess).unwrap();

        assert_eq!(target.value_at(&Point::new2(5.0, 5.0)), Some(2.0));
        assert_eq!(target.value_at(&Point::new2(15.0, 15.0)), Some(0.25));
        assert_eq!(painted.value_at(&Point::new2(15.0, 15.0)), Some(-3.0));
    }

    #[test]
    fn painting_twice_equals_painting_once() {
        let mesh = square();
        let mut target = GridFunction::interpolate(Arc::clone(&mesh), |p| (p.x() - 10.0) / 10.0);
        let painter = disc(Point::new2(3.0, 3.0), 4.0, 0.7, 0.0);
        painter.apply_to(&mut target, &SingleProcess).unwrap();
        let once = target.local_values().to_vec();
        painter.apply_to(&mut target, &SingleProcess).unwrap();
        assert_eq!(target.local_values(), &once[..]);
    }

    #[test]
    fn painting_a_component_leaves_the_others_untouched() {
        let mesh = square();
        let n = mesh.local_vertices().len();
        let mut mixed = GridFunction::zeros(Arc::clone(&mesh), 2);
        mixed.set_local_values(&vec![-1.0; 2 * n]).unwrap();

        let painter = disc(Point::new2(10.0, 10.0), 3.0, 1.0, 0.0);
        painter.apply_to(&mut mixed.sub(1), &SingleProcess).unwrap();

        assert!((0..n).all(|v| mixed.node_value(v, 0) == -1.0));
        assert_eq!(mixed.component(1).value_at(&Point::new2(10.0, 10.0)), Some(1.0));
        assert_eq!(mixed.component(1).value_at(&Point::new2(1.0, 1.0)), Some(-1.0));
    }

    #[test]
    fn painting_agrees_across_the_interface() {
        let results = LocalCluster::run(2, |comm| {
            let mesh = square_slab(comm.rank(), 2);
            let mut target = GridFunction::zeros(Arc::clone(&mesh), 1);
            let painter = disc(Point::new2(10.0, 10.0), 2.5, 1.0, 0.0);
            painter.apply_to(&mut target, &comm).unwrap();
            target.value_at(&Point::new2(10.0, 11.0))
        });
        assert_eq!(results, vec![Some(1.0), Some(1.0)]);
    }
}
