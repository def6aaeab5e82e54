//! Nodal (Q1) fields on a [`GridMesh`].
//!
//! A `GridFunction` stores one value per local vertex and component
//! (component index varies fastest). Point evaluation uses multilinear
//! interpolation inside the locally owned cell containing the point.

use crate::comm::{CommExt, Communicator};
use crate::error::{AngioError, Result};
use crate::mesh::{GridMesh, MeshPartition};
use angio_common::Point;
use rayon::prelude::*;
use std::collections::HashMap;
use std::sync::Arc;

/// Read access to a continuum field. Both queries return `None` outside the
/// local partition.
pub trait Field: Sync {
    fn value_at(&self, point: &Point) -> Option<f64>;
    fn gradient_at(&self, point: &Point) -> Option<Point>;
}

/// A field that agent profiles can be painted onto.
///
/// Painting works on a scalar copy (`collapse`) that is written back with
/// `assign`, leaving every other component untouched.
pub trait PaintTarget {
    fn collapse(&self) -> Result<GridFunction>;
    fn assign(&mut self, collapsed: &GridFunction) -> Result<()>;
}

#[derive(Debug, Clone)]
pub struct GridFunction {
    mesh: Arc<GridMesh>,
    components: usize,
    values: Vec<f64>,
}

impl GridFunction {
    /// A field with `components` components, all zero.
    pub fn zeros(mesh: Arc<GridMesh>, components: usize) -> Self {
        let len = mesh.local_vertices().len() * components;
        GridFunction { mesh, components, values: vec![0.0; len] }
    }

    /// Scalar field taking `f(vertex)` at every local vertex.
    pub fn interpolate<F>(mesh: Arc<GridMesh>, f: F) -> Self
    where
        F: Fn(&Point) -> f64 + Sync,
    {
        let values = mesh.local_vertices().par_iter().map(&f).collect();
        GridFunction { mesh, components: 1, values }
    }

    pub fn mesh(&self) -> &Arc<GridMesh> {
        &self.mesh
    }

    pub fn components(&self) -> usize {
        self.components
    }

    /// Locally stored values, ghosts included.
    pub fn local_values(&self) -> &[f64] {
        &self.values
    }

    /// Replaces every locally stored value. Ghost entries must be refreshed
    /// with [`GridFunction::update_ghost_values`] afterwards.
    pub fn set_local_values(&mut self, values: &[f64]) -> Result<()> {
        if values.len() != self.values.len() {
            return Err(AngioError::Precondition(
                "local value array length does not match the field",
            ));
        }
        self.values.copy_from_slice(values);
        Ok(())
    }

    pub fn node_value(&self, local_vertex: usize, component: usize) -> f64 {
        self.values[local_vertex * self.components + component]
    }

    /// Read-only view of one component.
    pub fn component(&self, component: usize) -> ComponentView<'_> {
        ComponentView { function: self, component }
    }

    /// Mutable view of one component, usable as a [`PaintTarget`].
    pub fn sub(&mut self, component: usize) -> SubFunction<'_> {
        SubFunction { function: self, component }
    }

    /// Copies one component into a new scalar field.
    pub fn collapse_component(&self, component: usize) -> GridFunction {
        let values = self
            .values
            .iter()
            .skip(component)
            .step_by(self.components)
            .copied()
            .collect();
        GridFunction { mesh: Arc::clone(&self.mesh), components: 1, values }
    }

    /// Writes a scalar field back into one component.
    pub fn assign_component(&mut self, component: usize, scalar: &GridFunction) -> Result<()> {
        if scalar.components != 1 || scalar.values.len() * self.components != self.values.len() {
            return Err(AngioError::Precondition("component assignment from an incompatible field"));
        }
        for (vertex, &value) in scalar.values.iter().enumerate() {
            self.values[vertex * self.components + component] = value;
        }
        Ok(())
    }

    /// Copies owned interface values into the ghost copies held by neighbouring ranks.
    ///
    /// Collective: every rank must call it after mutating local values.
    pub fn update_ghost_values(&mut self, comm: &dyn Communicator) -> Result<()> {
        let width = self.components;
        let owned: Vec<(usize, Vec<f64>)> = self
            .mesh
            .shared_owned_vertices()
            .into_iter()
            .map(|(local, global)| {
                (global, self.values[local * width..(local + 1) * width].to_vec())
            })
            .collect();
        let everything = comm.all_gather(&owned)?;

        let ghosts: HashMap<usize, usize> = self
            .mesh
            .ghost_vertices()
            .into_iter()
            .map(|(local, global)| (global, local))
            .collect();
        if ghosts.is_empty() {
            return Ok(());
        }
        for (global, values) in everything.into_iter().flatten() {
            if let Some(&local) = ghosts.get(&global) {
                self.values[local * width..(local + 1) * width].copy_from_slice(&values);
            }
        }
        Ok(())
    }

    fn eval_component(&self, component: usize, point: &Point) -> Option<f64> {
        let loc = self.mesh.locate(point)?;
        let dim = self.mesh.dim();
        let mut value = 0.0;
        for corner in 0..(1usize << dim) {
            let (ijk, weight) = corner_weight(&loc.corner, &loc.t, dim, corner, None);
            let local = self.mesh.local_index(ijk)?;
            value += weight * self.node_value(local, component);
        }
        Some(value)
    }

    fn gradient_component(&self, component: usize, point: &Point) -> Option<Point> {
        let loc = self.mesh.locate(point)?;
        let dim = self.mesh.dim();
        let mut grad = Point::zero(dim);
        for axis in 0..dim {
            let mut derivative = 0.0;
            for corner in 0..(1usize << dim) {
                let (ijk, weight) = corner_weight(&loc.corner, &loc.t, dim, corner, Some(axis));
                let local = self.mesh.local_index(ijk)?;
                derivative += weight * self.node_value(local, component);
            }
            grad = grad.with(axis, derivative / self.mesh.spacing(axis));
        }
        Some(grad)
    }
}

// Grid index of a cell corner and its multilinear weight. With `derive`
// set, the factor along that axis is replaced by its derivative (+-1).
fn corner_weight(
    base: &[usize; 3],
    t: &[f64; 3],
    dim: usize,
    corner: usize,
    derive: Option<usize>,
) -> ([usize; 3], f64) {
    let mut ijk = *base;
    let mut weight = 1.0;
    for axis in 0..dim {
        let upper = (corner >> axis) & 1 == 1;
        if upper {
            ijk[axis] += 1;
        }
        weight *= match (derive == Some(axis), upper) {
            (true, true) => 1.0,
            (true, false) => -1.0,
            (false, true) => t[axis],
            (false, false) => 1.0 - t[axis],
        };
    }
    (ijk, weight)
}

impl Field for GridFunction {
    fn value_at(&self, point: &Point) -> Option<f64> {
        self.eval_component(0, point)
    }

    fn gradient_at(&self, point: &Point) -> Option<Point> {
        self.gradient_component(0, point)
    }
}

impl PaintTarget for GridFunction {
    fn collapse(&self) -> Result<GridFunction> {
        if self.components != 1 {
            return Err(AngioError::Configuration(format!(
                "cannot paint a scalar profile onto a {}-component field; \
                 paint a component view instead",
                self.components
            )));
        }
        Ok(self.clone())
    }

    fn assign(&mut self, collapsed: &GridFunction) -> Result<()> {
        self.set_local_values(&collapsed.values)
    }
}

/// Read-only view of one component of a mixed field.
#[derive(Debug, Clone, Copy)]
pub struct ComponentView<'a> {
    function: &'a GridFunction,
    component: usize,
}

impl Field for ComponentView<'_> {
    fn value_at(&self, point: &Point) -> Option<f64> {
        self.function.eval_component(self.component, point)
    }

    fn gradient_at(&self, point: &Point) -> Option<Point> {
        self.function.gradient_component(self.component, point)
    }
}

/// Mutable view of one component of a mixed field.
#[derive(Debug)]
pub struct SubFunction<'a> {
    function: &'a mut GridFunction,
    component: usize,
}

impl Field for SubFunction<'_> {
    fn value_at(&self, point: &Point) -> Option<f64> {
        self.function.eval_component(self.component, point)
    }

    fn gradient_at(&self, point: &Point) -> Option<Point> {
        self.function.gradient_component(self.component, point)
    }
}

impl PaintTarget for SubFunction<'_> {
    fn collapse(&self) -> Result<GridFunction> {
        Ok(self.function.collapse_component(self.component))
    }

    fn assign(&mut self, collapsed: &GridFunction) -> Result<()> {
        self.function.assign_component(self.component, collapsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm::{LocalCluster, SingleProcess};

    fn square(rank: usize, size: usize) -> Arc<GridMesh> {
        let corner = Point::new2(10.0, 10.0);
        Arc::new(GridMesh::rectangle(Point::new2(0.0, 0.0), corner, 10, 10, rank, size))
    }

    #[test]
    fn bilinear_functions_are_reproduced_exactly() {
        let f =
            GridFunction::interpolate(square(0, 1), |p| 2.0 * p.x() - p.y() + 0.5 * p.x() * p.y());
        let p = Point::new2(3.3, 6.7);
        let expected = 2.0 * 3.3 - 6.7 + 0.5 * 3.3 * 6.7;
        assert!((f.value_at(&p).unwrap() - expected).abs() < 1e-9);

        let grad = f.gradient_at(&p).unwrap();
        assert!((grad.x() - (2.0 + 0.5 * 6.7)).abs() < 1e-9);
        assert!((grad.y() - (-1.0 + 0.5 * 3.3)).abs() < 1e-9);
    }

    #[test]
    fn evaluation_outside_partition_is_none() {
        let f = GridFunction::interpolate(square(0, 2), |p| p.x());
        assert!(f.value_at(&Point::new2(4.0, 4.0)).is_some());
        assert!(f.value_at(&Point::new2(8.0, 4.0)).is_none());
        assert!(f.gradient_at(&Point::new2(-1.0, 4.0)).is_none());
    }

    #[test]
    fn box_gradient_of_linear_field() {
        let corner = Point::new3(4.0, 4.0, 4.0);
        let mesh = Arc::new(GridMesh::cuboid(Point::zero(3), corner, 4, 4, 4, 0, 1));
        let f = GridFunction::interpolate(mesh, |p| p.x() + 2.0 * p.y() - 3.0 * p.z());
        let grad = f.gradient_at(&Point::new3(1.2, 2.7, 3.1)).unwrap();
        assert!((grad.x() - 1.0).abs() < 1e-12);
        assert!((grad.y() - 2.0).abs() < 1e-12);
        assert!((grad.z() + 3.0).abs() < 1e-12);
    }

    #[test]
    fn component_round_trip_leaves_other_components_alone() {
        let mesh = square(0, 1);
        let n = mesh.local_vertices().len();
        let mut mixed = GridFunction::zeros(Arc::clone(&mesh), 2);
        let init: Vec<f64> = (0..2 * n).map(|i| i as f64).collect();
        mixed.set_local_values(&init).unwrap();

        let mut collapsed = mixed.sub(1).collapse().unwrap();
        assert_eq!(collapsed.components(), 1);
        assert_eq!(collapsed.local_values()[0], 1.0);
        collapsed.set_local_values(&vec![-5.0; n]).unwrap();
        mixed.sub(1).assign(&collapsed).unwrap();

        for v in 0..n {
            assert_eq!(mixed.node_value(v, 0), (2 * v) as f64);
            assert_eq!(mixed.node_value(v, 1), -5.0);
        }
    }

    #[test]
    fn mixed_field_cannot_be_painted_whole() {
        let mixed = GridFunction::zeros(square(0, 1), 2);
        assert!(matches!(mixed.collapse(), Err(AngioError::Configuration(_))));
    }

    #[test]
    fn ghost_update_copies_owner_values() {
        let results = LocalCluster::run(2, |comm| {
            let mesh = square(comm.rank(), 2);
            // Each rank writes its own rank number everywhere, then resyncs.
            let mut f = GridFunction::interpolate(Arc::clone(&mesh), |_| comm.rank() as f64);
            f.update_ghost_values(&comm).unwrap();
            f.value_at(&Point::new2(5.0, 2.0)).unwrap()
        });
        // The interface column belongs to rank 1 on both sides.
        assert_eq!(results, vec![1.0, 1.0]);
    }

    #[test]
    fn ghost_update_is_noop_on_single_rank() {
        let mut f = GridFunction::interpolate(square(0, 1), |p| p.y());
        let before = f.local_values().to_vec();
        f.update_ghost_values(&SingleProcess).unwrap();
        assert_eq!(f.local_values(), &before[..]);
    }
}
