//! Structured rectangle (2D) and box (3D) meshes decomposed into slabs along x.
//!
//! Rank `r` owns the cell columns `[r*nx/size, (r+1)*nx/size)` and stores the
//! vertices of those cells. The vertex column at a slab interface is stored by
//! both neighbours: the rank whose cells start there owns it, the other keeps a
//! ghost copy.

use angio_common::{MeshConfig, Point};
use std::ops::Range;

/// The part of a decomposed mesh visible to one rank.
pub trait MeshPartition: Send + Sync {
    /// Geometric dimension (2 or 3).
    fn dim(&self) -> usize;

    /// Coordinates of every vertex stored by this rank, ghosts included.
    fn local_vertices(&self) -> &[Point];

    /// True if `point` lies in a cell owned by this rank (closed cells).
    fn contains_local(&self, point: &Point) -> bool;

    /// Smallest vertex spacing, used to size sampling steps.
    fn min_spacing(&self) -> f64;
}

// Relative tolerance used by point-in-cell tests.
const CONTAINS_EPS: f64 = 1e-10;

/// Cell containing a point, with local coordinates in `[0, 1]` along each axis.
#[derive(Debug, Clone, Copy)]
pub struct CellLocation {
    /// Global grid index of the cell's lower corner.
    pub corner: [usize; 3],
    pub t: [f64; 3],
}

#[derive(Debug, Clone)]
pub struct GridMesh {
    dim: usize,
    origin: Point,
    divisions: [usize; 3],
    spacing: [f64; 3],
    rank: usize,
    size: usize,
    cells_x: Range<usize>,
    vertices: Vec<Point>,
}

impl GridMesh {
    /// Rectangle `[p0, p1]` split into `nx * ny` cells, seen by `rank` of `size`.
    pub fn rectangle(p0: Point, p1: Point, nx: usize, ny: usize, rank: usize, size: usize) -> Self {
        Self::build(2, p0, p1, [nx, ny, 0], rank, size)
    }

    /// Box `[p0, p1]` split into `nx * ny * nz` cells, seen by `rank` of `size`.
    pub fn cuboid(
        p0: Point,
        p1: Point,
        nx: usize,
        ny: usize,
        nz: usize,
        rank: usize,
        size: usize,
    ) -> Self {
        Self::build(3, p0, p1, [nx, ny, nz], rank, size)
    }

    /// Mesh described by the `[mesh]` section, anchored at the origin.
    pub fn from_config(config: &MeshConfig, rank: usize, size: usize) -> Self {
        match (config.depth, config.nz) {
            (Some(depth), Some(nz)) => Self::cuboid(
                Point::zero(3),
                Point::new3(config.width, config.height, depth),
                config.nx,
                config.ny,
                nz,
                rank,
                size,
            ),
            _ => Self::rectangle(
                Point::zero(2),
                Point::new2(config.width, config.height),
                config.nx,
                config.ny,
                rank,
                size,
            ),
        }
    }

    fn build(
        dim: usize,
        p0: Point,
        p1: Point,
        divisions: [usize; 3],
        rank: usize,
        size: usize,
    ) -> Self {
        let mut spacing = [0.0; 3];
        for axis in 0..dim {
            spacing[axis] = (p1[axis] - p0[axis]) / divisions[axis] as f64;
        }
        let nx = divisions[0];
        let cells_x = (rank * nx / size)..((rank + 1) * nx / size);

        let mut mesh = GridMesh {
            dim,
            origin: p0,
            divisions,
            spacing,
            rank,
            size,
            cells_x,
            vertices: Vec::new(),
        };
        mesh.vertices = mesh.build_local_vertices();
        log::debug!(
            "p{}: mesh slab with cell columns {:?} and {} local vertices",
            rank,
            mesh.cells_x,
            mesh.vertices.len()
        );
        mesh
    }

    fn build_local_vertices(&self) -> Vec<Point> {
        if self.cells_x.is_empty() {
            return Vec::new();
        }
        let mut vertices = Vec::with_capacity(self.local_vertex_count());
        for k in 0..self.nodes_along(2) {
            for j in 0..self.nodes_along(1) {
                for i in self.cells_x.start..=self.cells_x.end {
                    vertices.push(self.vertex_point([i, j, k]));
                }
            }
        }
        vertices
    }

    /// Number of vertex layers along `axis` across the whole mesh.
    fn nodes_along(&self, axis: usize) -> usize {
        if axis < self.dim { self.divisions[axis] + 1 } else { 1 }
    }

    fn local_columns(&self) -> usize {
        if self.cells_x.is_empty() { 0 } else { self.cells_x.len() + 1 }
    }

    fn local_vertex_count(&self) -> usize {
        self.local_columns() * self.nodes_along(1) * self.nodes_along(2)
    }

    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn spacing(&self, axis: usize) -> f64 {
        self.spacing[axis]
    }

    /// Coordinates of the vertex with global grid index `ijk`.
    pub fn vertex_point(&self, ijk: [usize; 3]) -> Point {
        let mut p = self.origin;
        for axis in 0..self.dim {
            p = p.with(axis, self.origin[axis] + ijk[axis] as f64 * self.spacing[axis]);
        }
        p
    }

    /// Global vertex number, identical on every rank.
    pub fn global_index(&self, ijk: [usize; 3]) -> usize {
        let nx1 = self.nodes_along(0);
        let ny1 = self.nodes_along(1);
        (ijk[2] * ny1 + ijk[1]) * nx1 + ijk[0]
    }

    /// Position of vertex `ijk` in this rank's storage, if stored here.
    pub fn local_index(&self, ijk: [usize; 3]) -> Option<usize> {
        if self.cells_x.is_empty() || ijk[0] < self.cells_x.start || ijk[0] > self.cells_x.end {
            return None;
        }
        let cols = self.local_columns();
        Some((ijk[2] * self.nodes_along(1) + ijk[1]) * cols + (ijk[0] - self.cells_x.start))
    }

    /// Global vertex numbers of the local vertices, in storage order.
    pub fn local_global_indices(&self) -> Vec<usize> {
        if self.cells_x.is_empty() {
            return Vec::new();
        }
        let mut out = Vec::with_capacity(self.local_vertex_count());
        for k in 0..self.nodes_along(2) {
            for j in 0..self.nodes_along(1) {
                for i in self.cells_x.start..=self.cells_x.end {
                    out.push(self.global_index([i, j, k]));
                }
            }
        }
        out
    }

    fn column_entries(&self, column: usize) -> Vec<(usize, usize)> {
        let mut out = Vec::new();
        for k in 0..self.nodes_along(2) {
            for j in 0..self.nodes_along(1) {
                let ijk = [column, j, k];
                if let Some(local) = self.local_index(ijk) {
                    out.push((local, self.global_index(ijk)));
                }
            }
        }
        out
    }

    /// `(local, global)` indices of owned vertices that other ranks keep as ghosts.
    pub fn shared_owned_vertices(&self) -> Vec<(usize, usize)> {
        if self.cells_x.is_empty() || self.cells_x.start == 0 {
            return Vec::new();
        }
        self.column_entries(self.cells_x.start)
    }

    /// `(local, global)` indices of ghost vertices owned by another rank.
    pub fn ghost_vertices(&self) -> Vec<(usize, usize)> {
        if self.cells_x.is_empty() || self.cells_x.end == self.divisions[0] {
            return Vec::new();
        }
        self.column_entries(self.cells_x.end)
    }

    /// Locates `point` in a locally owned cell.
    pub fn locate(&self, point: &Point) -> Option<CellLocation> {
        if !self.contains_local(point) {
            return None;
        }
        let mut corner = [0usize; 3];
        let mut t = [0.0f64; 3];
        for axis in 0..self.dim {
            let (lo, hi) = self.cell_range(axis);
            let rel = (point[axis] - self.origin[axis]) / self.spacing[axis];
            let cell = (rel.floor().max(0.0) as usize).clamp(lo, hi - 1);
            corner[axis] = cell;
            t[axis] = (rel - cell as f64).clamp(0.0, 1.0);
        }
        Some(CellLocation { corner, t })
    }

    // Owned cell index range along an axis.
    fn cell_range(&self, axis: usize) -> (usize, usize) {
        if axis == 0 {
            (self.cells_x.start, self.cells_x.end)
        } else {
            (0, self.divisions[axis])
        }
    }
}

impl MeshPartition for GridMesh {
    fn dim(&self) -> usize {
        self.dim
    }

    fn local_vertices(&self) -> &[Point] {
        &self.vertices
    }

    fn contains_local(&self, point: &Point) -> bool {
        if self.cells_x.is_empty() || point.dim() != self.dim {
            return false;
        }
        (0..self.dim).all(|axis| {
            let (lo, hi) = self.cell_range(axis);
            let lo = self.origin[axis] + lo as f64 * self.spacing[axis];
            let hi = self.origin[axis] + hi as f64 * self.spacing[axis];
            let eps = CONTAINS_EPS * (hi - lo).abs().max(1.0);
            point[axis] >= lo - eps && point[axis] <= hi + eps
        })
    }

    fn min_spacing(&self) -> f64 {
        self.spacing[..self.dim].iter().copied().fold(f64::INFINITY, f64::min)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit_square(rank: usize, size: usize) -> GridMesh {
        GridMesh::rectangle(Point::new2(0.0, 0.0), Point::new2(10.0, 10.0), 10, 10, rank, size)
    }

    #[test]
    fn single_rank_stores_every_vertex() {
        let mesh = unit_square(0, 1);
        assert_eq!(mesh.local_vertices().len(), 121);
        assert!(mesh.ghost_vertices().is_empty());
        assert!(mesh.shared_owned_vertices().is_empty());
        assert!(mesh.contains_local(&Point::new2(10.0, 0.0)));
        assert!(!mesh.contains_local(&Point::new2(10.5, 0.0)));
    }

    #[test]
    fn slabs_share_interface_column() {
        let left = unit_square(0, 2);
        let right = unit_square(1, 2);
        assert_eq!(left.local_vertices().len(), 6 * 11);
        assert_eq!(right.local_vertices().len(), 6 * 11);

        let ghosts: Vec<usize> = left.ghost_vertices().iter().map(|&(_, g)| g).collect();
        let shared: Vec<usize> = right.shared_owned_vertices().iter().map(|&(_, g)| g).collect();
        assert_eq!(ghosts, shared);

        let interface = Point::new2(5.0, 3.0);
        assert!(left.contains_local(&interface) && right.contains_local(&interface));
        assert!(!left.contains_local(&Point::new2(7.0, 3.0)));
    }

    #[test]
    fn more_ranks_than_columns_leaves_empty_slabs() {
        let mesh = GridMesh::rectangle(Point::new2(0.0, 0.0), Point::new2(2.0, 1.0), 2, 1, 0, 4);
        assert!(mesh.local_vertices().is_empty());
        assert!(!mesh.contains_local(&Point::new2(0.0, 0.0)));
    }

    #[test]
    fn locate_returns_local_coordinates() {
        let mesh = unit_square(0, 1);
        let loc = mesh.locate(&Point::new2(2.25, 7.5)).expect("inside");
        assert_eq!(&loc.corner[..2], &[2, 7]);
        assert!((loc.t[0] - 0.25).abs() < 1e-12);
        assert!((loc.t[1] - 0.5).abs() < 1e-12);

        // The upper boundary falls in the last cell.
        let edge = mesh.locate(&Point::new2(10.0, 10.0)).expect("on boundary");
        assert_eq!(&edge.corner[..2], &[9, 9]);
        assert_eq!(&edge.t[..2], &[1.0, 1.0]);
    }

    #[test]
    fn box_mesh_indexes_layers() {
        let mesh = GridMesh::cuboid(Point::zero(3), Point::new3(2.0, 2.0, 2.0), 2, 2, 2, 0, 1);
        assert_eq!(mesh.local_vertices().len(), 27);
        let idx = mesh.local_index([1, 2, 1]).expect("stored");
        assert_eq!(mesh.local_vertices()[idx], Point::new3(1.0, 2.0, 1.0));
        assert_eq!(mesh.local_global_indices()[idx], mesh.global_index([1, 2, 1]));
    }
}
