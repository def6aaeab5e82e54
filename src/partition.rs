//! Margin-padded local boxes used to decide which agents a rank tracks locally.

use crate::comm::{CommExt, Communicator};
use crate::error::Result;
use crate::mesh::MeshPartition;
use angio_common::Point;

/// Axis-aligned box, inclusive on every side.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LocalBox {
    pub min: Point,
    pub max: Point,
}

impl LocalBox {
    pub fn contains(&self, point: &Point) -> bool {
        point.dim() == self.min.dim()
            && (0..point.dim())
                .all(|axis| point[axis] >= self.min[axis] && point[axis] <= self.max[axis])
    }
}

/// The local box of one rank: bounding box of its mesh vertices grown by `margin`.
///
/// The margin must be at least the largest radius any oracle or painter query
/// uses against this partition.
#[derive(Debug, Clone, PartialEq)]
pub struct SpatialPartition {
    margin: f64,
    local_box: Option<LocalBox>,
}

impl SpatialPartition {
    pub fn build(mesh: &dyn MeshPartition, margin: f64) -> Self {
        let local_box = bounding_box(mesh.local_vertices()).map(|(min, max)| {
            let mut lo = min;
            let mut hi = max;
            for axis in 0..min.dim() {
                lo = lo.with(axis, min[axis] - margin);
                hi = hi.with(axis, max[axis] + margin);
            }
            LocalBox { min: lo, max: hi }
        });
        SpatialPartition { margin, local_box }
    }

    pub fn margin(&self) -> f64 {
        self.margin
    }

    /// `None` when the rank holds no mesh vertices.
    pub fn local_box(&self) -> Option<&LocalBox> {
        self.local_box.as_ref()
    }

    /// True if `point` is inside the local box. A rank without vertices has no local points.
    pub fn contains(&self, point: &Point) -> bool {
        self.local_box.as_ref().is_some_and(|b| b.contains(point))
    }
}

fn bounding_box(points: &[Point]) -> Option<(Point, Point)> {
    let first = *points.first()?;
    Some(points.iter().skip(1).fold((first, first), |(mut lo, mut hi), p| {
        for axis in 0..p.dim() {
            lo = lo.with(axis, lo[axis].min(p[axis]));
            hi = hi.with(axis, hi[axis].max(p[axis]));
        }
        (lo, hi)
    }))
}

/// For each point, whether any rank contains it in its local mesh.
///
/// Collective: one all-gather of per-rank flags.
pub fn inside_global_mesh(
    comm: &dyn Communicator,
    mesh: &dyn MeshPartition,
    points: &[Point],
) -> Result<Vec<bool>> {
    let local: Vec<bool> = points.iter().map(|p| mesh.contains_local(p)).collect();
    let per_rank = comm.all_gather(&local)?;
    Ok((0..points.len())
        .map(|i| per_rank.iter().any(|flags| flags[i]))
        .collect())
}
