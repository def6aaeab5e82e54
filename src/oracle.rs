//! Proximity oracle: does a field cross a threshold within radius `r` of a point?
//!
//! Instead of scanning the mesh, the oracle walks the circle (2D) or sphere
//! (3D) of radius `r` around the point and evaluates the field on that
//! boundary only. Samples outside the local partition are skipped, so a
//! crossing only visible to another rank can be missed; keep the partition
//! margin above every radius used here.

use crate::error::{AngioError, Result};
use crate::field::Field;
use crate::mesh::MeshPartition;
use angio_common::Point;
use std::f64::consts::PI;

const MIN_STEPS: usize = 16;

/// Where on the circle sampling begins.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StartPoint {
    #[default]
    East,
    North,
    West,
    South,
}

impl StartPoint {
    fn angle(self) -> f64 {
        match self {
            StartPoint::East => 0.0,
            StartPoint::North => 0.5 * PI,
            StartPoint::West => PI,
            StartPoint::South => 1.5 * PI,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ProximityOracle {
    radius: f64,
    start: StartPoint,
    offsets: Vec<Point>,
}

impl ProximityOracle {
    /// Oracle of radius `radius`, sampling densely enough for the mesh spacing.
    pub fn new(mesh: &dyn MeshPartition, radius: f64, start: StartPoint) -> Result<Self> {
        if !radius.is_finite() || radius <= 0.0 {
            return Err(AngioError::Configuration(format!(
                "proximity radius must be positive, got {}",
                radius
            )));
        }
        let steps = MIN_STEPS.max((2.0 * PI * radius / mesh.min_spacing()).ceil() as usize);
        let offsets = match mesh.dim() {
            2 => circle_offsets(radius, steps, start.angle()),
            _ => sphere_offsets(radius, steps, start.angle()),
        };
        Ok(ProximityOracle { radius, start, offsets })
    }

    /// Oracle for the configured interaction radius, which has no default.
    pub fn from_interaction_radius(mesh: &dyn MeshPartition, d: Option<f64>) -> Result<Self> {
        let message = "no interaction radius configured and none supplied";
        let d = d.ok_or_else(|| AngioError::Configuration(message.to_string()))?;
        Self::new(mesh, d, StartPoint::default())
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn start(&self) -> StartPoint {
        self.start
    }

    /// Boundary samples around `point`, in visiting order.
    pub fn samples<'a>(&'a self, point: &'a Point) -> impl Iterator<Item = Point> + 'a {
        self.offsets.iter().map(move |offset| *point + *offset)
    }

    /// True as soon as one locally evaluable sample satisfies `compare(value, threshold)`.
    pub fn check<F, C>(&self, point: &Point, field: &F, threshold: f64, compare: C) -> bool
    where
        F: Field + ?Sized,
        C: Fn(f64, f64) -> bool,
    {
        self.samples(point)
            .filter_map(|sample| field.value_at(&sample))
            .any(|value| compare(value, threshold))
    }
}

fn circle_offsets(radius: f64, steps: usize, start: f64) -> Vec<Point> {
    (0..steps)
        .map(|k| {
            let angle = start + 2.0 * PI * k as f64 / steps as f64;
            Point::new2(radius * angle.cos(), radius * angle.sin())
        })
        .collect()
}

// Latitude rings from pole to pole; each ring gets a share of the equator's
// azimuth count proportional to its circumference.
fn sphere_offsets(radius: f64, steps: usize, start: f64) -> Vec<Point> {
    let rings = (steps / 2).max(2);
    let mut offsets = Vec::new();
    for ring in 0..=rings {
        let polar = PI * ring as f64 / rings as f64;
        let ring_radius = radius * polar.sin();
        let z = radius * polar.cos();
        let azimuths = ((steps as f64 * polar.sin()).round() as usize).max(1);
        for k in 0..azimuths {
            let angle = start + 2.0 * PI * k as f64 / azimuths as f64;
            offsets.push(Point::new3(ring_radius * angle.cos(), ring_radius * angle.sin(), z));
        }
    }
    offsets
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::GridFunction;
    use crate::mesh::GridMesh;
    use std::sync::Arc;

    fn square(rank: usize, size: usize) -> Arc<GridMesh> {
        let corner = Point::new2(100.0, 100.0);
        Arc::new(GridMesh::rectangle(Point::new2(0.0, 0.0), corner, 100, 100, rank, size))
    }

    #[test]
    fn circle_samples_lie_on_the_boundary() {
        let mesh = square(0, 1);
        let oracle = ProximityOracle::new(&*mesh, 5.0, StartPoint::West).unwrap();
        let centre = Point::new2(50.0, 50.0);
        let samples: Vec<Point> = oracle.samples(&centre).collect();
        assert_eq!(samples.len(), 32);
        assert!(samples.iter().all(|s| (s.distance(&centre) - 5.0).abs() < 1e-9));
        assert!(samples[0].distance(&Point::new2(45.0, 50.0)) < 1e-9);
    }

    #[test]
    fn coarse_meshes_still_get_minimum_sampling() {
        let mesh = GridMesh::rectangle(Point::new2(0.0, 0.0), Point::new2(10.0, 10.0), 2, 2, 0, 1);
        let oracle = ProximityOracle::new(&mesh, 1.0, StartPoint::East).unwrap();
        assert_eq!(oracle.samples(&Point::new2(5.0, 5.0)).count(), MIN_STEPS);
    }

    #[test]
    fn sphere_samples_cover_both_poles() {
        let corner = Point::new3(10.0, 10.0, 10.0);
        let mesh = GridMesh::cuboid(Point::zero(3), corner, 10, 10, 10, 0, 1);
        let oracle = ProximityOracle::new(&mesh, 2.0, StartPoint::North).unwrap();
        let centre = Point::new3(5.0, 5.0, 5.0);
        let samples: Vec<Point> = oracle.samples(&centre).collect();
        assert!(samples.iter().all(|s| (s.distance(&centre) - 2.0).abs() < 1e-9));
        assert!(samples.iter().any(|s| (s.z() - 7.0).abs() < 1e-9));
        assert!(samples.iter().any(|s| (s.z() - 3.0).abs() < 1e-9));
    }

    #[test]
    fn detects_crossing_within_radius() {
        let mesh = square(0, 1);
        let vessel =
            GridFunction::interpolate(Arc::clone(&mesh), |p| if p.x() < 20.0 { 1.0 } else { -1.0 });
        let oracle = ProximityOracle::new(&*mesh, 5.0, StartPoint::East).unwrap();
        assert!(oracle.check(&Point::new2(23.0, 50.0), &vessel, 0.5, |v, t| v > t));
        assert!(!oracle.check(&Point::new2(40.0, 50.0), &vessel, 0.5, |v, t| v > t));
    }

    #[test]
    fn samples_outside_the_partition_are_skipped() {
        // Rank 0 holds x in [0, 50]; the hit region is only visible to rank 1.
        let mesh = square(0, 2);
        let vessel =
            GridFunction::interpolate(Arc::clone(&mesh), |p| if p.x() > 52.0 { 1.0 } else { -1.0 });
        let oracle = ProximityOracle::new(&*mesh, 5.0, StartPoint::East).unwrap();
        assert!(!oracle.check(&Point::new2(49.0, 50.0), &vessel, 0.5, |v, t| v > t));
    }

    #[test]
    fn missing_interaction_radius_is_a_configuration_error() {
        let mesh = square(0, 1);
        let err = ProximityOracle::from_interaction_radius(&*mesh, None).unwrap_err();
        assert!(matches!(err, AngioError::Configuration(_)));
        assert!(ProximityOracle::from_interaction_radius(&*mesh, Some(3.0)).is_ok());
    }
}
