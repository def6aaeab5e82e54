use serde::{Deserialize, Serialize};
use std::ops::{Add, Index, Mul, Sub};

/// A point (or vector) in 2D or 3D space.
///
/// Storage is always three coordinates; `dim` tells how many of them are
/// meaningful. Unused coordinates are kept at zero so that derived equality
/// and serialization stay exact.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    coords: [f64; 3],
    dim: u8,
}

impl Point {
    /// Creates a 2D point.
    pub fn new2(x: f64, y: f64) -> Self {
        Point { coords: [x, y, 0.0], dim: 2 }
    }

    /// Creates a 3D point.
    pub fn new3(x: f64, y: f64, z: f64) -> Self {
        Point { coords: [x, y, z], dim: 3 }
    }

    /// Creates the origin of a `dim`-dimensional space.
    pub fn zero(dim: usize) -> Self {
        debug_assert!(dim == 2 || dim == 3, "only 2D and 3D points are supported");
        Point { coords: [0.0; 3], dim: dim as u8 }
    }

    /// Builds a point from a coordinate slice of length 2 or 3.
    pub fn from_slice(coords: &[f64]) -> Option<Self> {
        match *coords {
            [x, y] => Some(Point::new2(x, y)),
            [x, y, z] => Some(Point::new3(x, y, z)),
            _ => None,
        }
    }

    /// Number of meaningful coordinates (2 or 3).
    #[inline(always)]
    pub fn dim(&self) -> usize {
        self.dim as usize
    }

    /// The meaningful coordinates as a slice.
    #[inline(always)]
    pub fn coords(&self) -> &[f64] {
        &self.coords[..self.dim as usize]
    }

    #[inline(always)]
    pub fn x(&self) -> f64 {
        self.coords[0]
    }

    #[inline(always)]
    pub fn y(&self) -> f64 {
        self.coords[1]
    }

    #[inline(always)]
    pub fn z(&self) -> f64 {
        self.coords[2]
    }

    /// Returns a copy with coordinate `axis` replaced.
    pub fn with(mut self, axis: usize, value: f64) -> Self {
        self.coords[axis] = value;
        self
    }

    #[inline(always)]
    pub fn dot(&self, other: &Point) -> f64 {
        self.coords
            .iter()
            .zip(other.coords.iter())
            .map(|(a, b)| a * b)
            .sum()
    }

    #[inline(always)]
    pub fn norm_squared(&self) -> f64 {
        self.dot(self)
    }

    /// Euclidean length of the vector.
    #[inline(always)]
    pub fn norm(&self) -> f64 {
        self.norm_squared().sqrt()
    }

    #[inline(always)]
    pub fn distance_squared(&self, other: &Point) -> f64 {
        (*self - *other).norm_squared()
    }

    /// Euclidean distance to another point.
    #[inline(always)]
    pub fn distance(&self, other: &Point) -> f64 {
        self.distance_squared(other).sqrt()
    }

    /// Scales every coordinate by `scalar`.
    #[inline(always)]
    pub fn scale(&self, scalar: f64) -> Self {
        let mut out = *self;
        out.coords.iter_mut().for_each(|c| *c *= scalar);
        out
    }
}

impl Index<usize> for Point {
    type Output = f64;
    fn index(&self, axis: usize) -> &f64 {
        &self.coords()[axis]
    }
}

impl Add for Point {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        debug_assert_eq!(self.dim, other.dim);
        let mut out = self;
        for (c, o) in out.coords.iter_mut().zip(other.coords.iter()) {
            *c += o;
        }
        out
    }
}

impl Sub for Point {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        debug_assert_eq!(self.dim, other.dim);
        let mut out = self;
        for (c, o) in out.coords.iter_mut().zip(other.coords.iter()) {
            *c -= o;
        }
        out
    }
}

impl Mul<f64> for Point {
    type Output = Self;
    fn mul(self, scalar: f64) -> Self {
        self.scale(scalar)
    }
}
