//! Point-like agents: source cells and tip cells.

use crate::error::{AngioError, Result};
use angio_common::{AgentRecord, Point};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

// Positions are quantized to this resolution when deriving identities.
const ID_RESOLUTION: f64 = 1e-6;

/// Identity of an agent, derived from its creation position and step.
///
/// Two agents created at the same place on the same step are the same agent
/// on every rank. The identity is fixed at construction, so a tip cell keeps
/// it while moving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AgentId {
    quantized: [i64; 3],
    creation_step: u64,
}

impl AgentId {
    pub fn new(position: &Point, creation_step: u64) -> Self {
        let mut quantized = [0i64; 3];
        for (q, c) in quantized.iter_mut().zip(position.coords()) {
            *q = (c / ID_RESOLUTION).round() as i64;
        }
        AgentId { quantized, creation_step }
    }

    // FNV-1a over the identity fields; stable across runs and platforms.
    fn digest(&self) -> u64 {
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        let words =
            self.quantized.iter().map(|&q| q as u64).chain(std::iter::once(self.creation_step));
        for word in words {
            for byte in word.to_le_bytes() {
                hash ^= u64::from(byte);
                hash = hash.wrapping_mul(0x0100_0000_01b3);
            }
        }
        hash
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.digest())
    }
}

/// Common behaviour of every agent kind stored in an `AgentRegistry`.
pub trait Agent: Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned + Send + Sync {
    /// Prefix of checkpoint keys for this kind.
    const KIND: &'static str;

    fn id(&self) -> AgentId;
    fn position(&self) -> &Point;
    fn creation_step(&self) -> u64;

    fn to_record(&self) -> AgentRecord;
    fn from_record(record: &AgentRecord) -> Result<Self>;
}

/// Agents whose position may change after creation.
pub trait MobileAgent: Agent {
    fn move_to(&mut self, position: Point);
}

fn record_point(coords: &[f64]) -> Result<Point> {
    Point::from_slice(coords).ok_or_else(|| {
        AngioError::Configuration(format!(
            "checkpoint position must have 2 or 3 coordinates, found {}",
            coords.len()
        ))
    })
}

/// A cell of the non-vascular tissue expressing angiogenic factor. Never moves.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceCell {
    id: AgentId,
    position: Point,
    creation_step: u64,
}

impl SourceCell {
    pub fn new(position: Point, creation_step: u64) -> Self {
        SourceCell { id: AgentId::new(&position, creation_step), position, creation_step }
    }
}

impl Agent for SourceCell {
    const KIND: &'static str = "sc";

    fn id(&self) -> AgentId {
        self.id
    }

    fn position(&self) -> &Point {
        &self.position
    }

    fn creation_step(&self) -> u64 {
        self.creation_step
    }

    fn to_record(&self) -> AgentRecord {
        AgentRecord {
            position: self.position.coords().to_vec(),
            radius: None,
            creation_step: self.creation_step,
            origin: None,
        }
    }

    fn from_record(record: &AgentRecord) -> Result<Self> {
        Ok(SourceCell::new(record_point(&record.position)?, record.creation_step))
    }
}

/// A tip cell: a disk (sphere in 3D) of fixed radius leading a sprouting vessel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TipCell {
    id: AgentId,
    origin: Point,
    position: Point,
    radius: f64,
    creation_step: u64,
}

impl TipCell {
    pub fn new(position: Point, radius: f64, creation_step: u64) -> Self {
        TipCell {
            id: AgentId::new(&position, creation_step),
            origin: position,
            position,
            radius,
            creation_step,
        }
    }

    /// Position at creation.
    pub fn origin(&self) -> &Point {
        &self.origin
    }

    pub fn radius(&self) -> f64 {
        self.radius
    }

    pub fn distance(&self, point: &Point) -> f64 {
        self.position.distance(point)
    }

    pub fn is_point_inside(&self, point: &Point) -> bool {
        self.distance(point) <= self.radius
    }
}

impl Agent for TipCell {
    const KIND: &'static str = "tc";

    fn id(&self) -> AgentId {
        self.id
    }

    fn position(&self) -> &Point {
        &self.position
    }

    fn creation_step(&self) -> u64 {
        self.creation_step
    }

    fn to_record(&self) -> AgentRecord {
        AgentRecord {
            position: self.position.coords().to_vec(),
            radius: Some(self.radius),
            creation_step: self.creation_step,
            origin: (self.origin != self.position).then(|| self.origin.coords().to_vec()),
        }
    }

    fn from_record(record: &AgentRecord) -> Result<Self> {
        let radius = record.radius.ok_or_else(|| {
            AngioError::Configuration("tip cell checkpoint entry without radius".to_string())
        })?;
        let origin = match &record.origin {
            Some(coords) => record_point(coords)?,
            None => record_point(&record.position)?,
        };
        let mut cell = TipCell::new(origin, radius, record.creation_step);
        cell.move_to(record_point(&record.position)?);
        Ok(cell)
    }
}

impl MobileAgent for TipCell {
    fn move_to(&mut self, position: Point) {
        self.position = position;
    }
}
