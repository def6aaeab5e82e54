//! Replicated agent arena with a per-rank local view.
//!
//! Every rank holds the same ordered `global` map. Mutations go through
//! collectives so the map stays identical everywhere; `local` is the subset
//! of ids whose position falls in this rank's [`SpatialPartition`].

use crate::agent::{Agent, AgentId, MobileAgent};
use crate::comm::{CommExt, Communicator, ROOT};
use crate::error::{AngioError, Result};
use crate::partition::SpatialPartition;
use angio_common::Point;
use indexmap::{IndexMap, IndexSet};
use log::debug;

#[derive(Debug, Clone)]
pub struct AgentRegistry<A: Agent> {
    global: IndexMap<AgentId, A>,
    local: IndexSet<AgentId>,
    partition: SpatialPartition,
}

impl<A: Agent> AgentRegistry<A> {
    pub fn new(partition: SpatialPartition) -> Self {
        AgentRegistry { global: IndexMap::new(), local: IndexSet::new(), partition }
    }

    /// Registry seeded from a point list that is identical on every rank.
    ///
    /// Points are ordered by ascending distance from the origin (stable for
    /// ties) before `make` turns them into agents. A point that yields an id
    /// already seeded is dropped, so duplicates keep only their first copy.
    pub fn from_points<F>(partition: SpatialPartition, points: &[Point], make: F) -> Result<Self>
    where
        F: Fn(Point) -> A,
    {
        let mut sorted = points.to_vec();
        sorted.sort_by(|a, b| a.norm_squared().total_cmp(&b.norm_squared()));

        let mut registry = Self::new(partition);
        let mut duplicates = 0usize;
        for point in sorted {
            let agent = make(point);
            if registry.contains(&agent.id()) {
                duplicates += 1;
                continue;
            }
            registry.commit(agent)?;
        }
        if duplicates > 0 {
            debug!("dropped {} duplicate seed points", duplicates);
        }
        Ok(registry)
    }

    pub fn partition(&self) -> &SpatialPartition {
        &self.partition
    }

    pub fn is_local(&self, point: &Point) -> bool {
        self.partition.contains(point)
    }

    pub fn len(&self) -> usize {
        self.global.len()
    }

    pub fn is_empty(&self) -> bool {
        self.global.is_empty()
    }

    pub fn contains(&self, id: &AgentId) -> bool {
        self.global.contains_key(id)
    }

    pub fn get(&self, id: &AgentId) -> Option<&A> {
        self.global.get(id)
    }

    /// Every agent, in registry order.
    pub fn agents(&self) -> impl Iterator<Item = &A> + '_ {
        self.global.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = &AgentId> + '_ {
        self.global.keys()
    }

    pub fn local_ids(&self) -> &IndexSet<AgentId> {
        &self.local
    }

    /// Agents tracked by this rank, in local order.
    pub fn local_agents(&self) -> impl Iterator<Item = &A> + '_ {
        self.local.iter().filter_map(|id| self.global.get(id))
    }

    fn commit(&mut self, agent: A) -> Result<()> {
        let id = agent.id();
        if self.global.contains_key(&id) {
            return Err(AngioError::Consistency(format!("agent {} is already registered", id)));
        }
        if self.partition.contains(agent.position()) {
            self.local.insert(id);
        }
        self.global.insert(id, agent);
        Ok(())
    }

    /// Adds `agent` on every rank.
    ///
    /// Collective. With several ranks the proposals are compared on the root
    /// first; if any rank proposes a different agent, every rank returns
    /// [`AngioError::Consistency`] and nothing is added.
    pub fn add(&mut self, comm: &dyn Communicator, agent: A) -> Result<()> {
        if comm.size() > 1 {
            let verdict = comm.gather(&agent, ROOT)?.map(|proposals| {
                proposals
                    .iter()
                    .enumerate()
                    .find(|(_, proposal)| *proposal != &proposals[0])
                    .map(|(rank, proposal)| {
                        format!(
                            "rank {} proposed {:?} while rank {} proposed {:?}",
                            rank, proposal, ROOT, proposals[0]
                        )
                    })
            });
            if let Some(message) = comm.broadcast(verdict, ROOT)? {
                log::error!("p{}: refusing agent add: {}", comm.rank(), message);
                return Err(AngioError::Consistency(message));
            }
        }
        self.commit(agent)
    }

    /// Removes one agent. A missing id means the ranks have diverged.
    pub fn remove(&mut self, id: &AgentId) -> Result<A> {
        let agent = self
            .global
            .shift_remove(id)
            .ok_or_else(|| AngioError::Consistency(format!("agent {} is not registered", id)))?;
        self.local.shift_remove(id);
        Ok(agent)
    }

    /// Removes the union of every rank's `candidates`.
    ///
    /// Collective. Candidates are merged on the root in rank order, keeping the
    /// first occurrence of each id, and the merged list is applied on every
    /// rank. Returns the removed agents in that order.
    pub fn remove_many(
        &mut self,
        comm: &dyn Communicator,
        candidates: &[AgentId],
    ) -> Result<Vec<A>> {
        let merged = comm.gather(&candidates.to_vec(), ROOT)?.map(|per_rank| {
            let unique: IndexSet<AgentId> = per_rank.into_iter().flatten().collect();
            unique.into_iter().collect::<Vec<_>>()
        });
        let removal: Vec<AgentId> = comm.broadcast(merged, ROOT)?;
        if !removal.is_empty() {
            log::debug!("p{}: removing {} agents of kind {}", comm.rank(), removal.len(), A::KIND);
        }
        removal.iter().map(|id| self.remove(id)).collect()
    }

    /// Recomputes the local set from scratch, in registry order.
    pub fn refresh_local(&mut self) {
        let partition = &self.partition;
        self.local = self
            .global
            .iter()
            .filter(|(_, agent)| partition.contains(agent.position()))
            .map(|(id, _)| *id)
            .collect();
    }
}

impl<A: MobileAgent> AgentRegistry<A> {
    /// Moves an agent and updates its local membership.
    ///
    /// Every rank must apply the same moves to keep `global` identical.
    pub fn move_agent(&mut self, id: &AgentId, position: Point) -> Result<()> {
        let agent = self
            .global
            .get_mut(id)
            .ok_or_else(|| {
                AngioError::Consistency(format!("cannot move unregistered agent {}", id))
            })?;
        agent.move_to(position);
        if self.partition.contains(&position) {
            self.local.insert(*id);
        } else {
            self.local.shift_remove(id);
        }
        Ok(())
    }
}
