use std::collections::{BTreeMap, BTreeSet};

use crate::key::Key;
use crate::node::node_data::NodeData;

/// Where a known peer is in its single probe.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PeerStatus {
    Untried,
    InFlight,
    Succeeded,
    Failed,
}

#[derive(Clone, Debug)]
struct Candidate {
    node_data: NodeData,
    status: PeerStatus,
}

/// The peers a lookup knows about, ordered by ascending distance to the target.
///
/// Peers are keyed by their distance, which is unique per id for a fixed target, so a peer is
/// known at most once. Peers are never removed; their status only moves forward.
#[derive(Clone, Debug)]
pub struct Frontier {
    target: Key,
    candidates: BTreeMap<Key, Candidate>,
    untried: BTreeSet<Key>,
    in_flight: usize,
}

impl Frontier {
    pub fn new<I: IntoIterator<Item = NodeData>>(target: Key, seeds: I) -> Self {
        let mut ret = Frontier {
            target,
            candidates: BTreeMap::new(),
            untried: BTreeSet::new(),
            in_flight: 0,
        };
        ret.merge(seeds);
        ret
    }

    /// Returns the distance of the closest known peer.
    pub fn best_distance(&self) -> Option<Key> {
        self.candidates.keys().next().cloned()
    }

    /// Adds the peers not yet known as untried. Returns `true` if any of them is closer than the
    /// closest peer known before the merge.
    pub fn merge<I: IntoIterator<Item = NodeData>>(&mut self, peers: I) -> bool {
        let best = self.best_distance();
        let mut is_closer = false;
        for node_data in peers {
            let distance = node_data.distance(&self.target);
            if self.candidates.contains_key(&distance) {
                continue;
            }
            if best.map_or(true, |best| distance < best) {
                is_closer = true;
            }
            self.untried.insert(distance);
            self.candidates.insert(
                distance,
                Candidate {
                    node_data,
                    status: PeerStatus::Untried,
                },
            );
        }
        is_closer
    }

    /// Marks the closest untried peer as in flight and returns it.
    pub fn next_untried(&mut self) -> Option<NodeData> {
        let distance = *self.untried.iter().next()?;
        self.untried.remove(&distance);
        let candidate = self.candidates.get_mut(&distance)?;
        candidate.status = PeerStatus::InFlight;
        self.in_flight += 1;
        Some(candidate.node_data.clone())
    }

    /// Records the outcome of the probe to `node_data`. Returns `false` if that peer was not in
    /// flight.
    pub fn finish(&mut self, node_data: &NodeData, success: bool) -> bool {
        let distance = node_data.distance(&self.target);
        match self.candidates.get_mut(&distance) {
            Some(candidate) if candidate.status == PeerStatus::InFlight => {
                candidate.status = if success {
                    PeerStatus::Succeeded
                } else {
                    PeerStatus::Failed
                };
                self.in_flight -= 1;
                true
            },
            _ => false,
        }
    }

    /// Returns the number of peers currently in flight.
    pub fn in_flight(&self) -> usize {
        self.in_flight
    }

    /// Returns every known peer that has not failed, closest first.
    pub fn peers(&self) -> Vec<NodeData> {
        self.candidates
            .values()
            .filter(|candidate| candidate.status != PeerStatus::Failed)
            .map(|candidate| candidate.node_data.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }
}
