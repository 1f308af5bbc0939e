pub mod config;
mod frontier;

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use self::config::RoutingConfig;
use self::frontier::Frontier;
use crate::error::RoutingError;
use crate::future::progress::Progress;
use crate::future::Completion;
use crate::key::Key;
use crate::node::node_data::NodeData;

/// What a peer answered to a probe.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProbeResult {
    /// `true` if the peer is itself what the lookup searches for.
    pub is_direct_hit: bool,
    /// Peers the probed peer knows that are close to the target.
    pub closer_peers: Vec<NodeData>,
}

/// Sends probes on behalf of a lookup.
///
/// Every returned cell must eventually complete or fail; enforcing a timeout is up to the
/// implementation. Probes should use TCP if `force_tcp` is set.
pub trait Prober: Send + Sync + 'static {
    fn probe(&self, dest: &NodeData, target: &Key, force_tcp: bool) -> Completion<ProbeResult>;
}

/// The state of a lookup. Every state except `Searching` is terminal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RoutingState {
    Searching,
    /// Enough direct hits or successful probes.
    Converged,
    /// Probes stopped bringing closer peers, or no peer is left to probe.
    Exhausted,
    /// Too many probes failed.
    Aborted,
}

impl RoutingState {
    pub fn is_terminal(self) -> bool {
        self != RoutingState::Searching
    }
}

/// Counters of a lookup.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoutingStats {
    pub successes: usize,
    pub failures: usize,
    pub no_new_info: usize,
    pub direct_hits: usize,
}

/// A snapshot of a lookup.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoutingResult {
    /// Every known peer that did not fail, closest first.
    pub frontier: Vec<NodeData>,
    /// The peers that answered as direct hits, in the order they answered.
    pub direct_hits: Vec<NodeData>,
    pub state: RoutingState,
    pub stats: RoutingStats,
}

impl RoutingResult {
    /// Returns why the lookup failed, if it did.
    pub fn error(&self) -> Option<RoutingError> {
        match self.state {
            RoutingState::Aborted => Some(RoutingError::TooManyFailures),
            _ => None,
        }
    }
}

/// Where a lookup reports to.
enum Sink {
    Single(Completion<RoutingResult>),
    Stream(Option<Progress<RoutingResult>>),
}

impl Sink {
    fn deliver(&mut self, result: RoutingResult) {
        if let Sink::Stream(link) = self {
            if let Some(current) = link.take() {
                *link = current.deliver_next(result, false);
            }
        }
    }

    fn finish(&mut self, result: RoutingResult) {
        match self {
            Sink::Single(completion) => {
                completion.complete(result);
            },
            Sink::Stream(link) => {
                if let Some(current) = link.take() {
                    current.deliver_next(result, true);
                }
            },
        }
    }

    fn fail(&mut self, reason: String) {
        match self {
            Sink::Single(completion) => {
                completion.fail(reason);
            },
            Sink::Stream(link) => {
                if let Some(current) = link.take() {
                    current.fail(reason);
                }
            },
        }
    }
}

struct Lookup {
    frontier: Frontier,
    stats: RoutingStats,
    direct_hits: Vec<NodeData>,
    in_flight: HashMap<Key, Completion<ProbeResult>>,
    // probes that finished but are not yet recorded, and whether a thread is recording them
    finished: VecDeque<(NodeData, Completion<ProbeResult>)>,
    is_draining: bool,
    state: RoutingState,
}

impl Lookup {
    fn snapshot(&self, state: RoutingState) -> RoutingResult {
        RoutingResult {
            frontier: self.frontier.peers(),
            direct_hits: self.direct_hits.clone(),
            state,
            stats: self.stats,
        }
    }
}

struct RoutingProcess<P> {
    target: Key,
    config: RoutingConfig,
    max_no_new_info: usize,
    prober: Arc<P>,
    lookup: Mutex<Lookup>,
    sink: Mutex<Sink>,
}

/// Starts an iterative lookup of `target` from `seeds` and returns a cell that completes with the
/// final frontier once a stop condition of `config` fires.
///
/// The cell fails only if there is no seed peer to start from. A lookup that aborts because of
/// too many failures still completes the cell, with `RoutingState::Aborted`.
pub fn start_routing<P: Prober>(
    target: Key,
    seeds: Vec<NodeData>,
    minimum_results: usize,
    config: RoutingConfig,
    prober: Arc<P>,
) -> Completion<RoutingResult> {
    let ret = Completion::new();
    RoutingProcess::start(
        target,
        seeds,
        minimum_results,
        config,
        prober,
        Sink::Single(ret.clone()),
    );
    ret
}

/// Like `start_routing`, but streams a `RoutingState::Searching` snapshot whenever a probe brings
/// a peer closer than any seen before. The final snapshot is delivered as the last link.
pub fn start_routing_progress<P: Prober>(
    target: Key,
    seeds: Vec<NodeData>,
    minimum_results: usize,
    config: RoutingConfig,
    prober: Arc<P>,
) -> Progress<RoutingResult> {
    let ret = Progress::new();
    RoutingProcess::start(
        target,
        seeds,
        minimum_results,
        config,
        prober,
        Sink::Stream(Some(ret.clone())),
    );
    ret
}

impl<P: Prober> RoutingProcess<P> {
    fn start(
        target: Key,
        seeds: Vec<NodeData>,
        minimum_results: usize,
        config: RoutingConfig,
        prober: Arc<P>,
        mut sink: Sink,
    ) {
        if seeds.is_empty() {
            warn!("Routing towards {:?} has no seed peers", target);
            sink.fail(RoutingError::NoSeedPeers.to_string());
            return;
        }
        debug!(
            "Routing towards {:?} from {} seed peers with {:?}",
            target,
            seeds.len(),
            config,
        );

        let process = Arc::new(RoutingProcess {
            target,
            config,
            max_no_new_info: config.max_no_new_info(minimum_results),
            prober,
            lookup: Mutex::new(Lookup {
                frontier: Frontier::new(target, seeds),
                stats: RoutingStats::default(),
                direct_hits: Vec::new(),
                in_flight: HashMap::new(),
                finished: VecDeque::new(),
                is_draining: false,
                state: RoutingState::Searching,
            }),
            sink: Mutex::new(sink),
        });
        let lookup = process.lock_lookup();
        for dest in process.step(lookup, false) {
            process.dispatch(dest);
        }
    }

    fn lock_lookup(&self) -> MutexGuard<Lookup> {
        match self.lookup.lock() {
            Ok(lookup) => lookup,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn lock_sink(&self) -> MutexGuard<Sink> {
        match self.sink.lock() {
            Ok(sink) => sink,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    /// Returns the first stop condition that fires, in order of precedence.
    fn check_stop(&self, stats: &RoutingStats) -> Option<RoutingState> {
        if stats.direct_hits >= self.config.direct_hits() {
            Some(RoutingState::Converged)
        } else if stats.failures > self.config.max_failures() {
            Some(RoutingState::Aborted)
        } else if stats.successes >= self.config.max_success() {
            Some(RoutingState::Converged)
        } else if stats.no_new_info >= self.max_no_new_info {
            Some(RoutingState::Exhausted)
        } else {
            None
        }
    }

    /// Decides whether the lookup ends, then either finishes it or returns the peers to probe next.
    /// Holds `lookup` for the whole decision and hands over to the sink lock before reporting so
    /// that reports keep the order of the decisions.
    fn step(&self, mut lookup: MutexGuard<Lookup>, progressed: bool) -> Vec<NodeData> {
        let mut state = self.check_stop(&lookup.stats);
        let mut dispatch = Vec::new();
        if state.is_none() {
            while lookup.frontier.in_flight() < self.config.parallelism() {
                match lookup.frontier.next_untried() {
                    Some(node_data) => dispatch.push(node_data),
                    None => break,
                }
            }
            if lookup.frontier.in_flight() == 0 {
                state = Some(RoutingState::Exhausted);
            }
        }

        match state {
            Some(state) => {
                lookup.state = state;
                let result = lookup.snapshot(state);
                let pending: Vec<Completion<ProbeResult>> =
                    lookup.in_flight.drain().map(|(_, probe)| probe).collect();
                let mut sink = self.lock_sink();
                drop(lookup);

                info!(
                    "Routing towards {:?} ended {:?} with {} peers {:?}",
                    self.target,
                    state,
                    result.frontier.len(),
                    result.stats,
                );
                sink.finish(result);
                drop(sink);

                for probe in pending {
                    probe.cancel();
                }
                Vec::new()
            },
            None => {
                if progressed {
                    let result = lookup.snapshot(RoutingState::Searching);
                    let mut sink = self.lock_sink();
                    drop(lookup);
                    sink.deliver(result);
                } else {
                    drop(lookup);
                }
                dispatch
            },
        }
    }

    fn dispatch(self: &Arc<Self>, dest: NodeData) {
        debug!("Probing {:?} for {:?}", dest, self.target);
        let probe = self
            .prober
            .probe(&dest, &self.target, self.config.force_tcp());
        {
            let mut lookup = self.lock_lookup();
            if lookup.state.is_terminal() {
                drop(lookup);
                probe.cancel();
                return;
            }
            lookup.in_flight.insert(dest.id, probe.clone());
        }

        let process = Arc::clone(self);
        probe.add_listener(move |probe| process.handle_probe(dest, probe.clone()));
    }

    /// Queues a finished probe. The first thread to queue one records every queued probe and
    /// dispatches the follow-up probes in a loop; probes that finish while it does so, including
    /// ones a prober answers synchronously, are left to that loop.
    fn handle_probe(self: &Arc<Self>, dest: NodeData, probe: Completion<ProbeResult>) {
        let mut lookup = self.lock_lookup();
        lookup.finished.push_back((dest, probe));
        if lookup.is_draining {
            return;
        }
        lookup.is_draining = true;

        loop {
            let (dest, probe) = match lookup.finished.pop_front() {
                Some(finished) => finished,
                None => {
                    lookup.is_draining = false;
                    return;
                },
            };
            for dest in self.record(lookup, dest, &probe) {
                self.dispatch(dest);
            }
            lookup = self.lock_lookup();
        }
    }

    /// Folds the outcome of one probe into the lookup and steps it.
    fn record(
        &self,
        mut lookup: MutexGuard<Lookup>,
        dest: NodeData,
        probe: &Completion<ProbeResult>,
    ) -> Vec<NodeData> {
        lookup.in_flight.remove(&dest.id);
        if lookup.state.is_terminal() {
            return Vec::new();
        }

        let mut progressed = false;
        match probe.result() {
            Some(result) => {
                lookup.frontier.finish(&dest, true);
                lookup.stats.successes += 1;
                if lookup.frontier.merge(result.closer_peers) {
                    lookup.stats.no_new_info = 0;
                    progressed = true;
                } else {
                    lookup.stats.no_new_info += 1;
                }
                if result.is_direct_hit {
                    lookup.stats.direct_hits += 1;
                    lookup.direct_hits.push(dest.clone());
                }
                debug!(
                    "Probe to {:?} succeeded, {} peers known, closest distance is {:?}",
                    dest,
                    lookup.frontier.len(),
                    lookup.frontier.best_distance(),
                );
            },
            None => {
                lookup.frontier.finish(&dest, false);
                lookup.stats.failures += 1;
                debug!(
                    "Probe to {:?} ended {:?}: {}",
                    dest,
                    probe.state(),
                    probe.failure_reason().unwrap_or_default(),
                );
            },
        }
        self.step(lookup, progressed)
    }
}
