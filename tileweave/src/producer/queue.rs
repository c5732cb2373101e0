//! Per-producer job bookkeeping.
//!
//! A producer moves every tile it works on through three disjoint phases:
//!
//! ```text
//! enqueue ──► ToFetch ──► AwaitingResponse ──► AwaitingProcessing ──► complete
//!               │               │                     │
//!               └───────────────┴─────── remove ──────┘   (failure, discard)
//! ```
//!
//! The producer's aggregate [`ProducerState`] is derived purely from whether
//! any phase holds work.

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::hash::Hash;

// =============================================================================
// Producer State
// =============================================================================

/// Aggregate state of a producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ProducerState {
    /// Constructed, not yet evaluated.
    #[default]
    Initialized,
    /// At least one tile is in one of the phases.
    Working,
    /// Every phase is empty.
    Finished,
}

impl ProducerState {
    pub fn as_str(self) -> &'static str {
        match self {
            ProducerState::Initialized => "initialized",
            ProducerState::Working => "working",
            ProducerState::Finished => "finished",
        }
    }
}

impl fmt::Display for ProducerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Phase a queued job is in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobPhase {
    ToFetch,
    AwaitingResponse,
    AwaitingProcessing,
}

// =============================================================================
// Job Queue
// =============================================================================

/// Three-phase job queue for one producer.
///
/// A job is in at most one phase at a time; every move replaces its phase
/// in a single `&mut self` call.
#[derive(Debug)]
pub struct ProducerJobQueue<T> {
    to_fetch: VecDeque<T>,
    awaiting_response: HashSet<T>,
    awaiting_processing: HashSet<T>,
    phases: HashMap<T, JobPhase>,
    state: ProducerState,
}

impl<T> ProducerJobQueue<T>
where
    T: Clone + Eq + Hash,
{
    pub fn new() -> Self {
        Self {
            to_fetch: VecDeque::new(),
            awaiting_response: HashSet::new(),
            awaiting_processing: HashSet::new(),
            phases: HashMap::new(),
            state: ProducerState::Initialized,
        }
    }

    /// Appends `job` to the fetch queue. Returns `false` if it is already in
    /// any phase.
    pub fn enqueue(&mut self, job: T) -> bool {
        if self.phases.contains_key(&job) {
            return false;
        }
        self.phases.insert(job.clone(), JobPhase::ToFetch);
        self.to_fetch.push_back(job);
        true
    }

    /// Moves the oldest queued job to `AwaitingResponse` and returns it.
    pub fn begin_next_fetch(&mut self) -> Option<T> {
        let job = self.to_fetch.pop_front()?;
        self.phases.insert(job.clone(), JobPhase::AwaitingResponse);
        self.awaiting_response.insert(job.clone());
        Some(job)
    }

    /// Moves `job` from `AwaitingResponse` to `AwaitingProcessing`.
    pub fn response_received(&mut self, job: &T) -> bool {
        if !self.awaiting_response.remove(job) {
            return false;
        }
        self.phases.insert(job.clone(), JobPhase::AwaitingProcessing);
        self.awaiting_processing.insert(job.clone());
        true
    }

    /// Drops `job` once processing finished.
    pub fn complete(&mut self, job: &T) -> bool {
        if !self.awaiting_processing.remove(job) {
            return false;
        }
        self.phases.remove(job);
        true
    }

    /// Drops `job` from whatever phase it is in.
    pub fn remove(&mut self, job: &T) -> Option<JobPhase> {
        let phase = self.phases.remove(job)?;
        match phase {
            JobPhase::ToFetch => self.to_fetch.retain(|queued| queued != job),
            JobPhase::AwaitingResponse => {
                self.awaiting_response.remove(job);
            }
            JobPhase::AwaitingProcessing => {
                self.awaiting_processing.remove(job);
            }
        }
        Some(phase)
    }

    pub fn phase_of(&self, job: &T) -> Option<JobPhase> {
        self.phases.get(job).copied()
    }

    pub fn to_fetch_len(&self) -> usize {
        self.to_fetch.len()
    }

    pub fn awaiting_response_len(&self) -> usize {
        self.awaiting_response.len()
    }

    pub fn awaiting_processing_len(&self) -> usize {
        self.awaiting_processing.len()
    }

    /// Jobs past the fetch queue.
    pub fn in_flight(&self) -> usize {
        self.awaiting_response.len() + self.awaiting_processing.len()
    }

    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.to_fetch.is_empty()
            && self.awaiting_response.is_empty()
            && self.awaiting_processing.is_empty()
    }

    pub fn state(&self) -> ProducerState {
        self.state
    }

    /// Re-derives the aggregate state from occupancy.
    ///
    /// Returns the new state on a transition, `None` when unchanged.
    pub fn update_state(&mut self) -> Option<ProducerState> {
        let target = if self.is_empty() {
            ProducerState::Finished
        } else {
            ProducerState::Working
        };
        if target == self.state {
            return None;
        }
        self.state = target;
        Some(target)
    }
}

impl<T> Default for ProducerJobQueue<T>
where
    T: Clone + Eq + Hash,
{
    fn default() -> Self {
        Self::new()
    }
}
