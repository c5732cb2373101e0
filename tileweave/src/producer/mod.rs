//! Producers: long-lived workers that load one channel for many tiles.
//!
//! Each producer tracks its own backlog in a [`ProducerJobQueue`] and derives
//! an aggregate [`ProducerState`] from it. The [`ProducerWorker`] actor runs
//! that queue against a fetch backend, a decoder and a render sink, driving
//! the tile protocol (`register` → `set_*_data` → `unregister`) for every
//! job.

mod queue;
mod worker;

pub use queue::{JobPhase, ProducerJobQueue, ProducerState};
pub use worker::{
    ProducerHandle, ProducerStatus, ProducerWorker, WorkerConfig, DEFAULT_MAX_IN_FLIGHT,
    DEFAULT_TICK_INTERVAL,
};
