//! Dynamic parallel event-stream dispatcher.
//!
//! Routes per-path events across a fixed fleet of worker streams. Each
//! stream multiplexes many paths, preserves per-path ordering, and accounts
//! pending memory per area, emitting pause/resume feedback to producers.

use std::hash::Hash;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod hasher;
pub mod parallel;
pub mod stream;

pub use hasher::{MixPathHasher, PathHasher};
pub use parallel::ParallelDynamicStream;
pub use stream::DynamicStream;

/// Outcome of handling one event.
pub enum Handle<T> {
    /// Event consumed.
    Done,
    /// Not ready: requeue the event at the front and park the path until a
    /// wake names it.
    Await(T),
    /// Refused: the stream drops the event through `on_drop`.
    Reject(T),
}

/// Capability set a stream needs from its embedder.
///
/// `handle` for a given path is never invoked concurrently, even though the
/// stream runs a pool of workers.
pub trait EventHandler: Send + Sync + 'static {
    type Area: Clone + Eq + Hash + Send + Sync + 'static;
    type Path: Clone + Eq + Hash + Send + Sync + 'static;
    type Event: Send + 'static;
    type Dest: Send + 'static;

    /// Path identity of an event.
    fn path(&self, event: &Self::Event) -> Self::Path;

    /// Memory-accounting scope of a path.
    fn area(&self, path: &Self::Path) -> Self::Area;

    /// Bytes this event occupies while pending.
    fn event_size(&self, event: &Self::Event) -> usize;

    fn handle(&self, event: Self::Event, dest: &mut Self::Dest) -> Handle<Self::Event>;

    /// Called for every event shed or drained without handling.
    fn on_drop(&self, event: Self::Event) {
        let _ = event;
    }

    /// Called exactly once after a removed path has drained.
    fn on_path_removed(&self, dest: Self::Dest) {
        let _ = dest;
    }
}

/// Memory limits of one area.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AreaSettings {
    /// Soft threshold: crossing it pauses producers via feedback.
    pub memory_quota: usize,
    /// Hard ceiling: an enqueue that would exceed it is shed instead.
    pub max_pending_size: usize,
}

impl Default for AreaSettings {
    fn default() -> Self {
        Self {
            memory_quota: 64 << 20,
            max_pending_size: 256 << 20,
        }
    }
}

/// Back-pressure state change for one (area, path) pair.
///
/// Transitions toggle cleanly: a producer never sees two consecutive
/// `pause: true` for the same pair.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Feedback<A, P> {
    pub area: A,
    pub path: P,
    pub pause: bool,
}

/// Tuning knobs of a single dynamic stream.
#[derive(Clone, Copy, Debug)]
pub struct StreamOptions {
    /// Worker threads per stream; 0 picks from available parallelism.
    pub worker_count: usize,
    /// Max events a worker handles per dispatch before yielding the path.
    pub handle_batch: usize,
    /// Settings installed for areas first seen without explicit settings.
    pub default_area: AreaSettings,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            worker_count: 0,
            handle_batch: 32,
            default_area: AreaSettings::default(),
        }
    }
}

/// Capacity of the shared feedback channel of a parallel stream.
pub const FEEDBACK_CHANNEL_CAPACITY: usize = 1024;

pub type DynStreamResult<T> = Result<T, DynStreamError>;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum DynStreamError {
    #[error("path already exists")]
    PathExists,
    #[error("path not found")]
    PathMissing,
    #[error("stream is closed")]
    Closed,
}
