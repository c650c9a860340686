//! Parallel dynamic stream: hash-routes paths across N worker streams.

use std::sync::Arc;

use crossbeam::channel::{Receiver, Sender, bounded};

use super::hasher::PathHasher;
use super::stream::DynamicStream;
use super::{
    AreaSettings, DynStreamResult, EventHandler, FEEDBACK_CHANNEL_CAPACITY, Feedback,
    StreamOptions,
};

/// Fixed fleet of dynamic streams sharing one feedback channel.
///
/// The parallel stream owns the feedback channel; sub-streams hold
/// write-only clones of the sender. Closing shuts the sub-streams down
/// first, which drops the last senders and disconnects the channel.
pub struct ParallelDynamicStream<H: EventHandler, S> {
    hasher: S,
    streams: Vec<DynamicStream<H>>,
    feedback_rx: Receiver<Feedback<H::Area, H::Path>>,
}

impl<H, S> ParallelDynamicStream<H, S>
where
    H: EventHandler,
    S: PathHasher<H::Path>,
{
    /// Spawn `stream_count` streams. Each stream gets an equal share of the
    /// host's parallelism unless the options pin a worker count.
    pub fn start(stream_count: usize, hasher: S, handler: H, options: StreamOptions) -> Self {
        assert!(stream_count > 0, "stream count must be positive");
        let (feedback_tx, feedback_rx) = bounded(FEEDBACK_CHANNEL_CAPACITY);
        let handler = Arc::new(handler);

        let per_stream = if options.worker_count > 0 {
            options.worker_count
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get() / stream_count)
                .unwrap_or(1)
                .max(1)
        };
        let options = StreamOptions {
            worker_count: per_stream,
            ..options
        };

        let streams = (0..stream_count)
            .map(|_| DynamicStream::start(Arc::clone(&handler), feedback_tx.clone(), options))
            .collect();
        Self {
            hasher,
            streams,
            feedback_rx,
        }
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Producer channel of the stream owning `path`.
    pub fn in_sender(&self, path: &H::Path) -> Sender<H::Event> {
        self.stream_for(path).in_sender()
    }

    /// Wake channel of the stream owning `path`.
    pub fn wake_sender(&self, path: &H::Path) -> Sender<H::Path> {
        self.stream_for(path).wake_sender()
    }

    /// Shared feedback channel multiplexing all sub-streams.
    pub fn feedback(&self) -> &Receiver<Feedback<H::Area, H::Path>> {
        &self.feedback_rx
    }

    pub fn add_path(
        &self,
        path: H::Path,
        dest: H::Dest,
        settings: Option<AreaSettings>,
    ) -> DynStreamResult<()> {
        self.stream_for(&path).add_path(path, dest, settings)
    }

    pub fn remove_path(&self, path: H::Path) -> DynStreamResult<()> {
        self.stream_for(&path).remove_path(path)
    }

    /// An area may span paths on every stream, so settings broadcast.
    pub fn set_area_settings(&self, area: H::Area, settings: AreaSettings) {
        for stream in &self.streams {
            stream.set_area_settings(area.clone(), settings);
        }
    }

    /// Total events shed across all sub-streams.
    pub fn dropped_events(&self) -> u64 {
        self.streams.iter().map(DynamicStream::dropped_events).sum()
    }

    pub fn close(&mut self) {
        for stream in &mut self.streams {
            stream.close();
        }
    }

    fn stream_for(&self, path: &H::Path) -> &DynamicStream<H> {
        let index = self.hasher.hash(path, self.streams.len());
        assert!(
            index < self.streams.len(),
            "path hasher returned {index} for {} streams",
            self.streams.len()
        );
        &self.streams[index]
    }
}
