//! Single dynamic stream: one scheduler thread plus a worker pool.
//!
//! The scheduler owns the path registry and all area accounting. Workers
//! receive runnable paths over a shared ready channel; a path is dispatched
//! to at most one worker at a time and the worker holds the path's dest
//! mutex across `handle`, so per-path delivery is sequential and ordered.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender, TrySendError, bounded, unbounded};
use crossbeam::select;
use tracing::warn;

use super::{
    AreaSettings, DynStreamError, DynStreamResult, EventHandler, Feedback, Handle, StreamOptions,
};

/// Per-path state shared between the scheduler and the workers.
struct PathShared<H: EventHandler> {
    path: H::Path,
    area: H::Area,
    queue: Mutex<VecDeque<H::Event>>,
    /// The per-path mutex: held across `handle`. `None` once removed.
    dest: Mutex<Option<H::Dest>>,
    /// True while the path sits in the ready channel or runs on a worker.
    scheduled: AtomicBool,
    /// True while the path awaits a wake (handler returned `Await`).
    parked: AtomicBool,
    removed: AtomicBool,
}

struct AreaState<H: EventHandler> {
    settings: AreaSettings,
    pending_bytes: usize,
    paused_paths: HashSet<H::Path>,
    path_count: usize,
}

impl<H: EventHandler> AreaState<H> {
    fn new(settings: AreaSettings) -> Self {
        Self {
            settings,
            pending_bytes: 0,
            paused_paths: HashSet::new(),
            path_count: 0,
        }
    }
}

enum Control<H: EventHandler> {
    AddPath {
        path: H::Path,
        dest: H::Dest,
        settings: Option<AreaSettings>,
        respond: Sender<DynStreamResult<()>>,
    },
    RemovePath {
        path: H::Path,
        respond: Sender<DynStreamResult<()>>,
    },
    SetAreaSettings {
        area: H::Area,
        settings: AreaSettings,
    },
    Close,
}

enum WorkerMsg<H: EventHandler> {
    Run(Arc<PathShared<H>>),
    Shutdown,
}

struct WorkerReport<H: EventHandler> {
    area: H::Area,
    released: usize,
}

/// Poison-tolerant lock: a handler panic must not wedge the whole stream.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A single worker group multiplexing many paths.
pub struct DynamicStream<H: EventHandler> {
    in_tx: Sender<H::Event>,
    wake_tx: Sender<H::Path>,
    ctrl_tx: Sender<Control<H>>,
    dropped: Arc<AtomicU64>,
    handles: Vec<JoinHandle<()>>,
}

impl<H: EventHandler> DynamicStream<H> {
    /// Spawn the scheduler and worker threads.
    ///
    /// Feedback for this stream's areas is emitted on `feedback_tx`; the
    /// sender never blocks the scheduler (full channel drops the signal).
    pub fn start(
        handler: Arc<H>,
        feedback_tx: Sender<Feedback<H::Area, H::Path>>,
        options: StreamOptions,
    ) -> Self {
        let (in_tx, in_rx) = unbounded();
        let (wake_tx, wake_rx) = unbounded();
        let (ctrl_tx, ctrl_rx) = unbounded();
        let (ready_tx, ready_rx) = unbounded();
        let (report_tx, report_rx) = unbounded();
        let dropped = Arc::new(AtomicU64::new(0));

        let worker_count = effective_worker_count(options.worker_count);
        let mut handles = Vec::with_capacity(worker_count + 1);
        for _ in 0..worker_count {
            let handler = Arc::clone(&handler);
            let ready_rx = ready_rx.clone();
            let ready_tx = ready_tx.clone();
            let report_tx = report_tx.clone();
            let dropped = Arc::clone(&dropped);
            let batch = options.handle_batch.max(1);
            handles.push(std::thread::spawn(move || {
                worker_loop(handler, ready_rx, ready_tx, report_tx, dropped, batch);
            }));
        }

        let scheduler = Scheduler {
            handler,
            paths: HashMap::new(),
            areas: HashMap::new(),
            ready_tx,
            feedback_tx,
            default_area: options.default_area,
            dropped: Arc::clone(&dropped),
        };
        handles.push(std::thread::spawn(move || {
            scheduler.run(in_rx, wake_rx, ctrl_rx, report_rx, worker_count);
        }));

        Self {
            in_tx,
            wake_tx,
            ctrl_tx,
            dropped,
            handles,
        }
    }

    /// Producer channel for events.
    pub fn in_sender(&self) -> Sender<H::Event> {
        self.in_tx.clone()
    }

    /// Channel to re-enqueue a parked path.
    pub fn wake_sender(&self) -> Sender<H::Path> {
        self.wake_tx.clone()
    }

    pub fn add_path(
        &self,
        path: H::Path,
        dest: H::Dest,
        settings: Option<AreaSettings>,
    ) -> DynStreamResult<()> {
        self.request(|respond| Control::AddPath {
            path,
            dest,
            settings,
            respond,
        })
    }

    /// Drains pending events through `on_drop`, then invokes
    /// `on_path_removed` exactly once.
    pub fn remove_path(&self, path: H::Path) -> DynStreamResult<()> {
        self.request(|respond| Control::RemovePath { path, respond })
    }

    pub fn set_area_settings(&self, area: H::Area, settings: AreaSettings) {
        let _ = self.ctrl_tx.send(Control::SetAreaSettings { area, settings });
    }

    /// Events shed so far (unknown path, hard ceiling, handler reject).
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Stop intake, finish in-flight batches, join all threads. Idempotent.
    pub fn close(&mut self) {
        let _ = self.ctrl_tx.send(Control::Close);
        for handle in self.handles.drain(..) {
            let _ = handle.join();
        }
    }

    fn request(
        &self,
        make: impl FnOnce(Sender<DynStreamResult<()>>) -> Control<H>,
    ) -> DynStreamResult<()> {
        let (respond_tx, respond_rx) = bounded(1);
        self.ctrl_tx
            .send(make(respond_tx))
            .map_err(|_| DynStreamError::Closed)?;
        respond_rx.recv().map_err(|_| DynStreamError::Closed)?
    }
}

fn effective_worker_count(requested: usize) -> usize {
    if requested > 0 {
        return requested;
    }
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

struct Scheduler<H: EventHandler> {
    handler: Arc<H>,
    paths: HashMap<H::Path, Arc<PathShared<H>>>,
    areas: HashMap<H::Area, AreaState<H>>,
    ready_tx: Sender<WorkerMsg<H>>,
    feedback_tx: Sender<Feedback<H::Area, H::Path>>,
    default_area: AreaSettings,
    dropped: Arc<AtomicU64>,
}

impl<H: EventHandler> Scheduler<H> {
    fn run(
        mut self,
        in_rx: Receiver<H::Event>,
        wake_rx: Receiver<H::Path>,
        ctrl_rx: Receiver<Control<H>>,
        report_rx: Receiver<WorkerReport<H>>,
        worker_count: usize,
    ) {
        loop {
            select! {
                recv(in_rx) -> msg => match msg {
                    Ok(event) => self.route(event),
                    Err(_) => break,
                },
                recv(wake_rx) -> msg => match msg {
                    Ok(path) => self.wake(path),
                    Err(_) => break,
                },
                recv(report_rx) -> msg => match msg {
                    Ok(report) => self.settle_release(&report.area, report.released),
                    Err(_) => break,
                },
                recv(ctrl_rx) -> msg => match msg {
                    Ok(Control::AddPath { path, dest, settings, respond }) => {
                        let _ = respond.send(self.add_path(path, dest, settings));
                    }
                    Ok(Control::RemovePath { path, respond }) => {
                        let _ = respond.send(self.remove_path(&path));
                    }
                    Ok(Control::SetAreaSettings { area, settings }) => {
                        self.set_area_settings(area, settings);
                    }
                    Ok(Control::Close) | Err(_) => break,
                },
            }
        }
        for _ in 0..worker_count {
            let _ = self.ready_tx.send(WorkerMsg::Shutdown);
        }
    }

    fn route(&mut self, event: H::Event) {
        let path = self.handler.path(&event);
        let Some(shared) = self.paths.get(&path).cloned() else {
            self.shed(event);
            return;
        };
        if shared.removed.load(Ordering::Acquire) {
            self.shed(event);
            return;
        }

        let size = self.handler.event_size(&event);
        let area = self
            .areas
            .get_mut(&shared.area)
            .expect("area registered with its paths");
        if area.pending_bytes.saturating_add(size) > area.settings.max_pending_size {
            warn!(pending = area.pending_bytes, size, "area over hard ceiling, shedding event");
            self.shed(event);
            return;
        }
        area.pending_bytes += size;
        let newly_paused = area.pending_bytes > area.settings.memory_quota
            && area.paused_paths.insert(path.clone());

        lock(&shared.queue).push_back(event);
        if newly_paused {
            self.emit_feedback(shared.area.clone(), path, true);
        }
        self.schedule(shared);
    }

    fn wake(&mut self, path: H::Path) {
        let Some(shared) = self.paths.get(&path).cloned() else {
            return;
        };
        shared.parked.store(false, Ordering::Release);
        if !lock(&shared.queue).is_empty() {
            self.schedule(shared);
        }
    }

    fn schedule(&self, shared: Arc<PathShared<H>>) {
        if shared.parked.load(Ordering::Acquire) || shared.removed.load(Ordering::Acquire) {
            return;
        }
        if shared
            .scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let _ = self.ready_tx.send(WorkerMsg::Run(shared));
        }
    }

    fn add_path(
        &mut self,
        path: H::Path,
        dest: H::Dest,
        settings: Option<AreaSettings>,
    ) -> DynStreamResult<()> {
        if self.paths.contains_key(&path) {
            return Err(DynStreamError::PathExists);
        }
        let area_key = self.handler.area(&path);
        let default_area = self.default_area;
        let area = self
            .areas
            .entry(area_key.clone())
            .or_insert_with(|| AreaState::new(settings.unwrap_or(default_area)));
        area.path_count += 1;

        let shared = Arc::new(PathShared {
            path: path.clone(),
            area: area_key,
            queue: Mutex::new(VecDeque::new()),
            dest: Mutex::new(Some(dest)),
            scheduled: AtomicBool::new(false),
            parked: AtomicBool::new(false),
            removed: AtomicBool::new(false),
        });
        self.paths.insert(path, shared);
        Ok(())
    }

    fn remove_path(&mut self, path: &H::Path) -> DynStreamResult<()> {
        let Some(shared) = self.paths.remove(path) else {
            return Err(DynStreamError::PathMissing);
        };
        shared.removed.store(true, Ordering::Release);
        if let Some(area) = self.areas.get_mut(&shared.area) {
            area.paused_paths.remove(path);
            area.path_count = area.path_count.saturating_sub(1);
        }
        // Claim the path; if a worker holds it, that worker finishes the
        // removal when it observes the flag.
        if shared
            .scheduled
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let released = drain_removed(self.handler.as_ref(), &shared, &self.dropped);
            self.settle_release(&shared.area, released);
        }
        Ok(())
    }

    fn set_area_settings(&mut self, area_key: H::Area, settings: AreaSettings) {
        let area = self
            .areas
            .entry(area_key.clone())
            .or_insert_with(|| AreaState::new(settings));
        area.settings = settings;
        if area.pending_bytes <= area.settings.memory_quota && !area.paused_paths.is_empty() {
            let resumed: Vec<_> = area.paused_paths.drain().collect();
            for path in resumed {
                self.emit_feedback(area_key.clone(), path, false);
            }
        }
    }

    fn settle_release(&mut self, area_key: &H::Area, released: usize) {
        let Some(area) = self.areas.get_mut(area_key) else {
            return;
        };
        debug_assert!(area.pending_bytes >= released, "area pending underflow");
        area.pending_bytes = area.pending_bytes.saturating_sub(released);
        if area.pending_bytes <= area.settings.memory_quota && !area.paused_paths.is_empty() {
            let resumed: Vec<_> = area.paused_paths.drain().collect();
            for path in resumed {
                self.emit_feedback(area_key.clone(), path, false);
            }
        }
    }

    fn emit_feedback(&self, area: H::Area, path: H::Path, pause: bool) {
        match self.feedback_tx.try_send(Feedback { area, path, pause }) {
            Ok(()) => {}
            Err(TrySendError::Full(feedback)) => {
                warn!(pause = feedback.pause, "feedback channel full, dropping signal");
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    fn shed(&self, event: H::Event) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
        self.handler.on_drop(event);
    }
}

fn worker_loop<H: EventHandler>(
    handler: Arc<H>,
    ready_rx: Receiver<WorkerMsg<H>>,
    ready_tx: Sender<WorkerMsg<H>>,
    report_tx: Sender<WorkerReport<H>>,
    dropped: Arc<AtomicU64>,
    batch: usize,
) {
    while let Ok(msg) = ready_rx.recv() {
        match msg {
            WorkerMsg::Run(shared) => process(
                handler.as_ref(),
                &shared,
                batch,
                &ready_tx,
                &report_tx,
                &dropped,
            ),
            WorkerMsg::Shutdown => break,
        }
    }
}

fn process<H: EventHandler>(
    handler: &H,
    shared: &Arc<PathShared<H>>,
    batch: usize,
    ready_tx: &Sender<WorkerMsg<H>>,
    report_tx: &Sender<WorkerReport<H>>,
    dropped: &AtomicU64,
) {
    let mut released = 0usize;
    {
        let mut dest_guard = lock(&shared.dest);
        for _ in 0..batch {
            if shared.removed.load(Ordering::Acquire) {
                break;
            }
            let Some(event) = lock(&shared.queue).pop_front() else {
                break;
            };
            let size = handler.event_size(&event);
            let Some(dest) = dest_guard.as_mut() else {
                released += size;
                dropped.fetch_add(1, Ordering::Relaxed);
                handler.on_drop(event);
                continue;
            };
            match handler.handle(event, dest) {
                Handle::Done => released += size,
                Handle::Reject(event) => {
                    released += size;
                    dropped.fetch_add(1, Ordering::Relaxed);
                    handler.on_drop(event);
                }
                Handle::Await(event) => {
                    lock(&shared.queue).push_front(event);
                    shared.parked.store(true, Ordering::Release);
                    break;
                }
            }
        }
    }

    if shared.removed.load(Ordering::Acquire) {
        // Path was removed while we ran; finish the drain here. `scheduled`
        // stays set: the path is no longer reachable from the registry.
        released += drain_removed(handler, shared, dropped);
    } else {
        shared.scheduled.store(false, Ordering::Release);
        if !lock(&shared.queue).is_empty()
            && !shared.parked.load(Ordering::Acquire)
            && !shared.removed.load(Ordering::Acquire)
            && shared
                .scheduled
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
        {
            let _ = ready_tx.send(WorkerMsg::Run(Arc::clone(shared)));
        }
    }

    if released > 0 {
        let _ = report_tx.send(WorkerReport {
            area: shared.area.clone(),
            released,
        });
    }
}

/// Drain a removed path: `on_drop` every pending event, then hand the dest
/// to `on_path_removed`. The `Option` take keeps the callback one-shot even
/// when both a worker and the scheduler race through here.
fn drain_removed<H: EventHandler>(
    handler: &H,
    shared: &PathShared<H>,
    dropped: &AtomicU64,
) -> usize {
    let mut released = 0usize;
    loop {
        let Some(event) = lock(&shared.queue).pop_front() else {
            break;
        };
        released += handler.event_size(&event);
        dropped.fetch_add(1, Ordering::Relaxed);
        handler.on_drop(event);
    }
    if let Some(dest) = lock(&shared.dest).take() {
        handler.on_path_removed(dest);
    }
    released
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::{Duration, Instant};

    use crossbeam::channel::bounded;

    use super::*;

    struct TestEvent {
        path: u64,
        seq: u64,
        size: usize,
    }

    #[derive(Default)]
    struct Recorder {
        delivered: Mutex<HashMap<u64, Vec<u64>>>,
        dropped: Mutex<Vec<u64>>,
        removed_dests: Mutex<Vec<String>>,
        park_first: AtomicBool,
    }

    struct TestHandler {
        recorder: Arc<Recorder>,
        gate: Option<Receiver<()>>,
    }

    impl EventHandler for TestHandler {
        type Area = u8;
        type Path = u64;
        type Event = TestEvent;
        type Dest = String;

        fn path(&self, event: &TestEvent) -> u64 {
            event.path
        }

        fn area(&self, _path: &u64) -> u8 {
            0
        }

        fn event_size(&self, event: &TestEvent) -> usize {
            event.size
        }

        fn handle(&self, event: TestEvent, _dest: &mut String) -> Handle<TestEvent> {
            if self.recorder.park_first.swap(false, Ordering::AcqRel) {
                return Handle::Await(event);
            }
            if let Some(gate) = &self.gate {
                let _ = gate.recv();
            }
            lock(&self.recorder.delivered)
                .entry(event.path)
                .or_default()
                .push(event.seq);
            Handle::Done
        }

        fn on_drop(&self, event: TestEvent) {
            lock(&self.recorder.dropped).push(event.seq);
        }

        fn on_path_removed(&self, dest: String) {
            lock(&self.recorder.removed_dests).push(dest);
        }
    }

    fn wait_until(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if check() {
                return true;
            }
            std::thread::sleep(Duration::from_millis(2));
        }
        check()
    }

    fn start_stream(
        recorder: Arc<Recorder>,
        gate: Option<Receiver<()>>,
        options: StreamOptions,
    ) -> (
        DynamicStream<TestHandler>,
        Receiver<Feedback<u8, u64>>,
    ) {
        let (feedback_tx, feedback_rx) = bounded(64);
        let handler = Arc::new(TestHandler { recorder, gate });
        (DynamicStream::start(handler, feedback_tx, options), feedback_rx)
    }

    #[test]
    fn per_path_order_is_preserved() {
        let recorder = Arc::new(Recorder::default());
        let (mut stream, _feedback) = start_stream(
            Arc::clone(&recorder),
            None,
            StreamOptions {
                worker_count: 4,
                ..StreamOptions::default()
            },
        );

        for path in 0..4u64 {
            stream.add_path(path, format!("dest-{path}"), None).unwrap();
        }
        let tx = stream.in_sender();
        for seq in 0..500u64 {
            for path in 0..4u64 {
                tx.send(TestEvent {
                    path,
                    seq,
                    size: 1,
                })
                .unwrap();
            }
        }

        assert!(wait_until(Duration::from_secs(10), || {
            let delivered = lock(&recorder.delivered);
            (0..4u64).all(|p| delivered.get(&p).map(Vec::len) == Some(500))
        }));
        let delivered = lock(&recorder.delivered);
        for path in 0..4u64 {
            let seqs = &delivered[&path];
            assert!(seqs.windows(2).all(|w| w[0] < w[1]), "path {path} out of order");
        }
        drop(delivered);
        stream.close();
    }

    #[test]
    fn duplicate_add_and_missing_remove_fail() {
        let recorder = Arc::new(Recorder::default());
        let (mut stream, _feedback) =
            start_stream(recorder, None, StreamOptions::default());

        stream.add_path(1, "a".into(), None).unwrap();
        assert_eq!(
            stream.add_path(1, "b".into(), None),
            Err(DynStreamError::PathExists)
        );
        assert_eq!(stream.remove_path(2), Err(DynStreamError::PathMissing));
        stream.close();
    }

    #[test]
    fn remove_path_drains_and_notifies_once() {
        let recorder = Arc::new(Recorder::default());
        recorder.park_first.store(true, Ordering::Release);
        let (mut stream, _feedback) = start_stream(
            Arc::clone(&recorder),
            None,
            StreamOptions {
                worker_count: 1,
                ..StreamOptions::default()
            },
        );

        stream.add_path(7, "seven".into(), None).unwrap();
        let tx = stream.in_sender();
        for seq in 0..5u64 {
            tx.send(TestEvent {
                path: 7,
                seq,
                size: 10,
            })
            .unwrap();
        }
        // First delivery parks the path, so the backlog stays queued.
        assert!(wait_until(Duration::from_secs(5), || {
            !recorder.park_first.load(Ordering::Acquire)
        }));

        stream.remove_path(7).unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            lock(&recorder.removed_dests).len() == 1
        }));
        assert_eq!(lock(&recorder.removed_dests)[0], "seven");
        assert_eq!(lock(&recorder.dropped).len(), 5);
        assert!(lock(&recorder.delivered).is_empty());
        stream.close();
    }

    #[test]
    fn wake_resumes_a_parked_path() {
        let recorder = Arc::new(Recorder::default());
        recorder.park_first.store(true, Ordering::Release);
        let (mut stream, _feedback) = start_stream(
            Arc::clone(&recorder),
            None,
            StreamOptions {
                worker_count: 1,
                ..StreamOptions::default()
            },
        );

        stream.add_path(3, "three".into(), None).unwrap();
        let tx = stream.in_sender();
        for seq in 0..3u64 {
            tx.send(TestEvent {
                path: 3,
                seq,
                size: 1,
            })
            .unwrap();
        }
        assert!(wait_until(Duration::from_secs(5), || {
            !recorder.park_first.load(Ordering::Acquire)
        }));
        // Parked: nothing is delivered until a wake names the path.
        std::thread::sleep(Duration::from_millis(20));
        assert!(lock(&recorder.delivered).is_empty());

        stream.wake_sender().send(3).unwrap();
        assert!(wait_until(Duration::from_secs(5), || {
            lock(&recorder.delivered).get(&3).map(Vec::len) == Some(3)
        }));
        assert_eq!(lock(&recorder.delivered)[&3], vec![0, 1, 2]);
        stream.close();
    }

    #[test]
    fn quota_crossing_pauses_and_drain_resumes() {
        let recorder = Arc::new(Recorder::default());
        let (gate_tx, gate_rx) = bounded(1024);
        let (mut stream, feedback) = start_stream(
            Arc::clone(&recorder),
            Some(gate_rx),
            StreamOptions {
                worker_count: 1,
                default_area: AreaSettings {
                    memory_quota: 1_000,
                    max_pending_size: 1 << 20,
                },
                ..StreamOptions::default()
            },
        );

        stream.add_path(1, "one".into(), None).unwrap();
        let tx = stream.in_sender();
        // Handler is gated shut, so pending bytes accumulate past the quota.
        for seq in 0..20u64 {
            tx.send(TestEvent {
                path: 1,
                seq,
                size: 100,
            })
            .unwrap();
        }

        let pause = feedback.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            pause,
            Feedback {
                area: 0,
                path: 1,
                pause: true
            }
        );

        // Open the gate: the backlog drains and the pair toggles back.
        for _ in 0..20 {
            gate_tx.send(()).unwrap();
        }
        let resume = feedback.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(
            resume,
            Feedback {
                area: 0,
                path: 1,
                pause: false
            }
        );
        stream.close();
    }

    #[test]
    fn hard_ceiling_sheds_instead_of_queueing() {
        let recorder = Arc::new(Recorder::default());
        let (gate_tx, gate_rx) = bounded(1024);
        let (mut stream, _feedback) = start_stream(
            Arc::clone(&recorder),
            Some(gate_rx),
            StreamOptions {
                worker_count: 1,
                default_area: AreaSettings {
                    memory_quota: 100,
                    max_pending_size: 500,
                },
                ..StreamOptions::default()
            },
        );

        stream.add_path(1, "one".into(), None).unwrap();
        let tx = stream.in_sender();
        for seq in 0..10u64 {
            tx.send(TestEvent {
                path: 1,
                seq,
                size: 100,
            })
            .unwrap();
        }
        assert!(wait_until(Duration::from_secs(5), || {
            stream.dropped_events() == 5
        }));

        for _ in 0..10 {
            let _ = gate_tx.send(());
        }
        assert!(wait_until(Duration::from_secs(5), || {
            lock(&recorder.delivered).get(&1).map(Vec::len) == Some(5)
        }));
        stream.close();
    }
}
