//! The connection pool and batching dispatcher.
//!
//! Jobs of the six batchable kinds are coalesced into at most one
//! aggregating task per kind before dispatch; everything else goes straight
//! to the bounded pending FIFO. A background manager promotes aggregates
//! into the FIFO and hands tasks to idle worker connections. Each queue is
//! guarded by its own mutex with strictly paired condition variables, and
//! no lock is ever held across a database call.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use cuckoo_codec::{MetaProcessInfo, MetaServiceKind};
use cuckoo_types::ErrorCode;

use crate::task::Task;
use crate::worker::{MetaBackend, WorkerConnection};

/// How long a non-empty batch slot may linger before the manager promotes
/// it regardless of fill level. Bounds latency for lightly loaded kinds.
const BATCH_PROMOTE_LINGER: Duration = Duration::from_millis(2);

/// The batchable service kinds, each owning one accumulator slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(usize)]
pub enum BatchKind {
    Mkdir = 0,
    Create,
    Stat,
    Unlink,
    Open,
    Close,
}

impl BatchKind {
    pub const COUNT: usize = 6;

    /// Maps a service kind to its batch slot; `None` for single-task kinds.
    pub fn from_service(kind: MetaServiceKind) -> Option<BatchKind> {
        match kind {
            MetaServiceKind::Mkdir => Some(BatchKind::Mkdir),
            MetaServiceKind::Create => Some(BatchKind::Create),
            MetaServiceKind::Stat => Some(BatchKind::Stat),
            MetaServiceKind::Unlink => Some(BatchKind::Unlink),
            MetaServiceKind::Open => Some(BatchKind::Open),
            MetaServiceKind::Close => Some(BatchKind::Close),
            _ => None,
        }
    }
}

struct SlotState {
    /// The in-progress aggregate, if any.
    task: Option<Arc<Task>>,
    /// The most recently promoted aggregate of this kind. The next one is
    /// not promoted until this completes, which keeps dispatch FIFO within
    /// a kind.
    in_flight: Option<Arc<Task>>,
}

struct BatchSlot {
    state: Mutex<SlotState>,
    cv_batch_not_full: Condvar,
}

/// State shared between callers, the manager, and the worker connections.
pub struct PoolShared {
    working: AtomicBool,
    pending_max: usize,
    batch_max: usize,

    pending: Mutex<VecDeque<Arc<Task>>>,
    cv_pending_not_empty: Condvar,
    cv_pending_not_full: Condvar,

    idle: Mutex<VecDeque<usize>>,
    cv_pool_not_empty: Condvar,

    batch_slots: Vec<BatchSlot>,
}

impl PoolShared {
    fn new(pending_max: usize, batch_max: usize, pool_size: usize) -> Self {
        Self {
            working: AtomicBool::new(true),
            pending_max,
            batch_max,
            pending: Mutex::new(VecDeque::new()),
            cv_pending_not_empty: Condvar::new(),
            cv_pending_not_full: Condvar::new(),
            idle: Mutex::new((0..pool_size).collect()),
            cv_pool_not_empty: Condvar::new(),
            batch_slots: (0..BatchKind::COUNT)
                .map(|_| BatchSlot {
                    state: Mutex::new(SlotState {
                        task: None,
                        in_flight: None,
                    }),
                    cv_batch_not_full: Condvar::new(),
                })
                .collect(),
        }
    }

    fn batch_soft_full(&self) -> usize {
        (self.batch_max / 2).max(1)
    }

    /// Returns a finished connection to the idle queue.
    pub fn readd_working_connection(&self, id: usize) {
        let mut idle = self.idle.lock().unwrap();
        debug_assert!(!idle.contains(&id), "connection {id} already idle");
        idle.push_back(id);
        self.cv_pool_not_empty.notify_one();
    }

    fn push_pending(&self, task: Arc<Task>) -> Result<(), ErrorCode> {
        let mut pending = self.pending.lock().unwrap();
        while pending.len() >= self.pending_max {
            if !self.working.load(Ordering::Acquire) {
                return Err(ErrorCode::ProgramError);
            }
            pending = self.cv_pending_not_full.wait(pending).unwrap();
        }
        if !self.working.load(Ordering::Acquire) {
            return Err(ErrorCode::ProgramError);
        }
        pending.push_back(task);
        self.cv_pending_not_empty.notify_one();
        Ok(())
    }

    fn join_batch(
        &self,
        kind: MetaServiceKind,
        batch_kind: BatchKind,
        infos: &[MetaProcessInfo],
    ) -> Result<(Arc<Task>, usize), ErrorCode> {
        let slot = &self.batch_slots[batch_kind as usize];
        let mut state = slot.state.lock().unwrap();
        loop {
            if !self.working.load(Ordering::Acquire) {
                return Err(ErrorCode::ProgramError);
            }
            match &state.task {
                None => {
                    let task = Arc::new(Task::new(kind));
                    let start = task.append(infos)?;
                    state.task = Some(task.clone());
                    // Wake the manager so the linger timer is armed.
                    self.cv_pending_not_empty.notify_one();
                    return Ok((task, start));
                }
                Some(task) => {
                    if task.count() + infos.len() > self.batch_max {
                        state = slot.cv_batch_not_full.wait(state).unwrap();
                        continue;
                    }
                    let task = task.clone();
                    let start = task.append(infos)?;
                    return Ok((task, start));
                }
            }
        }
    }

    /// Moves due batch aggregates into the pending FIFO.
    ///
    /// A slot is due once it reaches half the batch bound or has lingered
    /// past [`BATCH_PROMOTE_LINGER`]. Promotion is skipped while the
    /// previous aggregate of the kind is still executing, and while the
    /// pending FIFO is at its bound; both conditions clear on a later pass.
    fn promote_due_slots(&self) {
        for slot in &self.batch_slots {
            let mut state = slot.state.lock().unwrap();
            if let Some(prev) = &state.in_flight {
                if !prev.is_done() {
                    continue;
                }
                state.in_flight = None;
            }
            let due = match &state.task {
                Some(task) => {
                    task.count() >= self.batch_soft_full()
                        || task.created().elapsed() >= BATCH_PROMOTE_LINGER
                }
                None => continue,
            };
            if !due {
                continue;
            }
            let mut pending = self.pending.lock().unwrap();
            if pending.len() >= self.pending_max {
                continue;
            }
            let task = state.task.take().unwrap();
            state.in_flight = Some(task.clone());
            pending.push_back(task);
            drop(pending);
            self.cv_pending_not_empty.notify_one();
            slot.cv_batch_not_full.notify_all();
        }
    }

    fn acquire_idle(&self) -> Option<usize> {
        let mut idle = self.idle.lock().unwrap();
        loop {
            if let Some(id) = idle.pop_front() {
                return Some(id);
            }
            if !self.working.load(Ordering::Acquire) {
                return None;
            }
            idle = self.cv_pool_not_empty.wait(idle).unwrap();
        }
    }

    /// Fails everything still queued. Pending tasks are never silently
    /// dropped: each waiting caller wakes with `PROGRAM_ERROR`.
    fn drain_and_fail(&self) {
        let drained: Vec<_> = self.pending.lock().unwrap().drain(..).collect();
        for task in drained {
            task.fail(ErrorCode::ProgramError);
        }
        self.cv_pending_not_full.notify_all();
        for slot in &self.batch_slots {
            let task = slot.state.lock().unwrap().task.take();
            if let Some(task) = task {
                task.fail(ErrorCode::ProgramError);
            }
            slot.cv_batch_not_full.notify_all();
        }
    }
}

fn run_manager(shared: Arc<PoolShared>, workers: Arc<Vec<WorkerConnection>>) {
    loop {
        if !shared.working.load(Ordering::Acquire) {
            break;
        }
        shared.promote_due_slots();
        let task = {
            let mut pending = shared.pending.lock().unwrap();
            if pending.is_empty() && shared.working.load(Ordering::Acquire) {
                let (guard, _) = shared
                    .cv_pending_not_empty
                    .wait_timeout(pending, BATCH_PROMOTE_LINGER)
                    .unwrap();
                pending = guard;
            }
            let task = pending.pop_front();
            if task.is_some() {
                shared.cv_pending_not_full.notify_one();
            }
            task
        };
        let Some(task) = task else {
            continue;
        };
        match shared.acquire_idle() {
            Some(id) => workers[id].exec(task),
            // Only on stop; the task must still complete.
            None => task.fail(ErrorCode::ProgramError),
        }
    }
    shared.drain_and_fail();
}

/// The metadata connection pool.
///
/// Owns every worker connection; connections reach the shared queues
/// through [`PoolShared`], which outlives them by construction order.
pub struct ConnectionPool {
    shared: Arc<PoolShared>,
    workers: Arc<Vec<WorkerConnection>>,
    manager: Mutex<Option<JoinHandle<()>>>,
}

impl ConnectionPool {
    /// Builds a pool of `pool_size` connections, each owning one backend
    /// session produced by `factory`.
    pub fn new(
        pool_size: usize,
        pending_task_buffer_max_size: u16,
        batch_task_buffer_max_size: u16,
        mut factory: impl FnMut(usize) -> Box<dyn MetaBackend>,
    ) -> Self {
        assert!(pool_size > 0, "pool needs at least one connection");
        let shared = Arc::new(PoolShared::new(
            pending_task_buffer_max_size as usize,
            batch_task_buffer_max_size as usize,
            pool_size,
        ));
        let workers = Arc::new(
            (0..pool_size)
                .map(|id| WorkerConnection::spawn(id, factory(id), shared.clone()))
                .collect::<Vec<_>>(),
        );
        let manager = {
            let shared = shared.clone();
            let workers = workers.clone();
            std::thread::Builder::new()
                .name("cuckoo-pool-manager".to_string())
                .spawn(move || run_manager(shared, workers))
                .expect("failed to spawn pool manager")
        };
        Self {
            shared,
            workers,
            manager: Mutex::new(Some(manager)),
        }
    }

    /// Submits a metadata job and blocks until it completes.
    ///
    /// Per-item codes are written into `infos`; the return value is the
    /// first code that is not `Success` (note `FileExists` surfaces here
    /// and is success-like for some operations). Blocks under backpressure
    /// when the pending FIFO or the kind's batch slot is full.
    pub fn dispatch(
        &self,
        kind: MetaServiceKind,
        infos: &mut [MetaProcessInfo],
    ) -> Result<(), ErrorCode> {
        if infos.is_empty() {
            return Ok(());
        }
        if !self.shared.working.load(Ordering::Acquire) {
            return Err(ErrorCode::ProgramError);
        }
        let (task, start) = match BatchKind::from_service(kind) {
            None => {
                let task = Arc::new(Task::new(kind));
                let start = task.append(infos)?;
                self.shared.push_pending(task.clone())?;
                (task, start)
            }
            Some(batch_kind) => self.shared.join_batch(kind, batch_kind, infos)?,
        };
        task.wait_done();
        match task.harvest(start, infos) {
            ErrorCode::Success => Ok(()),
            code => Err(code),
        }
    }

    /// Cooperative shutdown: broadcasts every condition, fails pending and
    /// accumulating tasks with `PROGRAM_ERROR`, stops the workers, joins
    /// the manager. Idempotent.
    pub fn stop(&self) {
        if !self.shared.working.swap(false, Ordering::AcqRel) {
            return;
        }
        self.shared.cv_pending_not_empty.notify_all();
        self.shared.cv_pending_not_full.notify_all();
        self.shared.cv_pool_not_empty.notify_all();
        for slot in &self.shared.batch_slots {
            slot.cv_batch_not_full.notify_all();
        }
        if let Some(manager) = self.manager.lock().unwrap().take() {
            let _ = manager.join();
        }
        for worker in self.workers.iter() {
            worker.stop();
        }
    }
}

impl Drop for ConnectionPool {
    fn drop(&mut self) {
        self.stop();
    }
}
