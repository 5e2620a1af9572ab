//! The worker connection: one live database session, one background loop,
//! one task at a time.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use cuckoo_codec::{MetaServiceKind, SerializedData};
use cuckoo_types::ErrorCode;

use crate::pool::PoolShared;
use crate::task::Task;

/// One database session executing serialized metadata jobs.
///
/// The SQL layer lives behind this seam: implementations issue prepared
/// statements against their session and encode one response record per
/// item. A `Err` return fails every item of the task with `PROGRAM_ERROR`;
/// the task still completes, so callers never hang.
pub trait MetaBackend: Send {
    fn execute(
        &mut self,
        kind: MetaServiceKind,
        count: usize,
        param: &[u8],
    ) -> Result<SerializedData, ErrorCode>;
}

struct ExecSlot {
    task: Option<Arc<Task>>,
    working: bool,
}

struct WorkerShared {
    slot: Mutex<ExecSlot>,
    cv_execing: Condvar,
}

/// A pool-owned connection with a background worker thread.
///
/// `exec` hands a task to the worker without blocking; the worker executes
/// it, completes it, and re-adds itself to the pool's idle queue. The
/// connection holds at most one task at a time, and a connection sitting in
/// the idle queue holds none.
pub struct WorkerConnection {
    id: usize,
    shared: Arc<WorkerShared>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerConnection {
    pub(crate) fn spawn(id: usize, mut backend: Box<dyn MetaBackend>, pool: Arc<PoolShared>) -> Self {
        let shared = Arc::new(WorkerShared {
            slot: Mutex::new(ExecSlot {
                task: None,
                working: true,
            }),
            cv_execing: Condvar::new(),
        });
        let worker_shared = shared.clone();
        let thread = std::thread::Builder::new()
            .name(format!("cuckoo-meta-worker-{id}"))
            .spawn(move || {
                loop {
                    let task = {
                        let mut slot = worker_shared.slot.lock().unwrap();
                        loop {
                            if let Some(task) = slot.task.take() {
                                break task;
                            }
                            if !slot.working {
                                return;
                            }
                            slot = worker_shared.cv_execing.wait(slot).unwrap();
                        }
                    };
                    // No lock held across the database call.
                    let (kind, count, param) = task.snapshot();
                    let result = backend.execute(kind, count, &param);
                    if let Err(code) = &result {
                        log::error!(
                            "backend failed executing {count}-item {kind:?} task: {code}"
                        );
                    }
                    task.complete(result);
                    pool.readd_working_connection(id);
                }
            })
            .expect("failed to spawn worker thread");
        Self {
            id,
            shared,
            thread: Some(thread),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Assigns `task` to this connection and returns immediately; the
    /// background worker picks it up.
    pub fn exec(&self, task: Arc<Task>) {
        let mut slot = self.shared.slot.lock().unwrap();
        debug_assert!(slot.task.is_none(), "connection already holds a task");
        slot.task = Some(task);
        self.shared.cv_execing.notify_one();
    }

    /// Asks the worker to exit after any in-flight task completes.
    pub fn stop(&self) {
        let mut slot = self.shared.slot.lock().unwrap();
        slot.working = false;
        // Any task still sitting unexecuted in the slot is force-failed so
        // its callers wake.
        if let Some(task) = slot.task.take() {
            task.fail(ErrorCode::ProgramError);
        }
        self.shared.cv_execing.notify_one();
    }
}

impl Drop for WorkerConnection {
    fn drop(&mut self) {
        self.stop();
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}
