//! The metadata job unit.
//!
//! A task is either *single* (one caller's items, unbatchable kind) or an
//! *aggregate* (items from several callers of the same batchable kind,
//! completed atomically). A task lives in exactly one place at a time: the
//! pool's pending FIFO, one batch accumulator slot, or one worker
//! connection's exec slot.

use std::sync::{Condvar, Mutex};
use std::time::Instant;

use cuckoo_codec::{
    decode_responses, encode_params, MetaProcessInfo, MetaServiceKind, SerializedData,
};
use cuckoo_types::ErrorCode;

struct TaskInner {
    count: usize,
    param: SerializedData,
    response: SerializedData,
    done: bool,
    /// Whole-task failure: pool stop or a backend error. Every item of the
    /// task reports this code.
    failure: Option<ErrorCode>,
}

/// One metadata job, possibly aggregating several callers' items.
pub struct Task {
    kind: MetaServiceKind,
    created: Instant,
    inner: Mutex<TaskInner>,
    cv_done: Condvar,
}

impl Task {
    pub fn new(kind: MetaServiceKind) -> Self {
        Self {
            kind,
            created: Instant::now(),
            inner: Mutex::new(TaskInner {
                count: 0,
                param: SerializedData::new(),
                response: SerializedData::new(),
                done: false,
                failure: None,
            }),
            cv_done: Condvar::new(),
        }
    }

    pub fn kind(&self) -> MetaServiceKind {
        self.kind
    }

    pub fn created(&self) -> Instant {
        self.created
    }

    pub fn count(&self) -> usize {
        self.inner.lock().unwrap().count
    }

    pub fn is_done(&self) -> bool {
        self.inner.lock().unwrap().done
    }

    /// Appends a caller's items and returns their start index within the
    /// task, which addresses the caller's slice of the response later.
    pub fn append(&self, infos: &[MetaProcessInfo]) -> Result<usize, ErrorCode> {
        let mut inner = self.inner.lock().unwrap();
        let start = inner.count;
        encode_params(self.kind, infos, None, &mut inner.param)
            .map_err(ErrorCode::from)?;
        inner.count += infos.len();
        Ok(start)
    }

    /// The executing worker's view of the job: kind, item count, and the
    /// parameter blob. Taken by value so no task lock is held across the
    /// database call.
    pub fn snapshot(&self) -> (MetaServiceKind, usize, Vec<u8>) {
        let inner = self.inner.lock().unwrap();
        (self.kind, inner.count, inner.param.as_bytes().to_vec())
    }

    /// Publishes the execution result and wakes every waiting caller.
    pub fn complete(&self, result: Result<SerializedData, ErrorCode>) {
        let mut inner = self.inner.lock().unwrap();
        match result {
            Ok(response) => inner.response = response,
            Err(code) => inner.failure = Some(code),
        }
        inner.done = true;
        self.cv_done.notify_all();
    }

    /// Force-fails the task; every item reports `code`. Callers never hang.
    pub fn fail(&self, code: ErrorCode) {
        self.complete(Err(code));
    }

    pub fn wait_done(&self) {
        let mut inner = self.inner.lock().unwrap();
        while !inner.done {
            inner = self.cv_done.wait(inner).unwrap();
        }
    }

    /// Decodes this caller's slice of the response into `infos`, which must
    /// be the same items passed to [`Task::append`]. Returns the first
    /// non-`Success` code among them, or `Success`.
    ///
    /// Must only be called after [`Task::wait_done`] returned.
    pub fn harvest(&self, start: usize, infos: &mut [MetaProcessInfo]) -> ErrorCode {
        let inner = self.inner.lock().unwrap();
        debug_assert!(inner.done);
        if let Some(code) = inner.failure {
            for info in infos.iter_mut() {
                info.error_code = code;
            }
            return code;
        }
        if let Err(err) =
            decode_responses(self.kind, start, infos, inner.response.as_bytes())
        {
            log::error!("response blob for {:?} is corrupt: {err}", self.kind);
            for info in infos.iter_mut() {
                info.error_code = ErrorCode::ProgramError;
            }
            return ErrorCode::ProgramError;
        }
        infos
            .iter()
            .map(|info| info.error_code)
            .find(|code| *code != ErrorCode::Success)
            .unwrap_or(ErrorCode::Success)
    }
}
