//! Status and result of the single in-flight factory command.
//!
//! Status, result text and the busy flag are kept together behind one
//! mutex and read through snapshots, so a status query can never observe a
//! half-written result.

use std::sync::{Mutex, MutexGuard, PoisonError};

use arrayvec::ArrayString;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::acquire::NodeMatrix;

pub const MAX_RESULT_LEN: usize = 512;

pub type ResultText = ArrayString<MAX_RESULT_LEN>;

const RESULT_DELIM: &str = ":";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmdStatus {
    Waiting,
    Running,
    Ok,
    Fail,
    NotApplicable,
}

impl CmdStatus {
    pub fn token(self) -> &'static str {
        match self {
            CmdStatus::Waiting => "WAITING",
            CmdStatus::Running => "RUNNING",
            CmdStatus::Ok => "OK",
            CmdStatus::Fail => "FAIL",
            CmdStatus::NotApplicable => "NOT_APPLICABLE",
        }
    }

    pub fn from_token(token: &str) -> Option<Self> {
        match token.trim() {
            "WAITING" => Some(CmdStatus::Waiting),
            "RUNNING" => Some(CmdStatus::Running),
            "OK" => Some(CmdStatus::Ok),
            "FAIL" => Some(CmdStatus::Fail),
            "NOT_APPLICABLE" => Some(CmdStatus::NotApplicable),
            _ => None,
        }
    }

    pub fn is_finished(self) -> bool {
        matches!(self, CmdStatus::Ok | CmdStatus::Fail | CmdStatus::NotApplicable)
    }
}

impl core::fmt::Display for CmdStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.token())
    }
}

/// Point-in-time copy of the run state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSnapshot {
    pub status: CmdStatus,
    pub busy: bool,
    pub result: String,
}

#[derive(Debug)]
struct Inner {
    status: CmdStatus,
    busy: bool,
    result: ResultText,
    matrix: Option<NodeMatrix>,
}

#[derive(Debug)]
pub struct RunState {
    inner: Mutex<Inner>,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                status: CmdStatus::Waiting,
                busy: false,
                result: ResultText::new(),
                matrix: None,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Claim the engine for `line`. Returns `false`, leaving everything
    /// untouched, when another command has not been collected yet.
    pub fn try_begin(&self, line: &str) -> bool {
        let mut inner = self.lock();
        if inner.busy {
            return false;
        }

        inner.busy = true;
        inner.status = CmdStatus::Running;
        inner.result.clear();
        push_truncated(&mut inner.result, line);
        push_truncated(&mut inner.result, RESULT_DELIM);
        inner.matrix = None;
        true
    }

    /// Record the outcome of the running command. The engine stays busy
    /// until the result is consumed.
    pub fn finish(&self, status: CmdStatus, payload: &str) {
        let mut inner = self.lock();
        if !inner.busy {
            warn!("finish({}) without a running command", status);
        }
        push_truncated(&mut inner.result, payload);
        inner.status = status;
    }

    pub fn store_matrix(&self, matrix: NodeMatrix) {
        self.lock().matrix = Some(matrix);
    }

    /// Matrix captured by the most recent successful acquisition command.
    pub fn last_matrix(&self) -> Option<NodeMatrix> {
        self.lock().matrix.clone()
    }

    pub fn status(&self) -> CmdStatus {
        self.lock().status
    }

    pub fn is_busy(&self) -> bool {
        self.lock().busy
    }

    pub fn snapshot(&self) -> RunSnapshot {
        let inner = self.lock();
        RunSnapshot {
            status: inner.status,
            busy: inner.busy,
            result: inner.result.to_string(),
        }
    }

    /// Hand out the result text and release the engine. Reading twice
    /// returns the same text.
    pub fn consume_result(&self) -> String {
        let mut inner = self.lock();
        inner.busy = false;
        inner.status = CmdStatus::Waiting;
        inner.result.to_string()
    }
}

fn push_truncated(buf: &mut ResultText, s: &str) {
    if buf.try_push_str(s).is_ok() {
        return;
    }
    for c in s.chars() {
        if buf.try_push(c).is_err() {
            warn!("result text truncated at {} bytes", buf.len());
            break;
        }
    }
}
