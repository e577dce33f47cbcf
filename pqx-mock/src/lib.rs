//! An in-process stand-in for libpq.
//!
//! [`MockEngine`] implements [`Engine`][pqx_core::Engine] against a small scripted server, and
//! records what crosses the seam: how often each native entry point was called, which native
//! resources are still allocated, and the commands, parameters and `COPY` data submitted.
//!
//! ```rust
//! use pqx_core::{ConnectionHandle, ExecStatus};
//! use pqx_mock::MockEngine;
//!
//! # fn main() -> pqx_core::Result<()> {
//! let engine = MockEngine::new();
//! let mut conn = ConnectionHandle::connect(engine.clone(), "dbname=pqx")?;
//!
//! let res = conn.exec("begin")?;
//! assert_eq!(res.status()?, ExecStatus::CommandOk);
//!
//! drop(res);
//! drop(conn);
//! assert!(engine.live().is_empty());
//! # Ok(())
//! # }
//! ```

use std::fmt::{self, Debug, Formatter};
use std::os::raw::c_int;

use parking_lot::MutexGuard;

mod bytea;
mod conn;
mod conninfo;
mod engine;
mod result;
mod server;
mod state;

pub use conn::MockConn;
pub use conninfo::MockOptions;
pub use result::{MockResult, ResultData};
pub use state::{Fault, Live, MockBuffer, SubmittedParams};

use state::{Shared, State};

/// A fake native engine, shared by every handle it creates.
///
/// Clones observe and script the same server.
#[derive(Clone, Default)]
pub struct MockEngine {
    state: Shared,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count a native call and lock the server state.
    fn enter(&self, call: &'static str) -> MutexGuard<'_, State> {
        let mut state = self.state.lock();
        *state.calls.entry(call).or_default() += 1;
        state
    }

    /// Number of calls made to one native entry point, named after the `Engine` method.
    pub fn calls(&self, call: &str) -> usize {
        self.state.lock().calls.get(call).copied().unwrap_or_default()
    }

    /// Number of calls made to any native entry point.
    pub fn total_calls(&self) -> usize {
        self.state.lock().calls.values().sum()
    }

    /// Native resources currently allocated.
    pub fn live(&self) -> Live {
        self.state.lock().live
    }

    /// Make the next matching call fail.
    pub fn inject(&self, fault: Fault) {
        self.state.lock().faults.insert(fault);
    }

    /// Answer the next statement with `result` instead of the built-in behaviour.
    pub fn respond(&self, result: ResultData) {
        self.state.lock().responses.push_back(result);
    }

    /// Rows sent by every subsequent `COPY ... TO STDOUT`.
    pub fn set_copy_out<I, R>(&self, rows: I)
    where
        I: IntoIterator<Item = R>,
        R: Into<Vec<u8>>,
    {
        self.state.lock().copy_out = rows.into_iter().map(Into::into).collect();
    }

    /// Every chunk received by `put_copy_data`, in order.
    pub fn copy_in(&self) -> Vec<Vec<u8>> {
        self.state.lock().copy_in.clone()
    }

    /// Every statement executed by the server, in order.
    pub fn queries(&self) -> Vec<Vec<u8>> {
        self.state.lock().queries.clone()
    }

    /// Parameters of every parameterized execution, in order.
    pub fn submitted_params(&self) -> Vec<SubmittedParams> {
        self.state.lock().params.clone()
    }

    /// Make the next `rounds` calls that can block in non-blocking mode report that they would.
    pub fn stall(&self, rounds: usize) {
        self.state.lock().stalls = rounds;
    }

    /// Keep each subsequent request busy until input was consumed `rounds` times.
    pub fn set_busy_rounds(&self, rounds: usize) {
        self.state.lock().busy_rounds = rounds;
    }

    /// Leave each subsequent request in non-blocking mode unflushed for `rounds` flushes.
    pub fn set_flush_rounds(&self, rounds: usize) {
        self.state.lock().flush_rounds = rounds;
    }

    /// Pretend to be a different version of libpq, e.g. `110005`.
    pub fn set_lib_version(&self, version: c_int) {
        self.state.lock().lib_version = version;
    }

    pub fn set_server_version(&self, version: c_int) {
        self.state.lock().server_version = version;
    }
}

impl Debug for MockEngine {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockEngine")
            .field("live", &self.live())
            .field("calls", &self.total_calls())
            .finish()
    }
}
