use std::collections::{HashMap, HashSet, VecDeque};
use std::os::raw::c_int;
use std::sync::Arc;

use parking_lot::Mutex;
use pqx_core::Oid;

use crate::result::ResultData;

/// Native resources currently allocated and not yet released.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct Live {
    pub conns: usize,
    pub results: usize,
    pub options: usize,
    pub buffers: usize,
}

impl Live {
    /// Returns `true` if nothing is allocated.
    pub fn is_empty(&self) -> bool {
        *self == Live::default()
    }
}

/// A failure the engine reports for the next matching call.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Fault {
    /// The next allocating call returns null.
    Alloc,
    /// The next `send_*` call fails.
    Send,
    ConsumeInput,
    Flush,
    SetNonblocking,
    ResetStart,
    /// The next `put_copy_data` or `put_copy_end` fails.
    PutCopy,
    GetCopy,
}

impl Fault {
    pub(crate) fn message(self) -> &'static str {
        match self {
            Fault::Alloc => "out of memory\n",
            Fault::Send | Fault::PutCopy | Fault::Flush => {
                "server closed the connection unexpectedly\n"
            }
            Fault::ConsumeInput | Fault::GetCopy => "could not receive data from server\n",
            Fault::SetNonblocking => "could not change nonblocking mode\n",
            Fault::ResetStart => "could not start reset\n",
        }
    }
}

/// Parameters as the engine read them from the native arrays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedParams {
    pub values: Vec<Option<Vec<u8>>>,
    pub types: Option<Vec<Oid>>,
    pub formats: Option<Vec<c_int>>,
    pub result_format: c_int,
}

pub(crate) type Shared = Arc<Mutex<State>>;

pub(crate) struct State {
    pub(crate) calls: HashMap<&'static str, usize>,
    pub(crate) live: Live,
    pub(crate) faults: HashSet<Fault>,
    pub(crate) responses: VecDeque<ResultData>,
    pub(crate) copy_out: Vec<Vec<u8>>,
    pub(crate) copy_in: Vec<Vec<u8>>,
    pub(crate) keys: HashMap<String, HashSet<Vec<u8>>>,
    pub(crate) queries: Vec<Vec<u8>>,
    pub(crate) params: Vec<SubmittedParams>,
    pub(crate) stalls: usize,
    pub(crate) busy_rounds: usize,
    pub(crate) flush_rounds: usize,
    pub(crate) lib_version: c_int,
    pub(crate) server_version: c_int,
    pub(crate) next_pid: c_int,
}

impl Default for State {
    fn default() -> Self {
        Self {
            calls: HashMap::new(),
            live: Live::default(),
            faults: HashSet::new(),
            responses: VecDeque::new(),
            copy_out: Vec::new(),
            copy_in: Vec::new(),
            keys: HashMap::new(),
            queries: Vec::new(),
            params: Vec::new(),
            stalls: 0,
            busy_rounds: 0,
            flush_rounds: 0,
            lib_version: 160002,
            server_version: 160002,
            next_pid: 4242,
        }
    }
}

impl State {
    /// Consume a pending fault.
    pub(crate) fn take_fault(&mut self, fault: Fault) -> bool {
        self.faults.remove(&fault)
    }

    /// Consume one would-block round, if any are left.
    pub(crate) fn take_stall(&mut self) -> bool {
        if self.stalls > 0 {
            self.stalls -= 1;
            true
        } else {
            false
        }
    }
}

/// Memory handed out by the mock engine; counted as live until dropped.
pub struct MockBuffer {
    data: Vec<u8>,
    state: Shared,
}

impl MockBuffer {
    pub(crate) fn new(state: &Shared, live: &mut Live, data: Vec<u8>) -> Self {
        live.buffers += 1;

        Self {
            data,
            state: Arc::clone(state),
        }
    }
}

impl AsRef<[u8]> for MockBuffer {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl Drop for MockBuffer {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.live.buffers = state.live.buffers.saturating_sub(1);
    }
}
