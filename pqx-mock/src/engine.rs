use std::collections::VecDeque;
use std::ffi::{CStr, CString};
use std::os::raw::c_int;
use std::slice;

use pqx_core::{
    ConnInt, ConnStatus, ConnStr, Engine, ExecStatus, Oid, Ping, QueryParams, RawConninfoOption,
};

use crate::conn::{CopyState, MockConn, Prepared};
use crate::conninfo::{self, MockOptions};
use crate::result::{c_str, MockResult, ResultData};
use crate::state::{Fault, MockBuffer, State, SubmittedParams};
use crate::{bytea, server, MockEngine};

const NO_CONNECTION: &str = "no connection to the server\n";
const IN_PROGRESS: &str = "another command is already in progress\n";
const NO_COPY: &str = "no COPY in progress\n";

impl MockEngine {
    fn buffer(&self, state: &mut State, data: Vec<u8>) -> MockBuffer {
        MockBuffer::new(&self.state, &mut state.live, data)
    }

    fn result(state: &mut State, conn: &mut MockConn, data: ResultData) -> MockResult {
        if data.is_error() {
            conn.error = data.error_message.clone();
        }

        state.live.results += 1;
        MockResult::new(data)
    }

    fn open(&self, call: &'static str, conninfo: &CStr) -> Option<MockConn> {
        let mut state = self.enter(call);

        if state.take_fault(Fault::Alloc) {
            return None;
        }

        let pid = state.next_pid;
        state.next_pid += 1;
        state.live.conns += 1;

        Some(MockConn::new(conninfo, pid))
    }

    /// Run a blocking request, returning its last result.
    fn exec_with(
        &self,
        call: &'static str,
        conn: &mut MockConn,
        run: impl FnOnce(&mut State, &mut MockConn) -> Vec<ResultData>,
    ) -> Option<MockResult> {
        let mut state = self.enter(call);

        if state.take_fault(Fault::Alloc) {
            conn.fail(Fault::Alloc.message());
            return None;
        }
        if !ready(conn) {
            return None;
        }

        conn.error = CString::default();
        let last = run(&mut *state, conn).pop()?;

        Some(Self::result(&mut *state, conn, last))
    }

    /// Submit a request, queueing its results for `get_result`.
    fn send_with(
        &self,
        call: &'static str,
        conn: &mut MockConn,
        run: impl FnOnce(&mut State, &mut MockConn) -> Vec<ResultData>,
    ) -> c_int {
        let mut state = self.enter(call);

        if state.take_fault(Fault::Send) {
            conn.fail(Fault::Send.message());
            return 0;
        }
        if !ready(conn) {
            return 0;
        }

        conn.error = CString::default();
        let results = run(&mut *state, conn);
        conn.pending.extend(results);

        conn.busy = state.busy_rounds;
        if conn.nonblocking {
            conn.unflushed = state.flush_rounds;
        }

        1
    }
}

fn ready(conn: &mut MockConn) -> bool {
    if conn.status != ConnStatus::Ok {
        conn.fail(NO_CONNECTION);
        return false;
    }

    if !conn.pending.is_empty() || !matches!(conn.copy, CopyState::None) {
        conn.fail(IN_PROGRESS);
        return false;
    }

    true
}

/// Run every statement of a query string, stopping at the first error or `COPY`.
fn run_statements(state: &mut State, conn: &mut MockConn, command: &[u8]) -> Vec<ResultData> {
    let mut results = Vec::new();

    for statement in server::statements(command) {
        let result = server::execute(state, conn, statement);
        let stop =
            result.is_error() || matches!(result.status, ExecStatus::CopyIn | ExecStatus::CopyOut);

        results.push(result);

        if stop {
            break;
        }
    }

    results
}

/// Read the parameters back out of the native arrays, as libpq does.
fn submitted(params: &QueryParams<'_>) -> SubmittedParams {
    let pointers = params.values_ptr();
    let lengths = params.lengths();
    let formats = params.formats();

    let values = (0..params.len())
        .map(|index| {
            // SAFETY: `values_ptr` points to `len()` entries that live as long as `params`
            let pointer = unsafe { *pointers.add(index) };

            if pointer.is_null() {
                return None;
            }

            let binary = formats.and_then(|formats| formats.get(index)) == Some(&1);

            let value = if binary {
                let len = usize::try_from(lengths[index]).unwrap_or_default();

                // SAFETY: binary values are `lengths[index]` bytes long
                unsafe { slice::from_raw_parts(pointer.cast::<u8>(), len) }
            } else {
                // SAFETY: text values are terminated
                unsafe { CStr::from_ptr(pointer) }.to_bytes()
            };

            Some(value.to_vec())
        })
        .collect();

    SubmittedParams {
        values,
        types: params.types().map(<[Oid]>::to_vec),
        formats: formats.map(<[c_int]>::to_vec),
        result_format: params.result_format().to_native(),
    }
}

/// The highest `$n` placeholder in a command.
fn placeholders(command: &[u8]) -> usize {
    let mut max = 0;

    for (index, _) in command.iter().enumerate().filter(|(_, &b)| b == b'$') {
        let digits: String = command[index + 1..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .map(|&b| char::from(b))
            .collect();

        if let Ok(n) = digits.parse::<usize>() {
            max = max.max(n);
        }
    }

    max
}

fn prepare(state: &mut State, conn: &mut MockConn, name: &CStr, command: &CStr, types: &[Oid]) -> ResultData {
    let display = name.to_string_lossy();

    if !name.is_empty() && conn.prepared.contains_key(name) {
        return ResultData::error(
            "42P05",
            &format!("prepared statement \"{display}\" already exists"),
        );
    }

    let command = command.to_bytes().to_vec();
    let nparams = types.len().max(placeholders(&command));

    // parameters left unspecified are inferred as `text`
    let types = (0..nparams)
        .map(|index| types.get(index).copied().filter(|&oid| oid != 0).unwrap_or(25))
        .collect();

    state.queries.push(command.clone());
    conn.prepared.insert(name.to_owned(), Prepared { command, types });

    ResultData::command_ok("")
}

fn exec_prepared(
    state: &mut State,
    conn: &mut MockConn,
    name: &CStr,
    params: &QueryParams<'_>,
) -> ResultData {
    let display = name.to_string_lossy();

    let Some(prepared) = conn.prepared.get(name).cloned() else {
        return ResultData::error(
            "26000",
            &format!("prepared statement \"{display}\" does not exist"),
        );
    };

    if prepared.types.len() != params.len() {
        return ResultData::error(
            "08P01",
            &format!(
                "bind message supplies {} parameters, but prepared statement \"{display}\" requires {}",
                params.len(),
                prepared.types.len()
            ),
        );
    }

    state.params.push(submitted(params));
    server::execute(state, conn, &prepared.command)
}

fn describe_prepared(conn: &MockConn, name: &CStr) -> ResultData {
    match conn.prepared.get(name) {
        Some(prepared) => ResultData::command_ok("").with_params(&prepared.types),
        None => ResultData::error(
            "26000",
            &format!("prepared statement \"{}\" does not exist", name.to_string_lossy()),
        ),
    }
}

fn describe_portal(name: &CStr) -> ResultData {
    ResultData::error(
        "34000",
        &format!("portal \"{}\" does not exist", name.to_string_lossy()),
    )
}

impl Engine for MockEngine {
    type Conn = MockConn;
    type Result = MockResult;
    type Options = MockOptions;
    type Buffer = MockBuffer;

    fn lib_version(&self) -> c_int {
        self.enter("lib_version").lib_version
    }

    fn connectdb(&self, conninfo: &CStr) -> Option<MockConn> {
        let mut conn = self.open("connectdb", conninfo)?;
        conn.establish();
        Some(conn)
    }

    fn connect_start(&self, conninfo: &CStr) -> Option<MockConn> {
        self.open("connect_start", conninfo)
    }

    fn connect_poll(&self, conn: &mut MockConn) -> c_int {
        self.enter("connect_poll");
        conn.poll().to_native()
    }

    fn finish(&self, conn: MockConn) {
        let mut state = self.enter("finish");
        state.live.conns = state.live.conns.saturating_sub(1);
        drop(conn);
    }

    fn reset(&self, conn: &mut MockConn) {
        self.enter("reset");
        conn.script_polls();
        conn.establish();
    }

    fn reset_start(&self, conn: &mut MockConn) -> c_int {
        let mut state = self.enter("reset_start");

        if state.take_fault(Fault::ResetStart) {
            conn.fail(Fault::ResetStart.message());
            return 0;
        }

        conn.script_polls();
        1
    }

    fn reset_poll(&self, conn: &mut MockConn) -> c_int {
        self.enter("reset_poll");
        conn.poll().to_native()
    }

    fn ping(&self, conninfo: &CStr) -> c_int {
        self.enter("ping");

        match conninfo::parse(&conninfo.to_string_lossy()) {
            Err(_) => Ping::NoAttempt.to_native(),
            Ok(params) if params.get("host").is_some_and(|host| host.ends_with(".invalid")) => {
                Ping::NoResponse.to_native()
            }
            Ok(_) => Ping::Ok.to_native(),
        }
    }

    fn status(&self, conn: &MockConn) -> c_int {
        self.enter("status");
        conn.status.to_native()
    }

    fn transaction_status(&self, conn: &MockConn) -> c_int {
        self.enter("transaction_status");
        conn.transaction_status().to_native()
    }

    fn conn_str<'c>(&self, conn: &'c MockConn, attr: ConnStr) -> Option<&'c CStr> {
        self.enter("conn_str");
        Some(conn.attr(attr))
    }

    fn conn_int(&self, conn: &MockConn, attr: ConnInt) -> c_int {
        let state = self.enter("conn_int");
        conn.int(attr, state.server_version)
    }

    fn parameter_status<'c>(&self, conn: &'c MockConn, name: &CStr) -> Option<&'c CStr> {
        self.enter("parameter_status");
        conn.parameter(name)
    }

    fn error_message<'c>(&self, conn: &'c MockConn) -> Option<&'c CStr> {
        self.enter("error_message");
        Some(&conn.error)
    }

    fn conninfo(&self, conn: &MockConn) -> Option<MockOptions> {
        let mut state = self.enter("conninfo");

        if state.take_fault(Fault::Alloc) {
            return None;
        }

        state.live.options += 1;
        Some(MockOptions::new(|keyword, compiled| {
            conn.params
                .get(keyword)
                .or(compiled)
                .map(str::to_owned)
        }))
    }

    fn exec(&self, conn: &mut MockConn, command: &CStr) -> Option<MockResult> {
        self.exec_with("exec", conn, |state, conn| {
            run_statements(state, conn, command.to_bytes())
        })
    }

    fn exec_params(
        &self,
        conn: &mut MockConn,
        command: &CStr,
        params: &QueryParams<'_>,
    ) -> Option<MockResult> {
        self.exec_with("exec_params", conn, |state, conn| {
            state.params.push(submitted(params));
            vec![server::execute(state, conn, command.to_bytes())]
        })
    }

    fn prepare(
        &self,
        conn: &mut MockConn,
        name: &CStr,
        command: &CStr,
        param_types: &[Oid],
    ) -> Option<MockResult> {
        self.exec_with("prepare", conn, |state, conn| {
            vec![prepare(state, conn, name, command, param_types)]
        })
    }

    fn exec_prepared(
        &self,
        conn: &mut MockConn,
        name: &CStr,
        params: &QueryParams<'_>,
    ) -> Option<MockResult> {
        self.exec_with("exec_prepared", conn, |state, conn| {
            vec![exec_prepared(state, conn, name, params)]
        })
    }

    fn describe_prepared(&self, conn: &mut MockConn, name: &CStr) -> Option<MockResult> {
        self.exec_with("describe_prepared", conn, |_, conn| {
            vec![describe_prepared(conn, name)]
        })
    }

    fn describe_portal(&self, conn: &mut MockConn, name: &CStr) -> Option<MockResult> {
        self.exec_with("describe_portal", conn, |_, _| vec![describe_portal(name)])
    }

    fn make_empty_result(&self, conn: &mut MockConn, status: c_int) -> Option<MockResult> {
        let mut state = self.enter("make_empty_result");

        if state.take_fault(Fault::Alloc) {
            return None;
        }

        let status = ExecStatus::from_native(status).ok()?;
        let mut data = ResultData::new(status);

        if status.is_error() {
            data.error_message = conn.error.clone();
        }

        state.live.results += 1;
        Some(MockResult::new(data))
    }

    fn send_query(&self, conn: &mut MockConn, command: &CStr) -> c_int {
        self.send_with("send_query", conn, |state, conn| {
            run_statements(state, conn, command.to_bytes())
        })
    }

    fn send_query_params(
        &self,
        conn: &mut MockConn,
        command: &CStr,
        params: &QueryParams<'_>,
    ) -> c_int {
        self.send_with("send_query_params", conn, |state, conn| {
            state.params.push(submitted(params));
            vec![server::execute(state, conn, command.to_bytes())]
        })
    }

    fn send_prepare(
        &self,
        conn: &mut MockConn,
        name: &CStr,
        command: &CStr,
        param_types: &[Oid],
    ) -> c_int {
        self.send_with("send_prepare", conn, |state, conn| {
            vec![prepare(state, conn, name, command, param_types)]
        })
    }

    fn send_query_prepared(
        &self,
        conn: &mut MockConn,
        name: &CStr,
        params: &QueryParams<'_>,
    ) -> c_int {
        self.send_with("send_query_prepared", conn, |state, conn| {
            vec![exec_prepared(state, conn, name, params)]
        })
    }

    fn send_describe_prepared(&self, conn: &mut MockConn, name: &CStr) -> c_int {
        self.send_with("send_describe_prepared", conn, |_, conn| {
            vec![describe_prepared(conn, name)]
        })
    }

    fn send_describe_portal(&self, conn: &mut MockConn, name: &CStr) -> c_int {
        self.send_with("send_describe_portal", conn, |_, _| {
            vec![describe_portal(name)]
        })
    }

    fn get_result(&self, conn: &mut MockConn) -> Option<MockResult> {
        let mut state = self.enter("get_result");

        // a blocking wait for the server
        conn.busy = 0;

        let data = conn.pending.pop_front()?;
        Some(Self::result(&mut *state, conn, data))
    }

    fn consume_input(&self, conn: &mut MockConn) -> c_int {
        let mut state = self.enter("consume_input");

        if state.take_fault(Fault::ConsumeInput) {
            conn.fail(Fault::ConsumeInput.message());
            return 0;
        }
        if conn.status != ConnStatus::Ok {
            conn.fail(NO_CONNECTION);
            return 0;
        }

        conn.busy = conn.busy.saturating_sub(1);
        1
    }

    fn is_busy(&self, conn: &mut MockConn) -> c_int {
        self.enter("is_busy");
        c_int::from(conn.busy > 0)
    }

    fn set_nonblocking(&self, conn: &mut MockConn, arg: c_int) -> c_int {
        let mut state = self.enter("set_nonblocking");

        if state.take_fault(Fault::SetNonblocking) {
            conn.fail(Fault::SetNonblocking.message());
            return -1;
        }

        conn.nonblocking = arg != 0;
        0
    }

    fn is_nonblocking(&self, conn: &MockConn) -> c_int {
        self.enter("is_nonblocking");
        c_int::from(conn.nonblocking)
    }

    fn flush(&self, conn: &mut MockConn) -> c_int {
        let mut state = self.enter("flush");

        if state.take_fault(Fault::Flush) {
            conn.fail(Fault::Flush.message());
            return -1;
        }

        if conn.unflushed > 0 {
            conn.unflushed -= 1;
            1
        } else {
            0
        }
    }

    fn set_single_row_mode(&self, conn: &mut MockConn) -> c_int {
        self.enter("set_single_row_mode");

        if conn.pending.is_empty() {
            return 0;
        }

        conn.pending = conn
            .pending
            .drain(..)
            .flat_map(ResultData::into_single_rows)
            .collect::<VecDeque<_>>();

        1
    }

    fn put_copy_data(&self, conn: &mut MockConn, buffer: &[u8]) -> c_int {
        let mut state = self.enter("put_copy_data");

        if state.take_fault(Fault::PutCopy) {
            conn.fail(Fault::PutCopy.message());
            return -1;
        }

        let nonblocking = conn.nonblocking;

        let CopyState::In { data, .. } = &mut conn.copy else {
            conn.fail(NO_COPY);
            return -1;
        };

        if nonblocking && state.take_stall() {
            return 0;
        }

        data.extend_from_slice(buffer);
        state.copy_in.push(buffer.to_vec());

        1
    }

    fn put_copy_end(&self, conn: &mut MockConn, errormsg: Option<&CStr>) -> c_int {
        let mut state = self.enter("put_copy_end");

        if state.take_fault(Fault::PutCopy) {
            conn.fail(Fault::PutCopy.message());
            return -1;
        }
        if !matches!(conn.copy, CopyState::In { .. }) {
            conn.fail(NO_COPY);
            return -1;
        }
        if conn.nonblocking && state.take_stall() {
            return 0;
        }

        let error = errormsg.map(|error| error.to_string_lossy().into_owned());
        server::end_copy_in(&mut *state, conn, error.as_deref());

        1
    }

    fn get_copy_data(
        &self,
        conn: &mut MockConn,
        nonblocking: bool,
        buffer: &mut Option<MockBuffer>,
    ) -> c_int {
        let mut state = self.enter("get_copy_data");

        if state.take_fault(Fault::GetCopy) {
            conn.fail(Fault::GetCopy.message());
            return -2;
        }

        let CopyState::Out { rows, sent } = &mut conn.copy else {
            conn.fail(NO_COPY);
            return -2;
        };

        if nonblocking && state.take_stall() {
            return 0;
        }

        match rows.pop_front() {
            Some(row) => {
                *sent += 1;

                let len = c_int::try_from(row.len()).unwrap_or(c_int::MAX);
                *buffer = Some(self.buffer(&mut *state, row));
                len
            }
            None => {
                let tag = format!("COPY {sent}");

                conn.copy = CopyState::None;
                conn.pending.push_back(ResultData::command_ok(&tag));
                -1
            }
        }
    }

    fn clear(&self, res: MockResult) {
        let mut state = self.enter("clear");
        state.live.results = state.live.results.saturating_sub(1);
        drop(res);
    }

    fn result_status(&self, res: &MockResult) -> c_int {
        self.enter("result_status");
        res.status()
    }

    fn result_error_message<'r>(&self, res: &'r MockResult) -> Option<&'r CStr> {
        self.enter("result_error_message");
        Some(res.error_message())
    }

    fn result_error_field<'r>(&self, res: &'r MockResult, field: c_int) -> Option<&'r CStr> {
        self.enter("result_error_field");
        res.error_field(field)
    }

    fn ntuples(&self, res: &MockResult) -> c_int {
        self.enter("ntuples");
        res.ntuples()
    }

    fn nfields(&self, res: &MockResult) -> c_int {
        self.enter("nfields");
        res.nfields()
    }

    fn fname<'r>(&self, res: &'r MockResult, column: c_int) -> Option<&'r CStr> {
        self.enter("fname");
        res.column(column).map(|column| column.name.as_c_str())
    }

    fn ftable(&self, res: &MockResult, column: c_int) -> Oid {
        self.enter("ftable");
        res.column(column).map_or(0, |column| column.table)
    }

    fn ftablecol(&self, res: &MockResult, column: c_int) -> c_int {
        self.enter("ftablecol");
        res.column(column).map_or(0, |column| column.table_column)
    }

    fn fformat(&self, res: &MockResult, column: c_int) -> c_int {
        self.enter("fformat");
        res.column(column).map_or(0, |column| column.format.to_native())
    }

    fn ftype(&self, res: &MockResult, column: c_int) -> Oid {
        self.enter("ftype");
        res.column(column).map_or(0, |column| column.type_oid)
    }

    fn fmod(&self, res: &MockResult, column: c_int) -> c_int {
        self.enter("fmod");
        res.column(column).map_or(0, |column| column.modifier)
    }

    fn fsize(&self, res: &MockResult, column: c_int) -> c_int {
        self.enter("fsize");
        res.column(column).map_or(0, |column| column.size)
    }

    fn binary_tuples(&self, res: &MockResult) -> c_int {
        self.enter("binary_tuples");
        res.binary_tuples()
    }

    fn get_value<'r>(&self, res: &'r MockResult, row: c_int, column: c_int) -> Option<&'r [u8]> {
        self.enter("get_value");
        res.value(row, column)
    }

    fn nparams(&self, res: &MockResult) -> c_int {
        self.enter("nparams");
        res.nparams()
    }

    fn param_type(&self, res: &MockResult, param: c_int) -> Oid {
        self.enter("param_type");
        res.param_type(param)
    }

    fn cmd_status<'r>(&self, res: &'r MockResult) -> Option<&'r CStr> {
        self.enter("cmd_status");
        Some(res.cmd_status())
    }

    fn cmd_tuples<'r>(&self, res: &'r MockResult) -> Option<&'r CStr> {
        self.enter("cmd_tuples");
        Some(res.cmd_tuples())
    }

    fn oid_value(&self, res: &MockResult) -> Oid {
        self.enter("oid_value");
        res.oid()
    }

    fn conndefaults(&self) -> Option<MockOptions> {
        let mut state = self.enter("conndefaults");

        if state.take_fault(Fault::Alloc) {
            return None;
        }

        state.live.options += 1;
        Some(MockOptions::new(|_, compiled| compiled.map(str::to_owned)))
    }

    fn conninfo_parse(
        &self,
        conninfo: &CStr,
        errmsg: &mut Option<MockBuffer>,
    ) -> Option<MockOptions> {
        let mut state = self.enter("conninfo_parse");

        if state.take_fault(Fault::Alloc) {
            return None;
        }

        match conninfo::parse(&conninfo.to_string_lossy()) {
            Ok(params) => {
                state.live.options += 1;
                Some(MockOptions::new(|keyword, _| params.get(keyword).map(str::to_owned)))
            }
            Err(message) => {
                let message = c_str(message).into_bytes_with_nul();
                *errmsg = Some(self.buffer(&mut *state, message));
                None
            }
        }
    }

    fn conninfo_option<'o>(
        &self,
        options: &'o MockOptions,
        index: usize,
    ) -> Option<RawConninfoOption<'o>> {
        self.enter("conninfo_option");
        options.get(index)
    }

    fn conninfo_free(&self, options: MockOptions) {
        let mut state = self.enter("conninfo_free");
        state.live.options = state.live.options.saturating_sub(1);
        drop(options);
    }

    fn escape_bytea(&self, data: &[u8]) -> Option<MockBuffer> {
        let mut state = self.enter("escape_bytea");

        if state.take_fault(Fault::Alloc) {
            return None;
        }

        Some(self.buffer(&mut *state, bytea::escape(data)))
    }

    fn escape_bytea_conn(&self, conn: &mut MockConn, data: &[u8]) -> Option<MockBuffer> {
        let mut state = self.enter("escape_bytea_conn");

        if state.take_fault(Fault::Alloc) {
            conn.fail(Fault::Alloc.message());
            return None;
        }

        Some(self.buffer(&mut *state, bytea::escape_hex(data)))
    }

    fn unescape_bytea(&self, data: &CStr) -> Option<MockBuffer> {
        let mut state = self.enter("unescape_bytea");

        if state.take_fault(Fault::Alloc) {
            return None;
        }

        Some(self.buffer(&mut *state, bytea::unescape(data.to_bytes())))
    }
}
