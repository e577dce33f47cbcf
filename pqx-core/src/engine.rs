//! The seam between pqx and the native client engine.
//!
//! [`Engine`] lists the native entry points the binding layer calls. Implementations are thin:
//! they return the engine's raw signals (a `None` for a null pointer, plain integers for
//! statuses and counts) and never interpret them. Classifying those signals into
//! [`Error`][crate::Error]s is the job of the handles in this crate, which is what lets a test
//! double stand in for libpq.

use std::ffi::CStr;
use std::os::raw::c_int;

use crate::params::QueryParams;

/// PostgreSQL object identifier.
pub type Oid = u32;

/// Byte-string attributes of a connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnStr {
    Db,
    User,
    Password,
    Host,
    /// Only available with libpq 12 or later.
    HostAddr,
    Port,
    Tty,
    Options,
}

/// Integer and flag attributes of a connection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ConnInt {
    ProtocolVersion,
    ServerVersion,
    Socket,
    BackendPid,
    NeedsPassword,
    UsedPassword,
    SslInUse,
}

/// One entry of a native connection option array, borrowed from the array.
#[derive(Debug, Copy, Clone, Default)]
pub struct RawConninfoOption<'o> {
    pub keyword: Option<&'o CStr>,
    pub envvar: Option<&'o CStr>,
    pub compiled: Option<&'o CStr>,
    pub val: Option<&'o CStr>,
    pub label: Option<&'o CStr>,
    pub dispchar: Option<&'o CStr>,
    pub dispsize: c_int,
}

/// A native, non-blocking PostgreSQL client engine.
///
/// Resources are owned by value. Releasing one ([`finish`][Engine::finish],
/// [`clear`][Engine::clear], [`conninfo_free`][Engine::conninfo_free]) consumes it, and a
/// [`Buffer`][Engine::Buffer] releases its memory when dropped.
///
/// Calls that may change the state of a connection, including its error message, take the
/// connection by `&mut`. Strings returned by reads borrow from the resource they were read from.
pub trait Engine: Clone + Send + Sync + 'static {
    /// A connection (`PGconn *`), never null.
    type Conn: Send;

    /// A result (`PGresult *`), never null.
    type Result: Send + Sync;

    /// An array of connection options (`PQconninfoOption *`).
    type Options: Send;

    /// Memory allocated by the engine, as reported by the engine (including any terminator).
    type Buffer: AsRef<[u8]> + Send;

    /// The version of the engine, in the `PQlibVersion` format (`160002` for 16.2).
    ///
    /// The linked library cannot change while the process runs, so callers may cache this.
    fn lib_version(&self) -> c_int;

    // connection lifecycle

    fn connectdb(&self, conninfo: &CStr) -> Option<Self::Conn>;

    fn connect_start(&self, conninfo: &CStr) -> Option<Self::Conn>;

    fn connect_poll(&self, conn: &mut Self::Conn) -> c_int;

    fn finish(&self, conn: Self::Conn);

    fn reset(&self, conn: &mut Self::Conn);

    fn reset_start(&self, conn: &mut Self::Conn) -> c_int;

    fn reset_poll(&self, conn: &mut Self::Conn) -> c_int;

    fn ping(&self, conninfo: &CStr) -> c_int;

    // connection status

    fn status(&self, conn: &Self::Conn) -> c_int;

    fn transaction_status(&self, conn: &Self::Conn) -> c_int;

    fn conn_str<'c>(&self, conn: &'c Self::Conn, attr: ConnStr) -> Option<&'c CStr>;

    fn conn_int(&self, conn: &Self::Conn, attr: ConnInt) -> c_int;

    fn parameter_status<'c>(&self, conn: &'c Self::Conn, name: &CStr) -> Option<&'c CStr>;

    fn error_message<'c>(&self, conn: &'c Self::Conn) -> Option<&'c CStr>;

    fn conninfo(&self, conn: &Self::Conn) -> Option<Self::Options>;

    // command execution

    fn exec(&self, conn: &mut Self::Conn, command: &CStr) -> Option<Self::Result>;

    fn exec_params(
        &self,
        conn: &mut Self::Conn,
        command: &CStr,
        params: &QueryParams<'_>,
    ) -> Option<Self::Result>;

    fn prepare(
        &self,
        conn: &mut Self::Conn,
        name: &CStr,
        command: &CStr,
        param_types: &[Oid],
    ) -> Option<Self::Result>;

    fn exec_prepared(
        &self,
        conn: &mut Self::Conn,
        name: &CStr,
        params: &QueryParams<'_>,
    ) -> Option<Self::Result>;

    fn describe_prepared(&self, conn: &mut Self::Conn, name: &CStr) -> Option<Self::Result>;

    fn describe_portal(&self, conn: &mut Self::Conn, name: &CStr) -> Option<Self::Result>;

    fn make_empty_result(&self, conn: &mut Self::Conn, status: c_int) -> Option<Self::Result>;

    // asynchronous command processing

    fn send_query(&self, conn: &mut Self::Conn, command: &CStr) -> c_int;

    fn send_query_params(
        &self,
        conn: &mut Self::Conn,
        command: &CStr,
        params: &QueryParams<'_>,
    ) -> c_int;

    fn send_prepare(
        &self,
        conn: &mut Self::Conn,
        name: &CStr,
        command: &CStr,
        param_types: &[Oid],
    ) -> c_int;

    fn send_query_prepared(
        &self,
        conn: &mut Self::Conn,
        name: &CStr,
        params: &QueryParams<'_>,
    ) -> c_int;

    fn send_describe_prepared(&self, conn: &mut Self::Conn, name: &CStr) -> c_int;

    fn send_describe_portal(&self, conn: &mut Self::Conn, name: &CStr) -> c_int;

    fn get_result(&self, conn: &mut Self::Conn) -> Option<Self::Result>;

    fn consume_input(&self, conn: &mut Self::Conn) -> c_int;

    fn is_busy(&self, conn: &mut Self::Conn) -> c_int;

    fn set_nonblocking(&self, conn: &mut Self::Conn, arg: c_int) -> c_int;

    fn is_nonblocking(&self, conn: &Self::Conn) -> c_int;

    fn flush(&self, conn: &mut Self::Conn) -> c_int;

    fn set_single_row_mode(&self, conn: &mut Self::Conn) -> c_int;

    // COPY

    fn put_copy_data(&self, conn: &mut Self::Conn, buffer: &[u8]) -> c_int;

    fn put_copy_end(&self, conn: &mut Self::Conn, errormsg: Option<&CStr>) -> c_int;

    /// Receive a row of `COPY` data into `buffer`, returning its length or `0`/`-1`/`-2`.
    fn get_copy_data(
        &self,
        conn: &mut Self::Conn,
        nonblocking: bool,
        buffer: &mut Option<Self::Buffer>,
    ) -> c_int;

    // results

    fn clear(&self, res: Self::Result);

    fn result_status(&self, res: &Self::Result) -> c_int;

    fn result_error_message<'r>(&self, res: &'r Self::Result) -> Option<&'r CStr>;

    fn result_error_field<'r>(&self, res: &'r Self::Result, field: c_int) -> Option<&'r CStr>;

    fn ntuples(&self, res: &Self::Result) -> c_int;

    fn nfields(&self, res: &Self::Result) -> c_int;

    fn fname<'r>(&self, res: &'r Self::Result, column: c_int) -> Option<&'r CStr>;

    fn ftable(&self, res: &Self::Result, column: c_int) -> Oid;

    fn ftablecol(&self, res: &Self::Result, column: c_int) -> c_int;

    fn fformat(&self, res: &Self::Result, column: c_int) -> c_int;

    fn ftype(&self, res: &Self::Result, column: c_int) -> Oid;

    fn fmod(&self, res: &Self::Result, column: c_int) -> c_int;

    fn fsize(&self, res: &Self::Result, column: c_int) -> c_int;

    fn binary_tuples(&self, res: &Self::Result) -> c_int;

    /// The bytes of one cell, or `None` when the cell is SQL `NULL` (or out of range).
    fn get_value<'r>(&self, res: &'r Self::Result, row: c_int, column: c_int)
        -> Option<&'r [u8]>;

    fn nparams(&self, res: &Self::Result) -> c_int;

    fn param_type(&self, res: &Self::Result, param: c_int) -> Oid;

    fn cmd_status<'r>(&self, res: &'r Self::Result) -> Option<&'r CStr>;

    fn cmd_tuples<'r>(&self, res: &'r Self::Result) -> Option<&'r CStr>;

    fn oid_value(&self, res: &Self::Result) -> Oid;

    // connection options

    fn conndefaults(&self) -> Option<Self::Options>;

    /// Parse `conninfo`; on failure `errmsg` may receive the engine's diagnostic.
    fn conninfo_parse(
        &self,
        conninfo: &CStr,
        errmsg: &mut Option<Self::Buffer>,
    ) -> Option<Self::Options>;

    /// The option at `index`, or `None` past the end of the array.
    fn conninfo_option<'o>(
        &self,
        options: &'o Self::Options,
        index: usize,
    ) -> Option<RawConninfoOption<'o>>;

    fn conninfo_free(&self, options: Self::Options);

    // escaping

    fn escape_bytea(&self, data: &[u8]) -> Option<Self::Buffer>;

    fn escape_bytea_conn(&self, conn: &mut Self::Conn, data: &[u8]) -> Option<Self::Buffer>;

    fn unescape_bytea(&self, data: &CStr) -> Option<Self::Buffer>;
}
