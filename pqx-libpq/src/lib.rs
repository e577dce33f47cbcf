//! The libpq engine for pqx.
//!
//! [`Libpq`] forwards every [`Engine`] call to the matching libpq function through `pq-sys`.
//! Nothing is interpreted here; null pointers become `None` and status codes are passed through
//! as plain integers.

use std::ffi::CStr;
use std::os::raw::{c_char, c_int};
use std::ptr;
use std::slice;
use std::sync::OnceLock;

use pq_sys::*;
use pqx_core::{ConnInt, ConnStr, Engine, ExecStatus, Oid, QueryParams, RawConninfoOption};

mod handle;

pub use handle::{ConnPtr, OptionsPtr, PqBuffer, ResultPtr};

/// The libpq client library, as linked by `pq-sys`.
#[derive(Debug, Default, Copy, Clone)]
pub struct Libpq;

/// Borrow a string owned by a libpq resource.
///
/// # Safety
/// `ptr` must be null or point to a terminated string that lives at least as long as `'a`.
unsafe fn borrowed<'a>(ptr: *const c_char) -> Option<&'a CStr> {
    if ptr.is_null() {
        None
    } else {
        // SAFETY: guaranteed by the caller
        Some(unsafe { CStr::from_ptr(ptr) })
    }
}

fn exec_status_type(status: c_int) -> Option<ExecStatusType> {
    use pq_sys::ExecStatusType::*;

    Some(match ExecStatus::from_native(status).ok()? {
        ExecStatus::EmptyQuery => PGRES_EMPTY_QUERY,
        ExecStatus::CommandOk => PGRES_COMMAND_OK,
        ExecStatus::TuplesOk => PGRES_TUPLES_OK,
        ExecStatus::CopyOut => PGRES_COPY_OUT,
        ExecStatus::CopyIn => PGRES_COPY_IN,
        ExecStatus::BadResponse => PGRES_BAD_RESPONSE,
        ExecStatus::NonfatalError => PGRES_NONFATAL_ERROR,
        ExecStatus::FatalError => PGRES_FATAL_ERROR,
        ExecStatus::CopyBoth => PGRES_COPY_BOTH,
        ExecStatus::SingleTuple => PGRES_SINGLE_TUPLE,
        ExecStatus::PipelineSync => PGRES_PIPELINE_SYNC,
        ExecStatus::PipelineAborted => PGRES_PIPELINE_ABORTED,
    })
}

impl Engine for Libpq {
    type Conn = ConnPtr;
    type Result = ResultPtr;
    type Options = OptionsPtr;
    type Buffer = PqBuffer;

    fn lib_version(&self) -> c_int {
        static LIB_VERSION: OnceLock<c_int> = OnceLock::new();

        // SAFETY: no preconditions
        *LIB_VERSION.get_or_init(|| unsafe { PQlibVersion() })
    }

    fn connectdb(&self, conninfo: &CStr) -> Option<ConnPtr> {
        // SAFETY: `conninfo` is terminated
        ConnPtr::new(unsafe { PQconnectdb(conninfo.as_ptr()) })
    }

    fn connect_start(&self, conninfo: &CStr) -> Option<ConnPtr> {
        // SAFETY: `conninfo` is terminated
        ConnPtr::new(unsafe { PQconnectStart(conninfo.as_ptr()) })
    }

    fn connect_poll(&self, conn: &mut ConnPtr) -> c_int {
        unsafe { PQconnectPoll(conn.as_ptr()) as c_int }
    }

    fn finish(&self, conn: ConnPtr) {
        conn.finish();
    }

    fn reset(&self, conn: &mut ConnPtr) {
        unsafe { PQreset(conn.as_ptr()) }
    }

    fn reset_start(&self, conn: &mut ConnPtr) -> c_int {
        unsafe { PQresetStart(conn.as_ptr()) }
    }

    fn reset_poll(&self, conn: &mut ConnPtr) -> c_int {
        unsafe { PQresetPoll(conn.as_ptr()) as c_int }
    }

    fn ping(&self, conninfo: &CStr) -> c_int {
        unsafe { PQping(conninfo.as_ptr()) as c_int }
    }

    fn status(&self, conn: &ConnPtr) -> c_int {
        unsafe { PQstatus(conn.as_ptr()) as c_int }
    }

    fn transaction_status(&self, conn: &ConnPtr) -> c_int {
        unsafe { PQtransactionStatus(conn.as_ptr()) as c_int }
    }

    fn conn_str<'c>(&self, conn: &'c ConnPtr, attr: ConnStr) -> Option<&'c CStr> {
        let conn = conn.as_ptr();

        // SAFETY: the strings live as long as the connection
        unsafe {
            borrowed(match attr {
                ConnStr::Db => PQdb(conn),
                ConnStr::User => PQuser(conn),
                ConnStr::Password => PQpass(conn),
                ConnStr::Host => PQhost(conn),
                ConnStr::HostAddr => PQhostaddr(conn),
                ConnStr::Port => PQport(conn),
                ConnStr::Tty => PQtty(conn),
                ConnStr::Options => PQoptions(conn),
            })
        }
    }

    fn conn_int(&self, conn: &ConnPtr, attr: ConnInt) -> c_int {
        let conn = conn.as_ptr();

        unsafe {
            match attr {
                ConnInt::ProtocolVersion => PQprotocolVersion(conn),
                ConnInt::ServerVersion => PQserverVersion(conn),
                ConnInt::Socket => PQsocket(conn),
                ConnInt::BackendPid => PQbackendPID(conn),
                ConnInt::NeedsPassword => PQconnectionNeedsPassword(conn),
                ConnInt::UsedPassword => PQconnectionUsedPassword(conn),
                ConnInt::SslInUse => PQsslInUse(conn),
            }
        }
    }

    fn parameter_status<'c>(&self, conn: &'c ConnPtr, name: &CStr) -> Option<&'c CStr> {
        // SAFETY: the value lives as long as the connection
        unsafe { borrowed(PQparameterStatus(conn.as_ptr(), name.as_ptr())) }
    }

    fn error_message<'c>(&self, conn: &'c ConnPtr) -> Option<&'c CStr> {
        // SAFETY: the message lives until the next call on the connection, which takes `&mut`
        unsafe { borrowed(PQerrorMessage(conn.as_ptr())) }
    }

    fn conninfo(&self, conn: &ConnPtr) -> Option<OptionsPtr> {
        OptionsPtr::new(unsafe { PQconninfo(conn.as_ptr()) })
    }

    fn exec(&self, conn: &mut ConnPtr, command: &CStr) -> Option<ResultPtr> {
        ResultPtr::new(unsafe { PQexec(conn.as_ptr(), command.as_ptr()) })
    }

    fn exec_params(
        &self,
        conn: &mut ConnPtr,
        command: &CStr,
        params: &QueryParams<'_>,
    ) -> Option<ResultPtr> {
        // SAFETY: the arrays are `nparams` long and live as long as `params`
        ResultPtr::new(unsafe {
            PQexecParams(
                conn.as_ptr(),
                command.as_ptr(),
                params.nparams(),
                params.types_ptr(),
                params.values_ptr(),
                params.lengths_ptr(),
                params.formats_ptr(),
                params.result_format().to_native(),
            )
        })
    }

    fn prepare(
        &self,
        conn: &mut ConnPtr,
        name: &CStr,
        command: &CStr,
        param_types: &[Oid],
    ) -> Option<ResultPtr> {
        let nparams = c_int::try_from(param_types.len()).ok()?;
        let types = if param_types.is_empty() {
            ptr::null()
        } else {
            param_types.as_ptr()
        };

        ResultPtr::new(unsafe {
            PQprepare(conn.as_ptr(), name.as_ptr(), command.as_ptr(), nparams, types)
        })
    }

    fn exec_prepared(
        &self,
        conn: &mut ConnPtr,
        name: &CStr,
        params: &QueryParams<'_>,
    ) -> Option<ResultPtr> {
        ResultPtr::new(unsafe {
            PQexecPrepared(
                conn.as_ptr(),
                name.as_ptr(),
                params.nparams(),
                params.values_ptr(),
                params.lengths_ptr(),
                params.formats_ptr(),
                params.result_format().to_native(),
            )
        })
    }

    fn describe_prepared(&self, conn: &mut ConnPtr, name: &CStr) -> Option<ResultPtr> {
        ResultPtr::new(unsafe { PQdescribePrepared(conn.as_ptr(), name.as_ptr()) })
    }

    fn describe_portal(&self, conn: &mut ConnPtr, name: &CStr) -> Option<ResultPtr> {
        ResultPtr::new(unsafe { PQdescribePortal(conn.as_ptr(), name.as_ptr()) })
    }

    fn make_empty_result(&self, conn: &mut ConnPtr, status: c_int) -> Option<ResultPtr> {
        let status = exec_status_type(status)?;
        ResultPtr::new(unsafe { PQmakeEmptyPGresult(conn.as_ptr(), status) })
    }

    fn send_query(&self, conn: &mut ConnPtr, command: &CStr) -> c_int {
        unsafe { PQsendQuery(conn.as_ptr(), command.as_ptr()) }
    }

    fn send_query_params(
        &self,
        conn: &mut ConnPtr,
        command: &CStr,
        params: &QueryParams<'_>,
    ) -> c_int {
        unsafe {
            PQsendQueryParams(
                conn.as_ptr(),
                command.as_ptr(),
                params.nparams(),
                params.types_ptr(),
                params.values_ptr(),
                params.lengths_ptr(),
                params.formats_ptr(),
                params.result_format().to_native(),
            )
        }
    }

    fn send_prepare(
        &self,
        conn: &mut ConnPtr,
        name: &CStr,
        command: &CStr,
        param_types: &[Oid],
    ) -> c_int {
        let Ok(nparams) = c_int::try_from(param_types.len()) else {
            return 0;
        };
        let types = if param_types.is_empty() {
            ptr::null()
        } else {
            param_types.as_ptr()
        };

        unsafe { PQsendPrepare(conn.as_ptr(), name.as_ptr(), command.as_ptr(), nparams, types) }
    }

    fn send_query_prepared(
        &self,
        conn: &mut ConnPtr,
        name: &CStr,
        params: &QueryParams<'_>,
    ) -> c_int {
        unsafe {
            PQsendQueryPrepared(
                conn.as_ptr(),
                name.as_ptr(),
                params.nparams(),
                params.values_ptr(),
                params.lengths_ptr(),
                params.formats_ptr(),
                params.result_format().to_native(),
            )
        }
    }

    fn send_describe_prepared(&self, conn: &mut ConnPtr, name: &CStr) -> c_int {
        unsafe { PQsendDescribePrepared(conn.as_ptr(), name.as_ptr()) }
    }

    fn send_describe_portal(&self, conn: &mut ConnPtr, name: &CStr) -> c_int {
        unsafe { PQsendDescribePortal(conn.as_ptr(), name.as_ptr()) }
    }

    fn get_result(&self, conn: &mut ConnPtr) -> Option<ResultPtr> {
        ResultPtr::new(unsafe { PQgetResult(conn.as_ptr()) })
    }

    fn consume_input(&self, conn: &mut ConnPtr) -> c_int {
        unsafe { PQconsumeInput(conn.as_ptr()) }
    }

    fn is_busy(&self, conn: &mut ConnPtr) -> c_int {
        unsafe { PQisBusy(conn.as_ptr()) }
    }

    fn set_nonblocking(&self, conn: &mut ConnPtr, arg: c_int) -> c_int {
        unsafe { PQsetnonblocking(conn.as_ptr(), arg) }
    }

    fn is_nonblocking(&self, conn: &ConnPtr) -> c_int {
        unsafe { PQisnonblocking(conn.as_ptr()) }
    }

    fn flush(&self, conn: &mut ConnPtr) -> c_int {
        unsafe { PQflush(conn.as_ptr()) }
    }

    fn set_single_row_mode(&self, conn: &mut ConnPtr) -> c_int {
        unsafe { PQsetSingleRowMode(conn.as_ptr()) }
    }

    fn put_copy_data(&self, conn: &mut ConnPtr, buffer: &[u8]) -> c_int {
        let Ok(len) = c_int::try_from(buffer.len()) else {
            return -1;
        };

        unsafe { PQputCopyData(conn.as_ptr(), buffer.as_ptr().cast::<c_char>(), len) }
    }

    fn put_copy_end(&self, conn: &mut ConnPtr, errormsg: Option<&CStr>) -> c_int {
        let errormsg = errormsg.map_or(ptr::null(), CStr::as_ptr);
        unsafe { PQputCopyEnd(conn.as_ptr(), errormsg) }
    }

    fn get_copy_data(
        &self,
        conn: &mut ConnPtr,
        nonblocking: bool,
        buffer: &mut Option<PqBuffer>,
    ) -> c_int {
        let mut data: *mut c_char = ptr::null_mut();

        let n = unsafe { PQgetCopyData(conn.as_ptr(), &mut data, c_int::from(nonblocking)) };

        // libpq only allocates a buffer for a row of data
        if let Ok(len) = usize::try_from(n) {
            // SAFETY: the row is `n` bytes long
            *buffer = unsafe { PqBuffer::new(data.cast::<u8>(), len) };
        }

        n
    }

    fn clear(&self, res: ResultPtr) {
        res.clear();
    }

    fn result_status(&self, res: &ResultPtr) -> c_int {
        unsafe { PQresultStatus(res.as_ptr()) as c_int }
    }

    fn result_error_message<'r>(&self, res: &'r ResultPtr) -> Option<&'r CStr> {
        // SAFETY: the strings of a result live as long as the result
        unsafe { borrowed(PQresultErrorMessage(res.as_ptr())) }
    }

    fn result_error_field<'r>(&self, res: &'r ResultPtr, field: c_int) -> Option<&'r CStr> {
        unsafe { borrowed(PQresultErrorField(res.as_ptr(), field)) }
    }

    fn ntuples(&self, res: &ResultPtr) -> c_int {
        unsafe { PQntuples(res.as_ptr()) }
    }

    fn nfields(&self, res: &ResultPtr) -> c_int {
        unsafe { PQnfields(res.as_ptr()) }
    }

    fn fname<'r>(&self, res: &'r ResultPtr, column: c_int) -> Option<&'r CStr> {
        unsafe { borrowed(PQfname(res.as_ptr(), column)) }
    }

    fn ftable(&self, res: &ResultPtr, column: c_int) -> Oid {
        unsafe { PQftable(res.as_ptr(), column) }
    }

    fn ftablecol(&self, res: &ResultPtr, column: c_int) -> c_int {
        unsafe { PQftablecol(res.as_ptr(), column) }
    }

    fn fformat(&self, res: &ResultPtr, column: c_int) -> c_int {
        unsafe { PQfformat(res.as_ptr(), column) }
    }

    fn ftype(&self, res: &ResultPtr, column: c_int) -> Oid {
        unsafe { PQftype(res.as_ptr(), column) }
    }

    fn fmod(&self, res: &ResultPtr, column: c_int) -> c_int {
        unsafe { PQfmod(res.as_ptr(), column) }
    }

    fn fsize(&self, res: &ResultPtr, column: c_int) -> c_int {
        unsafe { PQfsize(res.as_ptr(), column) }
    }

    fn binary_tuples(&self, res: &ResultPtr) -> c_int {
        unsafe { PQbinaryTuples(res.as_ptr()) }
    }

    fn get_value<'r>(&self, res: &'r ResultPtr, row: c_int, column: c_int) -> Option<&'r [u8]> {
        let res = res.as_ptr();

        // `PQgetisnull` also reports cells out of range as null
        if unsafe { PQgetisnull(res, row, column) } != 0 {
            return None;
        }

        let value = unsafe { PQgetvalue(res, row, column) };
        let len = usize::try_from(unsafe { PQgetlength(res, row, column) }).ok()?;

        if value.is_null() {
            return None;
        }

        // SAFETY: the cell is `len` bytes long and lives as long as the result
        Some(unsafe { slice::from_raw_parts(value.cast::<u8>(), len) })
    }

    fn nparams(&self, res: &ResultPtr) -> c_int {
        unsafe { PQnparams(res.as_ptr()) }
    }

    fn param_type(&self, res: &ResultPtr, param: c_int) -> Oid {
        unsafe { PQparamtype(res.as_ptr(), param) }
    }

    fn cmd_status<'r>(&self, res: &'r ResultPtr) -> Option<&'r CStr> {
        unsafe { borrowed(PQcmdStatus(res.as_ptr())) }
    }

    fn cmd_tuples<'r>(&self, res: &'r ResultPtr) -> Option<&'r CStr> {
        unsafe { borrowed(PQcmdTuples(res.as_ptr())) }
    }

    fn oid_value(&self, res: &ResultPtr) -> Oid {
        unsafe { PQoidValue(res.as_ptr()) }
    }

    fn conndefaults(&self) -> Option<OptionsPtr> {
        OptionsPtr::new(unsafe { PQconndefaults() })
    }

    fn conninfo_parse(
        &self,
        conninfo: &CStr,
        errmsg: &mut Option<PqBuffer>,
    ) -> Option<OptionsPtr> {
        let mut error: *mut c_char = ptr::null_mut();

        let options = unsafe { PQconninfoParse(conninfo.as_ptr(), &mut error) };

        // SAFETY: libpq allocates the message, if any
        *errmsg = unsafe { PqBuffer::from_c_str(error) };

        OptionsPtr::new(options)
    }

    fn conninfo_option<'o>(
        &self,
        options: &'o OptionsPtr,
        index: usize,
    ) -> Option<RawConninfoOption<'o>> {
        let option = options.get(index)?;

        // SAFETY: the strings live as long as the array
        unsafe {
            Some(RawConninfoOption {
                keyword: borrowed(option.keyword),
                envvar: borrowed(option.envvar),
                compiled: borrowed(option.compiled),
                val: borrowed(option.val),
                label: borrowed(option.label),
                dispchar: borrowed(option.dispchar),
                dispsize: option.dispsize,
            })
        }
    }

    fn conninfo_free(&self, options: OptionsPtr) {
        options.free();
    }

    fn escape_bytea(&self, data: &[u8]) -> Option<PqBuffer> {
        let mut len = 0;

        let escaped = unsafe { PQescapeBytea(data.as_ptr(), data.len(), &mut len) };

        // SAFETY: `len` counts the terminator
        unsafe { PqBuffer::new(escaped, len) }
    }

    fn escape_bytea_conn(&self, conn: &mut ConnPtr, data: &[u8]) -> Option<PqBuffer> {
        let mut len = 0;

        let escaped =
            unsafe { PQescapeByteaConn(conn.as_ptr(), data.as_ptr(), data.len(), &mut len) };

        unsafe { PqBuffer::new(escaped, len) }
    }

    fn unescape_bytea(&self, data: &CStr) -> Option<PqBuffer> {
        let mut len = 0;

        let unescaped = unsafe { PQunescapeBytea(data.as_ptr().cast::<u8>(), &mut len) };

        unsafe { PqBuffer::new(unescaped, len) }
    }
}
