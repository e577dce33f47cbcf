use std::os::raw::c_int;

use crate::connection::ConnectionHandle;
use crate::engine::{Engine, Oid};
use crate::error::{Error, Result};
use crate::logger::QueryLogger;
use crate::params::{c_string, statement_types, QueryParams};
use crate::result::ResultHandle;
use crate::status::Format;

impl<E: Engine> ConnectionHandle<E> {
    /// Submit a command and wait for its result.
    ///
    /// Errors reported by the server do not fail this call: they come back as a result with an
    /// error [`status`][ResultHandle::status].
    pub fn exec(&mut self, command: impl AsRef<[u8]>) -> Result<ResultHandle<E>> {
        let command = command.as_ref();
        let c_command = c_string("command", command)?;
        self.conn()?;

        let mut logger = QueryLogger::new(command, self.log_settings().clone());
        let res = self.with_conn(|engine, conn| engine.exec(conn, &c_command))?;

        self.blocking_result(res, &mut logger)
    }

    /// Submit a command with separate parameters and wait for its result.
    ///
    /// `None` values are SQL `NULL`. When given, `types` and `formats` must describe exactly
    /// one entry per value.
    pub fn exec_params(
        &mut self,
        command: impl AsRef<[u8]>,
        values: &[Option<&[u8]>],
        types: Option<&[Oid]>,
        formats: Option<&[Format]>,
        result_format: Format,
    ) -> Result<ResultHandle<E>> {
        let command = command.as_ref();
        let c_command = c_string("command", command)?;
        let params = QueryParams::new(values, types, formats, result_format)?;
        self.conn()?;

        let mut logger = QueryLogger::new(command, self.log_settings().clone());
        let res = self.with_conn(|engine, conn| engine.exec_params(conn, &c_command, &params))?;

        self.blocking_result(res, &mut logger)
    }

    /// Create a prepared statement and wait for the server to acknowledge it.
    ///
    /// Without `types`, the server infers the type of every parameter.
    pub fn prepare(
        &mut self,
        name: impl AsRef<[u8]>,
        command: impl AsRef<[u8]>,
        types: Option<&[Oid]>,
    ) -> Result<ResultHandle<E>> {
        let name = c_string("statement name", name.as_ref())?;
        let command = command.as_ref();
        let c_command = c_string("command", command)?;
        let types = statement_types(types)?;
        self.conn()?;

        let mut logger = QueryLogger::new(command, self.log_settings().clone());
        let res = self.with_conn(|engine, conn| engine.prepare(conn, &name, &c_command, types))?;

        self.blocking_result(res, &mut logger)
    }

    /// Execute a prepared statement and wait for its result.
    pub fn exec_prepared(
        &mut self,
        name: impl AsRef<[u8]>,
        values: &[Option<&[u8]>],
        formats: Option<&[Format]>,
        result_format: Format,
    ) -> Result<ResultHandle<E>> {
        let statement = name.as_ref();
        let name = c_string("statement name", statement)?;
        let params = QueryParams::prepared(values, formats, result_format)?;
        self.conn()?;

        let mut logger = QueryLogger::new(statement, self.log_settings().clone());
        let res = self.with_conn(|engine, conn| engine.exec_prepared(conn, &name, &params))?;

        self.blocking_result(res, &mut logger)
    }

    /// Describe the parameters and result columns of a prepared statement.
    pub fn describe_prepared(&mut self, name: impl AsRef<[u8]>) -> Result<ResultHandle<E>> {
        let name = c_string("statement name", name.as_ref())?;

        let res = self.with_conn(|engine, conn| engine.describe_prepared(conn, &name))?;

        self.allocated_result(res)
    }

    /// Describe the result columns of an open portal.
    pub fn describe_portal(&mut self, name: impl AsRef<[u8]>) -> Result<ResultHandle<E>> {
        let name = c_string("portal name", name.as_ref())?;

        let res = self.with_conn(|engine, conn| engine.describe_portal(conn, &name))?;

        self.allocated_result(res)
    }

    fn allocated_result(&self, res: Option<E::Result>) -> Result<ResultHandle<E>> {
        let res = res.ok_or_else(|| Error::allocation("couldn't allocate PGresult"))?;

        Ok(self.wrap_result(res))
    }

    fn blocking_result(
        &self,
        res: Option<E::Result>,
        logger: &mut QueryLogger<'_>,
    ) -> Result<ResultHandle<E>> {
        let res = self.allocated_result(res)?;

        logger.set_status(res.status()?);
        logger.set_rows_returned(res.ntuples()?.try_into().unwrap_or_default());
        logger.set_rows_affected(res.command_tuples().ok().flatten().unwrap_or_default());

        Ok(res)
    }

    /// Submit a command without waiting for its results.
    ///
    /// A string of several `;`-separated commands is allowed; collect one result per command
    /// with [`get_result`][Self::get_result] until it returns `None`.
    pub fn send_query(&mut self, command: impl AsRef<[u8]>) -> Result<()> {
        let command = c_string("command", command.as_ref())?;

        let sent = self.with_conn(|engine, conn| engine.send_query(conn, &command))?;

        self.check_sent(sent, "sending query failed")
    }

    pub fn send_query_params(
        &mut self,
        command: impl AsRef<[u8]>,
        values: &[Option<&[u8]>],
        types: Option<&[Oid]>,
        formats: Option<&[Format]>,
        result_format: Format,
    ) -> Result<()> {
        let command = c_string("command", command.as_ref())?;
        let params = QueryParams::new(values, types, formats, result_format)?;

        let sent =
            self.with_conn(|engine, conn| engine.send_query_params(conn, &command, &params))?;

        self.check_sent(sent, "sending query failed")
    }

    pub fn send_prepare(
        &mut self,
        name: impl AsRef<[u8]>,
        command: impl AsRef<[u8]>,
        types: Option<&[Oid]>,
    ) -> Result<()> {
        let name = c_string("statement name", name.as_ref())?;
        let command = c_string("command", command.as_ref())?;
        let types = statement_types(types)?;

        let sent =
            self.with_conn(|engine, conn| engine.send_prepare(conn, &name, &command, types))?;

        self.check_sent(sent, "sending prepare failed")
    }

    pub fn send_query_prepared(
        &mut self,
        name: impl AsRef<[u8]>,
        values: &[Option<&[u8]>],
        formats: Option<&[Format]>,
        result_format: Format,
    ) -> Result<()> {
        let name = c_string("statement name", name.as_ref())?;
        let params = QueryParams::prepared(values, formats, result_format)?;

        let sent =
            self.with_conn(|engine, conn| engine.send_query_prepared(conn, &name, &params))?;

        self.check_sent(sent, "sending prepared query failed")
    }

    pub fn send_describe_prepared(&mut self, name: impl AsRef<[u8]>) -> Result<()> {
        let name = c_string("statement name", name.as_ref())?;

        let sent = self.with_conn(|engine, conn| engine.send_describe_prepared(conn, &name))?;

        self.check_sent(sent, "sending describe failed")
    }

    pub fn send_describe_portal(&mut self, name: impl AsRef<[u8]>) -> Result<()> {
        let name = c_string("portal name", name.as_ref())?;

        let sent = self.with_conn(|engine, conn| engine.send_describe_portal(conn, &name))?;

        self.check_sent(sent, "sending describe failed")
    }

    fn check_sent(&self, sent: c_int, action: &str) -> Result<()> {
        if sent != 1 {
            return Err(self.protocol_error(action));
        }

        tracing::trace!(target: "pqx::query", "request sent");

        Ok(())
    }

    /// The next result of the request sent last, `None` once every result was returned.
    ///
    /// Blocks while [`is_busy`][Self::is_busy] is `true`.
    pub fn get_result(&mut self) -> Result<Option<ResultHandle<E>>> {
        let res = self.with_conn(|engine, conn| engine.get_result(conn))?;

        Ok(res.map(|res| self.wrap_result(res)))
    }

    /// Read whatever input is available from the server.
    ///
    /// Call this when the socket becomes readable, before checking
    /// [`is_busy`][Self::is_busy].
    pub fn consume_input(&mut self) -> Result<()> {
        if self.with_conn(|engine, conn| engine.consume_input(conn))? != 1 {
            return Err(self.protocol_error("consuming input failed"));
        }

        Ok(())
    }

    /// Returns `true` if [`get_result`][Self::get_result] would block.
    pub fn is_busy(&mut self) -> Result<bool> {
        Ok(self.with_conn(|engine, conn| engine.is_busy(conn))? == 1)
    }
}
