use std::fmt::{self, Debug, Formatter};
use std::os::raw::c_int;
use std::sync::OnceLock;

use crate::conninfo::{self, ConninfoOption};
use crate::engine::{ConnInt, ConnStr, Engine};
use crate::error::{Error, Result};
use crate::logger::LogSettings;
use crate::params::c_string;
use crate::result::ResultHandle;
use crate::status::{ConnStatus, ExecStatus, Ping, PollingStatus, TransactionStatus};

mod copy;
mod execute;

pub use copy::{CopyData, CopyOut, CopyPut};

/// The first `PQlibVersion` that knows `PQhostaddr`.
const HOSTADDR_MIN_VERSION: c_int = 120000;

/// Managed native connection.
///
/// The handle exclusively owns the native connection and releases it exactly once, in
/// [`finish`][Self::finish] or when dropped. Every operation after that fails with
/// [`Error::ConnectionClosed`].
///
/// A connection is established either in one blocking call with [`connect`][Self::connect], or
/// step by step with [`connect_start`][Self::connect_start] and
/// [`connect_poll`][Self::connect_poll], waiting on the [socket][Self::socket] between steps.
pub struct ConnectionHandle<E: Engine> {
    engine: E,
    conn: Option<E::Conn>,

    // last value accepted by `set_nonblocking`
    nonblocking: bool,

    // `PQlibVersion`, probed on first use
    lib_version: OnceLock<c_int>,

    log_settings: LogSettings,
}

impl<E: Engine> ConnectionHandle<E> {
    /// Open a connection and wait for it to be established.
    ///
    /// A handle is returned whenever the native engine could allocate one, even if the
    /// connection attempt failed; check [`status`][Self::status].
    pub fn connect(engine: E, conninfo: impl AsRef<[u8]>) -> Result<Self> {
        let conninfo = c_string("conninfo", conninfo.as_ref())?;

        let conn = engine
            .connectdb(&conninfo)
            .ok_or_else(|| Error::allocation("couldn't allocate PGconn"))?;

        let handle = Self::from_conn(engine, conn);

        tracing::debug!(
            target: "pqx::connection",
            status = ?handle.status().ok(),
            "connection opened"
        );

        Ok(handle)
    }

    /// Start opening a connection without blocking.
    ///
    /// Drive the attempt to completion with [`connect_poll`][Self::connect_poll].
    pub fn connect_start(engine: E, conninfo: impl AsRef<[u8]>) -> Result<Self> {
        let conninfo = c_string("conninfo", conninfo.as_ref())?;

        let conn = engine
            .connect_start(&conninfo)
            .ok_or_else(|| Error::allocation("couldn't allocate PGconn"))?;

        tracing::trace!(target: "pqx::connection", "connection started");

        Ok(Self::from_conn(engine, conn))
    }

    fn from_conn(engine: E, conn: E::Conn) -> Self {
        let nonblocking = engine.is_nonblocking(&conn) == 1;

        Self {
            engine,
            conn: Some(conn),
            nonblocking,
            lib_version: OnceLock::new(),
            log_settings: LogSettings::default(),
        }
    }

    /// Report whether the server at `conninfo` is accepting connections, without opening one.
    pub fn ping(engine: &E, conninfo: impl AsRef<[u8]>) -> Result<Ping> {
        let conninfo = c_string("conninfo", conninfo.as_ref())?;

        Ping::from_native(engine.ping(&conninfo))
    }

    /// Advance a connection started with [`connect_start`][Self::connect_start] by one step.
    pub fn connect_poll(&mut self) -> Result<PollingStatus> {
        let status = PollingStatus::from_native(
            self.with_conn(|engine, conn| engine.connect_poll(conn))?,
        )?;

        tracing::trace!(target: "pqx::connection", ?status, "connect poll");

        Ok(status)
    }

    /// Close the connection and reopen it with the same parameters, blocking.
    pub fn reset(&mut self) -> Result<()> {
        self.with_conn(|engine, conn| engine.reset(conn))?;

        tracing::debug!(
            target: "pqx::connection",
            status = ?self.status().ok(),
            "connection reset"
        );

        Ok(())
    }

    /// Start resetting the connection without blocking.
    ///
    /// Drive the reset to completion with [`reset_poll`][Self::reset_poll].
    pub fn reset_start(&mut self) -> Result<()> {
        if self.with_conn(|engine, conn| engine.reset_start(conn))? == 0 {
            return Err(self.protocol_error("resetting connection failed"));
        }

        tracing::trace!(target: "pqx::connection", "reset started");

        Ok(())
    }

    pub fn reset_poll(&mut self) -> Result<PollingStatus> {
        let status =
            PollingStatus::from_native(self.with_conn(|engine, conn| engine.reset_poll(conn))?)?;

        tracing::trace!(target: "pqx::connection", ?status, "reset poll");

        Ok(status)
    }

    /// Close the connection and release the native resource.
    ///
    /// Calling this again, or dropping the handle afterwards, does nothing.
    pub fn finish(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.engine.finish(conn);

            tracing::debug!(target: "pqx::connection", "connection closed");
        }
    }

    /// Returns `true` once [`finish`][Self::finish] has run.
    pub fn is_closed(&self) -> bool {
        self.conn.is_none()
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn log_settings(&self) -> &LogSettings {
        &self.log_settings
    }

    /// Replace the log levels used for statements executed on this connection.
    pub fn set_log_settings(&mut self, settings: LogSettings) {
        self.log_settings = settings;
    }

    #[inline]
    pub(crate) fn conn(&self) -> Result<&E::Conn> {
        self.conn.as_ref().ok_or(Error::ConnectionClosed)
    }

    /// Run a native call against the open connection.
    #[inline]
    pub(crate) fn with_conn<T>(&mut self, call: impl FnOnce(&E, &mut E::Conn) -> T) -> Result<T> {
        let conn = self.conn.as_mut().ok_or(Error::ConnectionClosed)?;

        Ok(call(&self.engine, conn))
    }

    /// The live error text of the connection, captured at the point of failure.
    pub(crate) fn live_error(&self) -> String {
        self.conn
            .as_ref()
            .and_then(|conn| self.engine.error_message(conn))
            .map(|msg| String::from_utf8_lossy(msg.to_bytes()).trim_end().to_owned())
            .unwrap_or_default()
    }

    pub(crate) fn protocol_error(&self, action: &str) -> Error {
        let message = self.live_error();

        if message.is_empty() {
            err_protocol!(action)
        } else {
            err_protocol!("{action}: {message}")
        }
    }

    pub(crate) fn wrap_result(&self, res: E::Result) -> ResultHandle<E> {
        ResultHandle::new(self.engine.clone(), res)
    }

    pub fn status(&self) -> Result<ConnStatus> {
        ConnStatus::from_native(self.engine.status(self.conn()?))
    }

    pub fn transaction_status(&self) -> Result<TransactionStatus> {
        TransactionStatus::from_native(self.engine.transaction_status(self.conn()?))
    }

    fn conn_str(&self, attr: ConnStr) -> Result<&[u8]> {
        self.engine
            .conn_str(self.conn()?, attr)
            .map(|value| value.to_bytes())
            .ok_or_else(|| err_protocol!("connection attribute {attr:?} is unavailable"))
    }

    /// The database name of the connection.
    pub fn db(&self) -> Result<&[u8]> {
        self.conn_str(ConnStr::Db)
    }

    pub fn user(&self) -> Result<&[u8]> {
        self.conn_str(ConnStr::User)
    }

    pub fn password(&self) -> Result<&[u8]> {
        self.conn_str(ConnStr::Password)
    }

    pub fn host(&self) -> Result<&[u8]> {
        self.conn_str(ConnStr::Host)
    }

    /// The server IP address of the connection.
    ///
    /// Fails with [`Error::NotSupported`] when linked against libpq older than 12.
    pub fn hostaddr(&self) -> Result<&[u8]> {
        self.conn()?;

        let version = *self.lib_version.get_or_init(|| self.engine.lib_version());
        if version < HOSTADDR_MIN_VERSION {
            return Err(Error::NotSupported(format!(
                "hostaddr requires libpq 12 or later, found {version}"
            )));
        }

        self.conn_str(ConnStr::HostAddr)
    }

    pub fn port(&self) -> Result<&[u8]> {
        self.conn_str(ConnStr::Port)
    }

    pub fn tty(&self) -> Result<&[u8]> {
        self.conn_str(ConnStr::Tty)
    }

    /// The command-line options passed in the connection request.
    pub fn options(&self) -> Result<&[u8]> {
        self.conn_str(ConnStr::Options)
    }

    /// The error message most recently generated by an operation on the connection.
    pub fn error_message(&self) -> Result<&[u8]> {
        self.engine
            .error_message(self.conn()?)
            .map(|msg| msg.to_bytes())
            .ok_or_else(|| err_protocol!("connection error message is unavailable"))
    }

    pub fn protocol_version(&self) -> Result<c_int> {
        Ok(self.engine.conn_int(self.conn()?, ConnInt::ProtocolVersion))
    }

    /// The server version as an integer, `160002` for 16.2.
    pub fn server_version(&self) -> Result<c_int> {
        Ok(self.engine.conn_int(self.conn()?, ConnInt::ServerVersion))
    }

    /// The file descriptor of the connection socket, `-1` if there is none.
    pub fn socket(&self) -> Result<c_int> {
        Ok(self.engine.conn_int(self.conn()?, ConnInt::Socket))
    }

    pub fn backend_pid(&self) -> Result<c_int> {
        Ok(self.engine.conn_int(self.conn()?, ConnInt::BackendPid))
    }

    pub fn needs_password(&self) -> Result<bool> {
        Ok(self.engine.conn_int(self.conn()?, ConnInt::NeedsPassword) == 1)
    }

    pub fn used_password(&self) -> Result<bool> {
        Ok(self.engine.conn_int(self.conn()?, ConnInt::UsedPassword) == 1)
    }

    pub fn ssl_in_use(&self) -> Result<bool> {
        Ok(self.engine.conn_int(self.conn()?, ConnInt::SslInUse) == 1)
    }

    /// A parameter reported by the server, `None` if the server never reported it.
    pub fn parameter_status(&self, name: impl AsRef<[u8]>) -> Result<Option<&[u8]>> {
        let name = c_string("parameter name", name.as_ref())?;

        Ok(self
            .engine
            .parameter_status(self.conn()?, &name)
            .map(|value| value.to_bytes()))
    }

    /// The connection options in use by the live connection.
    pub fn info(&self) -> Result<Vec<ConninfoOption>> {
        let options = self
            .engine
            .conninfo(self.conn()?)
            .ok_or_else(|| Error::allocation("couldn't allocate connection options"))?;

        Ok(conninfo::collect(&self.engine, options))
    }

    /// Whether the connection is in non-blocking mode, as reported by the native engine.
    pub fn nonblocking(&self) -> Result<bool> {
        Ok(self.engine.is_nonblocking(self.conn()?) == 1)
    }

    pub fn set_nonblocking(&mut self, nonblocking: bool) -> Result<()> {
        let arg = c_int::from(nonblocking);

        if self.with_conn(|engine, conn| engine.set_nonblocking(conn, arg))? != 0 {
            return Err(self.protocol_error("setting nonblocking mode failed"));
        }

        self.nonblocking = nonblocking;

        Ok(())
    }

    /// Try to send queued output to the server.
    ///
    /// Returns `true` while output is still pending; in non-blocking mode, wait for the socket
    /// to become writable and call this again.
    pub fn flush(&mut self) -> Result<bool> {
        match self.with_conn(|engine, conn| engine.flush(conn))? {
            0 => Ok(false),
            n if n > 0 => Ok(true),
            _ => Err(self.protocol_error("flushing failed")),
        }
    }

    /// Return the rows of the query just sent one at a time.
    ///
    /// Must be called right after a `send_*` call, before the first
    /// [`get_result`][Self::get_result].
    pub fn set_single_row_mode(&mut self) -> Result<()> {
        if self.with_conn(|engine, conn| engine.set_single_row_mode(conn))? != 1 {
            return Err(err_protocol!("single-row mode is not available now"));
        }

        Ok(())
    }

    /// Construct an empty result with the given status.
    pub fn make_empty_result(&mut self, status: ExecStatus) -> Result<ResultHandle<E>> {
        let res = self
            .with_conn(|engine, conn| engine.make_empty_result(conn, status.to_native()))?
            .ok_or_else(|| Error::allocation("couldn't allocate PGresult"))?;

        Ok(self.wrap_result(res))
    }
}

impl<E: Engine> Drop for ConnectionHandle<E> {
    fn drop(&mut self) {
        self.finish();
    }
}

impl<E: Engine> Debug for ConnectionHandle<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("status", &self.status().ok())
            .field("nonblocking", &self.nonblocking)
            .field("closed", &self.is_closed())
            .finish()
    }
}
