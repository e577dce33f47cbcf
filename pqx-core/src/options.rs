use std::fmt::{self, Display, Formatter, Write};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::connection::ConnectionHandle;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::logger::LogSettings;

/// Options for controlling the level of protection provided for PostgreSQL SSL connections.
///
/// It is used by the [`ssl_mode`](ConnectOptions::ssl_mode) method.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PgSslMode {
    /// Only try a non-SSL connection.
    Disable,

    /// First try a non-SSL connection; if that fails, try an SSL connection.
    Allow,

    /// First try an SSL connection; if that fails, try a non-SSL connection.
    ///
    /// This is the default if no other mode is specified.
    #[default]
    Prefer,

    /// Only try an SSL connection. If a root CA file is present, verify the connection
    /// in the same way as if `VerifyCa` was specified.
    Require,

    /// Only try an SSL connection, and verify that the server certificate is issued by a
    /// trusted certificate authority (CA).
    VerifyCa,

    /// Only try an SSL connection; verify that the server certificate is issued by a trusted
    /// CA and that the requested server host name matches that in the certificate.
    VerifyFull,
}

impl PgSslMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PgSslMode::Disable => "disable",
            PgSslMode::Allow => "allow",
            PgSslMode::Prefer => "prefer",
            PgSslMode::Require => "require",
            PgSslMode::VerifyCa => "verify-ca",
            PgSslMode::VerifyFull => "verify-full",
        }
    }
}

impl FromStr for PgSslMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        Ok(match &*s.to_ascii_lowercase() {
            "disable" => PgSslMode::Disable,
            "allow" => PgSslMode::Allow,
            "prefer" => PgSslMode::Prefer,
            "require" => PgSslMode::Require,
            "verify-ca" => PgSslMode::VerifyCa,
            "verify-full" => PgSslMode::VerifyFull,

            _ => {
                return Err(Error::invalid_argument(format!("unknown value {s:?} for `ssl_mode`")));
            }
        })
    }
}

/// Options and flags which can be used to configure a PostgreSQL connection.
///
/// Rendered as a `key='value'` conninfo string; anything left unset falls back to the
/// native engine's defaults, including the `PG*` environment variables and the password file.
///
/// ```rust
/// # use pqx_core::{ConnectOptions, PgSslMode};
/// let options = ConnectOptions::new()
///     .host("localhost")
///     .port(5432)
///     .username("postgres")
///     .database("pqx")
///     .ssl_mode(PgSslMode::Disable);
///
/// assert_eq!(
///     options.to_conninfo(),
///     "host='localhost' port='5432' user='postgres' dbname='pqx' sslmode='disable'"
/// );
/// ```
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    host: Option<String>,
    hostaddr: Option<String>,
    port: Option<u16>,
    username: Option<String>,
    password: Option<String>,
    database: Option<String>,
    ssl_mode: Option<PgSslMode>,
    ssl_root_cert: Option<PathBuf>,
    application_name: Option<String>,
    connect_timeout: Option<Duration>,
    options: Option<String>,
    extra: Vec<(String, String)>,
    log_settings: LogSettings,
}

impl ConnectOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name of the host to connect to.
    ///
    /// A value starting with `/` names the directory of a Unix-domain socket.
    pub fn host(mut self, host: &str) -> Self {
        self.host = Some(host.to_owned());
        self
    }

    /// Sets the numeric IP address of the host, skipping the name lookup.
    pub fn hostaddr(mut self, hostaddr: &str) -> Self {
        self.hostaddr = Some(hostaddr.to_owned());
        self
    }

    /// Sets the port to connect to at the server host.
    pub fn port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Sets the directory of the Unix-domain socket to connect through.
    pub fn socket(self, path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_string_lossy().into_owned();
        self.host(&path)
    }

    pub fn username(mut self, username: &str) -> Self {
        self.username = Some(username.to_owned());
        self
    }

    pub fn password(mut self, password: &str) -> Self {
        self.password = Some(password.to_owned());
        self
    }

    pub fn database(mut self, database: &str) -> Self {
        self.database = Some(database.to_owned());
        self
    }

    /// Sets whether or with what priority a secure SSL TCP/IP connection will be negotiated
    /// with the server.
    pub fn ssl_mode(mut self, mode: PgSslMode) -> Self {
        self.ssl_mode = Some(mode);
        self
    }

    /// Sets the name of a file containing SSL certificate authority (CA) certificate(s).
    pub fn ssl_root_cert(mut self, cert: impl AsRef<Path>) -> Self {
        self.ssl_root_cert = Some(cert.as_ref().to_path_buf());
        self
    }

    pub fn application_name(mut self, application_name: &str) -> Self {
        self.application_name = Some(application_name.to_owned());
        self
    }

    /// Sets the maximum time to wait while connecting, rounded down to whole seconds.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }

    /// Sets command-line options to send to the server at connection start.
    pub fn options(mut self, options: &str) -> Self {
        self.options = Some(options.to_owned());
        self
    }

    /// Sets any other conninfo keyword.
    pub fn extra(mut self, keyword: &str, value: &str) -> Self {
        self.extra.push((keyword.to_owned(), value.to_owned()));
        self
    }

    /// Sets the log levels of statements executed on connections opened with these options.
    pub fn log_settings(mut self, settings: LogSettings) -> Self {
        self.log_settings = settings;
        self
    }

    pub fn get_host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn get_port(&self) -> Option<u16> {
        self.port
    }

    pub fn get_database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn get_ssl_mode(&self) -> Option<PgSslMode> {
        self.ssl_mode
    }

    /// Render the options as a conninfo string.
    pub fn to_conninfo(&self) -> String {
        self.to_string()
    }

    /// Open a connection with these options, blocking until it is established.
    pub fn connect<E: Engine>(&self, engine: E) -> Result<ConnectionHandle<E>> {
        let mut conn = ConnectionHandle::connect(engine, self.to_conninfo())?;
        conn.set_log_settings(self.log_settings.clone());

        Ok(conn)
    }

    /// Start opening a connection with these options without blocking.
    pub fn connect_start<E: Engine>(&self, engine: E) -> Result<ConnectionHandle<E>> {
        let mut conn = ConnectionHandle::connect_start(engine, self.to_conninfo())?;
        conn.set_log_settings(self.log_settings.clone());

        Ok(conn)
    }
}

impl Display for ConnectOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut first = true;
        let mut pair = |f: &mut Formatter<'_>, keyword: &str, value: &str| -> fmt::Result {
            if !first {
                f.write_char(' ')?;
            }
            first = false;

            write!(f, "{keyword}=")?;
            write_quoted(f, value)
        };

        if let Some(host) = &self.host {
            pair(f, "host", host)?;
        }
        if let Some(hostaddr) = &self.hostaddr {
            pair(f, "hostaddr", hostaddr)?;
        }
        if let Some(port) = self.port {
            pair(f, "port", &port.to_string())?;
        }
        if let Some(username) = &self.username {
            pair(f, "user", username)?;
        }
        if let Some(password) = &self.password {
            pair(f, "password", password)?;
        }
        if let Some(database) = &self.database {
            pair(f, "dbname", database)?;
        }
        if let Some(ssl_mode) = self.ssl_mode {
            pair(f, "sslmode", ssl_mode.as_str())?;
        }
        if let Some(cert) = &self.ssl_root_cert {
            pair(f, "sslrootcert", &cert.to_string_lossy())?;
        }
        if let Some(application_name) = &self.application_name {
            pair(f, "application_name", application_name)?;
        }
        if let Some(timeout) = self.connect_timeout {
            pair(f, "connect_timeout", &timeout.as_secs().to_string())?;
        }
        if let Some(options) = &self.options {
            pair(f, "options", options)?;
        }
        for (keyword, value) in &self.extra {
            pair(f, keyword, value)?;
        }

        Ok(())
    }
}

// single quotes and backslashes must be escaped inside a quoted conninfo value
fn write_quoted(f: &mut Formatter<'_>, value: &str) -> fmt::Result {
    f.write_char('\'')?;

    for ch in value.chars() {
        if ch == '\'' || ch == '\\' {
            f.write_char('\\')?;
        }
        f.write_char(ch)?;
    }

    f.write_char('\'')
}
