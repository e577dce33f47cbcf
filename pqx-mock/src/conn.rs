use std::collections::{HashMap, VecDeque};
use std::ffi::{CStr, CString};
use std::os::raw::c_int;

use pqx_core::{ConnInt, ConnStatus, ConnStr, Oid, PollingStatus, TransactionStatus};

use crate::conninfo::{self, Params};
use crate::result::{c_str, ResultData};

/// A connection to the mock server.
///
/// Hosts ending in `.invalid` are unreachable; every other host answers.
#[derive(Debug)]
pub struct MockConn {
    pub(crate) params: Params,
    attrs: Attrs,
    pub(crate) error: CString,
    pub(crate) status: ConnStatus,
    pub(crate) transaction: TransactionStatus,
    pub(crate) nonblocking: bool,
    pub(crate) polls: VecDeque<(PollingStatus, ConnStatus)>,
    pub(crate) pending: VecDeque<ResultData>,
    pub(crate) copy: CopyState,
    pub(crate) prepared: HashMap<CString, Prepared>,
    pub(crate) parameters: Vec<(CString, CString)>,
    pub(crate) busy: usize,
    pub(crate) unflushed: usize,
    pub(crate) backend_pid: c_int,
}

#[derive(Debug, Default)]
struct Attrs {
    db: CString,
    user: CString,
    password: CString,
    host: CString,
    hostaddr: CString,
    port: CString,
    tty: CString,
    options: CString,
}

#[derive(Debug, Clone)]
pub(crate) struct Prepared {
    pub(crate) command: Vec<u8>,
    pub(crate) types: Vec<Oid>,
}

/// The `COPY` sub-protocol state of a connection.
#[derive(Debug, Default)]
pub(crate) enum CopyState {
    #[default]
    None,
    In {
        table: String,
        binary: bool,
        data: Vec<u8>,
    },
    Out {
        rows: VecDeque<Vec<u8>>,
        sent: usize,
    },
}

impl MockConn {
    /// A connection for `conninfo`, not yet established.
    pub(crate) fn new(conninfo: &CStr, backend_pid: c_int) -> Self {
        let parsed = conninfo::parse(&conninfo.to_string_lossy());

        let mut conn = Self {
            params: parsed.clone().unwrap_or_default(),
            attrs: Attrs::default(),
            error: CString::default(),
            status: ConnStatus::Started,
            transaction: TransactionStatus::Idle,
            nonblocking: false,
            polls: VecDeque::new(),
            pending: VecDeque::new(),
            copy: CopyState::None,
            prepared: HashMap::new(),
            parameters: Vec::new(),
            busy: 0,
            unflushed: 0,
            backend_pid,
        };

        conn.attrs = conn.read_attrs();

        match parsed {
            Ok(_) => conn.script_polls(),
            Err(message) => {
                conn.status = ConnStatus::Bad;
                conn.error = c_str(message);
            }
        }

        conn
    }

    fn read_attrs(&self) -> Attrs {
        let get = |keyword: &str, default: &str| c_str(self.params.get(keyword).unwrap_or(default));

        Attrs {
            db: get("dbname", self.params.get("user").unwrap_or("postgres")),
            user: get("user", "postgres"),
            password: get("password", ""),
            host: get("host", "localhost"),
            hostaddr: get("hostaddr", ""),
            port: get("port", "5432"),
            tty: CString::default(),
            options: get("options", ""),
        }
    }

    pub(crate) fn is_reachable(&self) -> bool {
        let host = self.params.get("host").unwrap_or("localhost");
        !host.ends_with(".invalid")
    }

    /// Queue the steps of a connection attempt.
    pub(crate) fn script_polls(&mut self) {
        self.status = ConnStatus::Started;

        self.polls = if self.is_reachable() {
            VecDeque::from([
                (PollingStatus::Writing, ConnStatus::Started),
                (PollingStatus::Reading, ConnStatus::Made),
                (PollingStatus::Reading, ConnStatus::AwaitingResponse),
                (PollingStatus::Ok, ConnStatus::Ok),
            ])
        } else {
            VecDeque::from([
                (PollingStatus::Writing, ConnStatus::Started),
                (PollingStatus::Failed, ConnStatus::Bad),
            ])
        };
    }

    /// Run one step of the connection attempt.
    pub(crate) fn poll(&mut self) -> PollingStatus {
        let Some((polling, status)) = self.polls.pop_front() else {
            return match self.status {
                ConnStatus::Ok => PollingStatus::Ok,
                _ => PollingStatus::Failed,
            };
        };

        self.status = status;

        match status {
            ConnStatus::Ok => self.established(),
            ConnStatus::Bad => self.refused(),
            _ => {}
        }

        polling
    }

    /// Run every remaining step of the connection attempt.
    pub(crate) fn establish(&mut self) {
        while !self.poll().is_terminal() {}
    }

    fn established(&mut self) {
        self.error = CString::default();
        self.transaction = TransactionStatus::Idle;
        self.pending.clear();
        self.copy = CopyState::None;
        self.prepared.clear();

        let application_name = self.params.get("application_name").unwrap_or("");

        self.parameters = [
            ("application_name", application_name),
            ("client_encoding", "UTF8"),
            ("DateStyle", "ISO, MDY"),
            ("integer_datetimes", "on"),
            ("server_encoding", "UTF8"),
            ("server_version", "16.2"),
            ("standard_conforming_strings", "on"),
            ("TimeZone", "UTC"),
        ]
        .into_iter()
        .map(|(name, value)| (c_str(name), c_str(value)))
        .collect();
    }

    fn refused(&mut self) {
        self.error = c_str(format!(
            "connection to server at \"{}\", port {} failed: Connection refused\n\
             \tIs the server running on that host and accepting TCP/IP connections?\n",
            self.attrs.host.to_string_lossy(),
            self.attrs.port.to_string_lossy(),
        ));
        self.parameters.clear();
    }

    pub(crate) fn attr(&self, attr: ConnStr) -> &CStr {
        match attr {
            ConnStr::Db => &self.attrs.db,
            ConnStr::User => &self.attrs.user,
            ConnStr::Password => &self.attrs.password,
            ConnStr::Host => &self.attrs.host,
            ConnStr::HostAddr => &self.attrs.hostaddr,
            ConnStr::Port => &self.attrs.port,
            ConnStr::Tty => &self.attrs.tty,
            ConnStr::Options => &self.attrs.options,
        }
    }

    pub(crate) fn int(&self, attr: ConnInt, server_version: c_int) -> c_int {
        let ok = self.status == ConnStatus::Ok;

        match attr {
            ConnInt::ProtocolVersion if ok => 3,
            ConnInt::ServerVersion if ok => server_version,
            ConnInt::Socket if self.status != ConnStatus::Bad => 7,
            ConnInt::Socket => -1,
            ConnInt::BackendPid if ok => self.backend_pid,
            ConnInt::UsedPassword => c_int::from(ok && !self.attrs.password.is_empty()),
            ConnInt::SslInUse => c_int::from(
                ok && matches!(
                    self.params.get("sslmode"),
                    Some("require" | "verify-ca" | "verify-full")
                ),
            ),
            _ => 0,
        }
    }

    pub(crate) fn parameter(&self, name: &CStr) -> Option<&CStr> {
        self.parameters
            .iter()
            .find(|(n, _)| n.as_c_str() == name)
            .map(|(_, value)| value.as_c_str())
    }

    pub(crate) fn transaction_status(&self) -> TransactionStatus {
        match self.status {
            ConnStatus::Ok if !matches!(self.copy, CopyState::None) => TransactionStatus::Active,
            ConnStatus::Ok => self.transaction,
            _ => TransactionStatus::Unknown,
        }
    }

    pub(crate) fn fail(&mut self, message: &str) {
        self.error = c_str(message);
    }
}
