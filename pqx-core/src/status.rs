//! Status codes and tags exchanged with the native engine.
//!
//! The engine speaks in plain integers; every code is converted into one of these enums as soon
//! as it crosses into pqx. An integer with no matching variant is a protocol error rather than a
//! value passed on to the caller.

use std::os::raw::c_int;

use crate::error::Error;

macro_rules! native_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident ($what:literal) {
            $(
                $(#[$variant_meta:meta])*
                $variant:ident = $value:expr,
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        #[repr(i32)]
        $vis enum $name {
            $(
                $(#[$variant_meta])*
                $variant = $value,
            )*
        }

        impl $name {
            /// Convert a code returned by the native engine.
            pub fn from_native(code: c_int) -> Result<Self, Error> {
                $(
                    if code == $value {
                        return Ok(Self::$variant);
                    }
                )*

                Err(err_protocol!("unknown {} code: {}", $what, code))
            }

            /// The code understood by the native engine.
            #[inline]
            pub fn to_native(self) -> c_int {
                self as c_int
            }
        }
    };
}

native_enum! {
    /// Status of a connection (`ConnStatusType`).
    pub enum ConnStatus("connection status") {
        Ok = 0,
        Bad = 1,
        Started = 2,
        Made = 3,
        AwaitingResponse = 4,
        AuthOk = 5,
        Setenv = 6,
        SslStartup = 7,
        Needed = 8,
        CheckWritable = 9,
        Consume = 10,
        GssStartup = 11,
        CheckTarget = 12,
        CheckStandby = 13,
    }
}

native_enum! {
    /// Outcome of one step of the asynchronous connect/reset state machine.
    ///
    /// `Reading` and `Writing` ask the caller to wait until the connection's
    /// [socket][crate::ConnectionHandle::socket] is readable or writable, then poll again.
    pub enum PollingStatus("polling status") {
        Failed = 0,
        Reading = 1,
        Writing = 2,
        Ok = 3,
        Active = 4,
    }
}

impl PollingStatus {
    /// Returns `true` for `Ok` and `Failed`, after which polling must stop.
    pub fn is_terminal(self) -> bool {
        matches!(self, PollingStatus::Ok | PollingStatus::Failed)
    }
}

native_enum! {
    /// Outcome of executing a command (`ExecStatusType`).
    pub enum ExecStatus("result status") {
        EmptyQuery = 0,
        CommandOk = 1,
        TuplesOk = 2,
        CopyOut = 3,
        CopyIn = 4,
        BadResponse = 5,
        NonfatalError = 6,
        FatalError = 7,
        CopyBoth = 8,
        SingleTuple = 9,
        PipelineSync = 10,
        PipelineAborted = 11,
    }
}

impl ExecStatus {
    /// Returns `true` if the server reported an error for the command.
    pub fn is_error(self) -> bool {
        matches!(
            self,
            ExecStatus::BadResponse | ExecStatus::FatalError | ExecStatus::PipelineAborted
        )
    }

    /// The name libpq's `PQresStatus` gives this status.
    pub fn as_str(self) -> &'static str {
        match self {
            ExecStatus::EmptyQuery => "PGRES_EMPTY_QUERY",
            ExecStatus::CommandOk => "PGRES_COMMAND_OK",
            ExecStatus::TuplesOk => "PGRES_TUPLES_OK",
            ExecStatus::CopyOut => "PGRES_COPY_OUT",
            ExecStatus::CopyIn => "PGRES_COPY_IN",
            ExecStatus::BadResponse => "PGRES_BAD_RESPONSE",
            ExecStatus::NonfatalError => "PGRES_NONFATAL_ERROR",
            ExecStatus::FatalError => "PGRES_FATAL_ERROR",
            ExecStatus::CopyBoth => "PGRES_COPY_BOTH",
            ExecStatus::SingleTuple => "PGRES_SINGLE_TUPLE",
            ExecStatus::PipelineSync => "PGRES_PIPELINE_SYNC",
            ExecStatus::PipelineAborted => "PGRES_PIPELINE_ABORTED",
        }
    }
}

native_enum! {
    /// In-transaction status of the server session (`PGTransactionStatusType`).
    pub enum TransactionStatus("transaction status") {
        Idle = 0,
        Active = 1,
        InTrans = 2,
        InError = 3,
        Unknown = 4,
    }
}

native_enum! {
    /// Outcome of [`ConnectionHandle::ping`][crate::ConnectionHandle::ping] (`PGPing`).
    pub enum Ping("ping status") {
        Ok = 0,
        Reject = 1,
        NoResponse = 2,
        NoAttempt = 3,
    }
}

native_enum! {
    /// A field of a server error report, see
    /// [`ResultHandle::error_field`][crate::ResultHandle::error_field].
    pub enum DiagnosticField("diagnostic field") {
        Severity = b'S' as i32,
        SeverityNonlocalized = b'V' as i32,
        Sqlstate = b'C' as i32,
        MessagePrimary = b'M' as i32,
        MessageDetail = b'D' as i32,
        MessageHint = b'H' as i32,
        StatementPosition = b'P' as i32,
        InternalPosition = b'p' as i32,
        InternalQuery = b'q' as i32,
        Context = b'W' as i32,
        SchemaName = b's' as i32,
        TableName = b't' as i32,
        ColumnName = b'c' as i32,
        DatatypeName = b'd' as i32,
        ConstraintName = b'n' as i32,
        SourceFile = b'F' as i32,
        SourceLine = b'L' as i32,
        SourceFunction = b'R' as i32,
    }
}

native_enum! {
    /// Wire format of a parameter or of result data.
    #[derive(Default)]
    pub enum Format("format") {
        #[default]
        Text = 0,
        Binary = 1,
    }
}
