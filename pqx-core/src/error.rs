//! Types for working with errors produced by pqx.

use std::borrow::Cow;
use std::error::Error as StdError;
use std::fmt::{self, Display, Formatter};
use std::result::Result as StdResult;

use crate::result::ResultHandle;
use crate::status::{DiagnosticField, ExecStatus};
use crate::Engine;

/// A specialized `Result` type for pqx.
pub type Result<T, E = Error> = StdResult<T, E>;

/// Represents all the ways a method can fail within pqx.
///
/// Every failure detected by the binding layer itself is raised immediately.
/// Errors reported by the *server* are not: they arrive as a [`ResultHandle`]
/// with an error [`status`][ResultHandle::status], and only become an
/// [`Error::Database`] when the caller asks for it with
/// [`ResultHandle::error_for_status`].
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// An argument cannot be handed to the native engine as given.
    ///
    /// Raised before any native call is made: a byte string with an interior `NUL`, parameter
    /// arrays whose lengths disagree, or a value too large for the native length type.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The native engine could not allocate a connection, result or buffer.
    #[error("out of memory: {0}")]
    Allocation(String),

    /// The native engine reported a failure for an action.
    ///
    /// Carries the connection's error text as it was at the moment of the failure.
    #[error("{0}")]
    Protocol(String),

    /// The connection was used after [`finish`][crate::ConnectionHandle::finish].
    #[error("the connection is closed")]
    ConnectionClosed,

    /// The result was used after [`clear`][ResultHandle::clear].
    #[error("the result has been cleared")]
    ResultCleared,

    /// The linked native engine is too old for the requested operation.
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Error returned from the database, see [`ResultHandle::error_for_status`].
    #[error("error returned from database: {0}")]
    Database(Box<PgDatabaseError>),
}

impl Error {
    #[inline]
    pub(crate) fn invalid_argument(err: impl Display) -> Self {
        Error::InvalidArgument(err.to_string())
    }

    #[inline]
    pub(crate) fn allocation(err: impl Display) -> Self {
        Error::Allocation(err.to_string())
    }

    /// Returns `true` if this error means the handle it came from can no longer be used.
    pub fn is_closed(&self) -> bool {
        matches!(self, Error::ConnectionClosed | Error::ResultCleared)
    }

    /// The error returned from the database, if this is one.
    pub fn as_database_error(&self) -> Option<&PgDatabaseError> {
        match self {
            Error::Database(err) => Some(err),
            _ => None,
        }
    }
}

impl From<PgDatabaseError> for Error {
    fn from(err: PgDatabaseError) -> Self {
        Error::Database(Box::new(err))
    }
}

// Format an error message as a `Protocol` error
macro_rules! err_protocol {
    ($fmt:literal) => {
        $crate::error::Error::Protocol(format!($fmt))
    };

    ($expr:expr) => {
        $crate::error::Error::Protocol($expr.into())
    };

    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::Error::Protocol(format!($fmt, $($arg)*))
    };
}

/// The general category of a database error, derived from its SQLSTATE.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// Unique/primary key constraint violation (`23505`).
    UniqueViolation,
    /// Foreign key constraint violation (`23503`).
    ForeignKeyViolation,
    /// Not-null constraint violation (`23502`).
    NotNullViolation,
    /// Check constraint violation (`23514`).
    CheckViolation,
    /// The statement was canceled, including a `COPY` aborted by the client (`57014`).
    QueryCanceled,
    /// Any other error.
    Other,
}

impl ErrorKind {
    /// Classify a SQLSTATE code.
    pub fn from_sqlstate(code: &str) -> Self {
        match code {
            "23505" => ErrorKind::UniqueViolation,
            "23503" => ErrorKind::ForeignKeyViolation,
            "23502" => ErrorKind::NotNullViolation,
            "23514" => ErrorKind::CheckViolation,
            "57014" => ErrorKind::QueryCanceled,
            _ => ErrorKind::Other,
        }
    }
}

/// An error that was returned from the database.
pub trait DatabaseError: 'static + StdError + Send + Sync {
    /// The primary, human-readable error message.
    fn message(&self) -> &str;

    /// The (SQLSTATE) code for the error.
    fn code(&self) -> Option<Cow<'_, str>> {
        None
    }

    /// The category of the error.
    fn kind(&self) -> ErrorKind {
        self.code()
            .map_or(ErrorKind::Other, |code| ErrorKind::from_sqlstate(&code))
    }
}

/// An error returned from the PostgreSQL server, with every diagnostic field the server sent.
///
/// Field text is decoded lossily: the binding layer does not know the client encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PgDatabaseError {
    status: Option<ExecStatus>,
    severity: Option<String>,
    severity_nonlocalized: Option<String>,
    code: Option<String>,
    message: String,
    detail: Option<String>,
    hint: Option<String>,
    position: Option<String>,
    internal_position: Option<String>,
    internal_query: Option<String>,
    context: Option<String>,
    schema: Option<String>,
    table: Option<String>,
    column: Option<String>,
    data_type: Option<String>,
    constraint: Option<String>,
    file: Option<String>,
    line: Option<String>,
    routine: Option<String>,
}

impl PgDatabaseError {
    pub(crate) fn from_result<E: Engine>(res: &ResultHandle<E>) -> Result<Self> {
        let field = |code| -> Result<Option<String>> {
            Ok(res
                .error_field(code)?
                .map(|value| String::from_utf8_lossy(value).into_owned()))
        };

        let message = match field(DiagnosticField::MessagePrimary)? {
            Some(message) => message,
            None => String::from_utf8_lossy(&res.error_message()?)
                .trim_end()
                .to_owned(),
        };

        Ok(Self {
            status: Some(res.status()?),
            severity: field(DiagnosticField::Severity)?,
            severity_nonlocalized: field(DiagnosticField::SeverityNonlocalized)?,
            code: field(DiagnosticField::Sqlstate)?,
            message,
            detail: field(DiagnosticField::MessageDetail)?,
            hint: field(DiagnosticField::MessageHint)?,
            position: field(DiagnosticField::StatementPosition)?,
            internal_position: field(DiagnosticField::InternalPosition)?,
            internal_query: field(DiagnosticField::InternalQuery)?,
            context: field(DiagnosticField::Context)?,
            schema: field(DiagnosticField::SchemaName)?,
            table: field(DiagnosticField::TableName)?,
            column: field(DiagnosticField::ColumnName)?,
            data_type: field(DiagnosticField::DatatypeName)?,
            constraint: field(DiagnosticField::ConstraintName)?,
            file: field(DiagnosticField::SourceFile)?,
            line: field(DiagnosticField::SourceLine)?,
            routine: field(DiagnosticField::SourceFunction)?,
        })
    }

    /// The status of the result the error was read from.
    pub fn status(&self) -> Option<ExecStatus> {
        self.status
    }

    /// The localized severity (`ERROR`, `FATAL`, `PANIC`, ...).
    pub fn severity(&self) -> Option<&str> {
        self.severity.as_deref()
    }

    /// The severity, never localized.
    pub fn severity_nonlocalized(&self) -> Option<&str> {
        self.severity_nonlocalized.as_deref()
    }

    /// The SQLSTATE code.
    pub fn sqlstate(&self) -> Option<&str> {
        self.code.as_deref()
    }

    /// Secondary message carrying more detail about the problem.
    pub fn detail(&self) -> Option<&str> {
        self.detail.as_deref()
    }

    /// Advice on what to do about the problem.
    pub fn hint(&self) -> Option<&str> {
        self.hint.as_deref()
    }

    /// Cursor position, in characters, into the original query string.
    pub fn position(&self) -> Option<&str> {
        self.position.as_deref()
    }

    /// Cursor position into an internally generated command.
    pub fn internal_position(&self) -> Option<&str> {
        self.internal_position.as_deref()
    }

    /// The text of a failed internally generated command.
    pub fn internal_query(&self) -> Option<&str> {
        self.internal_query.as_deref()
    }

    /// The call stack traceback of the active procedural language function or query.
    pub fn context(&self) -> Option<&str> {
        self.context.as_deref()
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn table(&self) -> Option<&str> {
        self.table.as_deref()
    }

    pub fn column(&self) -> Option<&str> {
        self.column.as_deref()
    }

    pub fn data_type(&self) -> Option<&str> {
        self.data_type.as_deref()
    }

    pub fn constraint(&self) -> Option<&str> {
        self.constraint.as_deref()
    }

    /// The server source file where the error was reported.
    pub fn file(&self) -> Option<&str> {
        self.file.as_deref()
    }

    pub fn line(&self) -> Option<&str> {
        self.line.as_deref()
    }

    pub fn routine(&self) -> Option<&str> {
        self.routine.as_deref()
    }
}

impl Display for PgDatabaseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match &self.code {
            Some(code) => write!(f, "{} (SQLSTATE {})", self.message, code),
            None => f.pad(&self.message),
        }
    }
}

impl StdError for PgDatabaseError {}

impl DatabaseError for PgDatabaseError {
    fn message(&self) -> &str {
        &self.message
    }

    fn code(&self) -> Option<Cow<'_, str>> {
        self.code.as_deref().map(Cow::Borrowed)
    }
}
