use std::ffi::CStr;
use std::fmt::{self, Debug, Formatter};
use std::os::raw::c_int;

use crate::engine::{Engine, Oid};
use crate::error::{Error, PgDatabaseError, Result};
use crate::status::{DiagnosticField, ExecStatus, Format};

/// Managed native result.
///
/// A result is immutable once produced: every accessor is a read, and cell data is handed out as
/// slices borrowed from the result itself. The native result is released exactly once, by
/// [`clear`][Self::clear] or when the handle is dropped; after that every accessor fails with
/// [`Error::ResultCleared`].
pub struct ResultHandle<E: Engine> {
    engine: E,
    res: Option<E::Result>,
}

impl<E: Engine> ResultHandle<E> {
    pub(crate) fn new(engine: E, res: E::Result) -> Self {
        Self {
            engine,
            res: Some(res),
        }
    }

    #[inline]
    fn res(&self) -> Result<&E::Result> {
        self.res.as_ref().ok_or(Error::ResultCleared)
    }

    /// Release the native result. Calling this more than once does nothing.
    pub fn clear(&mut self) {
        if let Some(res) = self.res.take() {
            self.engine.clear(res);
        }
    }

    /// Returns `true` once [`clear`][Self::clear] has run.
    pub fn is_cleared(&self) -> bool {
        self.res.is_none()
    }

    pub fn status(&self) -> Result<ExecStatus> {
        ExecStatus::from_native(self.engine.result_status(self.res()?))
    }

    /// The error message associated with the command, empty if there was no error.
    pub fn error_message(&self) -> Result<Vec<u8>> {
        Ok(self
            .engine
            .result_error_message(self.res()?)
            .map(|msg| msg.to_bytes().to_vec())
            .unwrap_or_default())
    }

    /// One field of the server error report, `None` if the server did not send it.
    pub fn error_field(&self, field: DiagnosticField) -> Result<Option<&[u8]>> {
        Ok(self
            .engine
            .result_error_field(self.res()?, field.to_native())
            .map(CStr::to_bytes))
    }

    /// Convert an error status into [`Error::Database`], with every field the server sent.
    ///
    /// Results with a non-error status are returned unchanged.
    pub fn error_for_status(self) -> Result<Self> {
        if self.status()?.is_error() {
            return Err(PgDatabaseError::from_result(&self)?.into());
        }

        Ok(self)
    }

    /// Number of rows.
    pub fn ntuples(&self) -> Result<c_int> {
        Ok(self.engine.ntuples(self.res()?))
    }

    /// Number of columns.
    pub fn nfields(&self) -> Result<c_int> {
        Ok(self.engine.nfields(self.res()?))
    }

    /// Name of a column, `None` if `column` is out of range.
    pub fn fname(&self, column: c_int) -> Result<Option<&[u8]>> {
        Ok(self.engine.fname(self.res()?, column).map(CStr::to_bytes))
    }

    /// OID of the table the column was fetched from, `0` if it is not a simple table reference.
    pub fn ftable(&self, column: c_int) -> Result<Oid> {
        Ok(self.engine.ftable(self.res()?, column))
    }

    pub fn ftablecol(&self, column: c_int) -> Result<c_int> {
        Ok(self.engine.ftablecol(self.res()?, column))
    }

    pub fn fformat(&self, column: c_int) -> Result<Format> {
        Format::from_native(self.engine.fformat(self.res()?, column))
    }

    pub fn ftype(&self, column: c_int) -> Result<Oid> {
        Ok(self.engine.ftype(self.res()?, column))
    }

    pub fn fmod(&self, column: c_int) -> Result<c_int> {
        Ok(self.engine.fmod(self.res()?, column))
    }

    pub fn fsize(&self, column: c_int) -> Result<c_int> {
        Ok(self.engine.fsize(self.res()?, column))
    }

    /// Returns [`Format::Binary`] if every column of the result is binary.
    pub fn binary_tuples(&self) -> Result<Format> {
        Format::from_native(self.engine.binary_tuples(self.res()?))
    }

    /// The raw content of one cell, `None` for SQL `NULL`.
    ///
    /// The slice points into the native result; nothing is copied.
    pub fn get_value(&self, row: c_int, column: c_int) -> Result<Option<&[u8]>> {
        Ok(self.engine.get_value(self.res()?, row, column))
    }

    /// Number of parameters of a described prepared statement.
    pub fn nparams(&self) -> Result<c_int> {
        Ok(self.engine.nparams(self.res()?))
    }

    pub fn param_type(&self, param: c_int) -> Result<Oid> {
        Ok(self.engine.param_type(self.res()?, param))
    }

    /// The command status tag, e.g. `INSERT 0 1`.
    pub fn command_status(&self) -> Result<Option<&[u8]>> {
        Ok(self.engine.cmd_status(self.res()?).map(CStr::to_bytes))
    }

    /// Number of rows affected by the command, `None` for commands that do not report one.
    pub fn command_tuples(&self) -> Result<Option<u64>> {
        let Some(tuples) = self.engine.cmd_tuples(self.res()?) else {
            return Ok(None);
        };

        let tuples = tuples.to_bytes();
        if tuples.is_empty() {
            return Ok(None);
        }

        atoi::atoi(tuples).map(Some).ok_or_else(|| {
            err_protocol!(
                "invalid affected row count: {:?}",
                String::from_utf8_lossy(tuples)
            )
        })
    }

    /// OID of the inserted row, `0` if there is none.
    pub fn oid_value(&self) -> Result<Oid> {
        Ok(self.engine.oid_value(self.res()?))
    }
}

impl<E: Engine> Drop for ResultHandle<E> {
    fn drop(&mut self) {
        self.clear();
    }
}

impl<E: Engine> Debug for ResultHandle<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ResultHandle");

        match self.status() {
            Ok(status) => s.field("status", &status),
            Err(_) => s.field("cleared", &true),
        };

        s.finish()
    }
}
