use std::ffi::{CStr, CString};
use std::os::raw::c_int;
use std::sync::Arc;

use pqx_core::{DiagnosticField, ExecStatus, Format, Oid};

/// Build a C string from arbitrary bytes, dropping any `NUL`.
pub(crate) fn c_str(bytes: impl Into<Vec<u8>>) -> CString {
    let mut bytes = bytes.into();
    bytes.retain(|&b| b != 0);

    CString::new(bytes).unwrap_or_default()
}

#[derive(Debug, Clone)]
pub(crate) struct Column {
    pub(crate) name: CString,
    pub(crate) table: Oid,
    pub(crate) table_column: c_int,
    pub(crate) format: Format,
    pub(crate) type_oid: Oid,
    pub(crate) modifier: c_int,
    pub(crate) size: c_int,
}

/// The content of a result the mock server produces.
///
/// Queue one with [`MockEngine::respond`][crate::MockEngine::respond] to answer the next
/// statement.
#[derive(Debug, Clone)]
pub struct ResultData {
    pub(crate) status: ExecStatus,
    pub(crate) columns: Vec<Column>,
    pub(crate) rows: Vec<Vec<Option<Vec<u8>>>>,
    pub(crate) params: Vec<Oid>,
    pub(crate) error_message: CString,
    pub(crate) fields: Vec<(DiagnosticField, CString)>,
    pub(crate) cmd_status: CString,
    pub(crate) cmd_tuples: CString,
    pub(crate) oid: Oid,
}

impl ResultData {
    pub fn new(status: ExecStatus) -> Self {
        Self {
            status,
            columns: Vec::new(),
            rows: Vec::new(),
            params: Vec::new(),
            error_message: CString::default(),
            fields: Vec::new(),
            cmd_status: CString::default(),
            cmd_tuples: CString::default(),
            oid: 0,
        }
    }

    /// A successful command with the given tag, e.g. `INSERT 0 1`.
    pub fn command_ok(tag: &str) -> Self {
        Self::new(ExecStatus::CommandOk).with_tag(tag)
    }

    /// Rows of a query; `columns` are `(name, type oid)` pairs.
    pub fn tuples(columns: &[(&str, Oid)], rows: &[&[Option<&[u8]>]]) -> Self {
        let mut data = Self::new(ExecStatus::TuplesOk).with_tag(&format!("SELECT {}", rows.len()));

        data.columns = columns
            .iter()
            .map(|&(name, type_oid)| Column {
                name: c_str(name),
                table: 0,
                table_column: 0,
                format: Format::Text,
                type_oid,
                modifier: -1,
                size: -1,
            })
            .collect();

        data.rows = rows
            .iter()
            .map(|row| row.iter().map(|value| value.map(<[u8]>::to_vec)).collect())
            .collect();

        data
    }

    /// An error reported by the server.
    pub fn error(sqlstate: &str, message: &str) -> Self {
        let mut data = Self::new(ExecStatus::FatalError);

        data.error_message = c_str(format!("ERROR:  {message}\n"));
        data.fields = vec![
            (DiagnosticField::Severity, c_str("ERROR")),
            (DiagnosticField::SeverityNonlocalized, c_str("ERROR")),
            (DiagnosticField::Sqlstate, c_str(sqlstate)),
            (DiagnosticField::MessagePrimary, c_str(message)),
        ];

        data
    }

    pub fn with_field(mut self, field: DiagnosticField, value: &str) -> Self {
        self.fields.retain(|(f, _)| *f != field);
        self.fields.push((field, c_str(value)));
        self
    }

    /// Set the command tag; the affected row count is taken from its last word.
    pub fn with_tag(mut self, tag: &str) -> Self {
        self.cmd_status = c_str(tag);

        let counted = matches!(
            tag.split_whitespace().next(),
            Some("INSERT" | "UPDATE" | "DELETE" | "SELECT" | "MERGE" | "MOVE" | "FETCH" | "COPY")
        );

        self.cmd_tuples = match tag.split_whitespace().last() {
            Some(count) if counted && count.bytes().all(|b| b.is_ascii_digit()) => c_str(count),
            _ => CString::default(),
        };

        self
    }

    /// Set the parameter types reported when describing a statement.
    pub fn with_params(mut self, params: &[Oid]) -> Self {
        self.params = params.to_vec();
        self
    }

    pub fn with_oid(mut self, oid: Oid) -> Self {
        self.oid = oid;
        self
    }

    /// Set the source table of every column.
    pub fn with_table(mut self, table: Oid) -> Self {
        for (index, column) in self.columns.iter_mut().enumerate() {
            column.table = table;
            column.table_column = c_int::try_from(index + 1).unwrap_or(c_int::MAX);
        }
        self
    }

    pub fn with_format(mut self, format: Format) -> Self {
        for column in &mut self.columns {
            column.format = format;
            if format == Format::Binary && column.size < 0 {
                column.size = 4;
            }
        }
        self
    }

    pub(crate) fn is_error(&self) -> bool {
        self.status.is_error()
    }

    /// Split rows into one `SingleTuple` result each, followed by an empty `TuplesOk`.
    pub(crate) fn into_single_rows(mut self) -> Vec<ResultData> {
        if self.status != ExecStatus::TuplesOk {
            return vec![self];
        }

        let rows = std::mem::take(&mut self.rows);

        let mut split: Vec<ResultData> = rows
            .into_iter()
            .map(|row| {
                let mut single = self.clone();
                single.status = ExecStatus::SingleTuple;
                single.rows = vec![row];
                single
            })
            .collect();

        split.push(self);
        split
    }
}

/// A result allocated by the mock engine.
#[derive(Debug, Clone)]
pub struct MockResult {
    data: Arc<ResultData>,
}

impl MockResult {
    pub(crate) fn new(data: ResultData) -> Self {
        Self {
            data: Arc::new(data),
        }
    }

    pub(crate) fn status(&self) -> c_int {
        self.data.status.to_native()
    }

    pub(crate) fn error_message(&self) -> &CStr {
        &self.data.error_message
    }

    pub(crate) fn error_field(&self, field: c_int) -> Option<&CStr> {
        self.data
            .fields
            .iter()
            .find(|(f, _)| f.to_native() == field)
            .map(|(_, value)| value.as_c_str())
    }

    pub(crate) fn ntuples(&self) -> c_int {
        c_int::try_from(self.data.rows.len()).unwrap_or(c_int::MAX)
    }

    pub(crate) fn nfields(&self) -> c_int {
        c_int::try_from(self.data.columns.len()).unwrap_or(c_int::MAX)
    }

    pub(crate) fn column(&self, column: c_int) -> Option<&Column> {
        usize::try_from(column)
            .ok()
            .and_then(|column| self.data.columns.get(column))
    }

    pub(crate) fn binary_tuples(&self) -> c_int {
        let binary = !self.data.columns.is_empty()
            && self.data.columns.iter().all(|c| c.format == Format::Binary);

        c_int::from(binary)
    }

    pub(crate) fn value(&self, row: c_int, column: c_int) -> Option<&[u8]> {
        let row = self.data.rows.get(usize::try_from(row).ok()?)?;
        row.get(usize::try_from(column).ok()?)?.as_deref()
    }

    pub(crate) fn nparams(&self) -> c_int {
        c_int::try_from(self.data.params.len()).unwrap_or(c_int::MAX)
    }

    pub(crate) fn param_type(&self, param: c_int) -> Oid {
        usize::try_from(param)
            .ok()
            .and_then(|param| self.data.params.get(param).copied())
            .unwrap_or(0)
    }

    pub(crate) fn cmd_status(&self) -> &CStr {
        &self.data.cmd_status
    }

    pub(crate) fn cmd_tuples(&self) -> &CStr {
        &self.data.cmd_tuples
    }

    pub(crate) fn oid(&self) -> Oid {
        self.data.oid
    }
}
