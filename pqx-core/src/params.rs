//! Marshalling of query parameters into the parallel arrays the native engine expects.

use std::ffi::CString;
use std::os::raw::{c_char, c_int};
use std::ptr;

use crate::engine::Oid;
use crate::error::{Error, Result};
use crate::status::Format;

/// Query parameters laid out as the native engine expects them.
///
/// The pointer, length, format and type arrays are positionally aligned: index `i` of each array
/// describes the same parameter. The number of parameters is always `values.len()`, and the
/// optional type and format arrays are rejected unless they have exactly that length.
///
/// Binary values are passed by pointer and borrowed for `'a`. Text values are read by the native
/// engine up to a terminating `NUL`, so each one is copied once into a terminated buffer owned
/// by this struct.
#[derive(Debug)]
pub struct QueryParams<'a> {
    values: Vec<Option<&'a [u8]>>,
    pointers: Vec<*const c_char>,
    lengths: Vec<c_int>,
    formats: Option<Vec<c_int>>,
    types: Option<Vec<Oid>>,
    result_format: Format,

    // keeps the terminated copies of text values alive for `pointers`
    text: Vec<CString>,
}

impl<'a> QueryParams<'a> {
    /// Marshal parameters for `exec_params`/`send_query_params`.
    pub fn new(
        values: &[Option<&'a [u8]>],
        types: Option<&[Oid]>,
        formats: Option<&[Format]>,
        result_format: Format,
    ) -> Result<Self> {
        let mut params = Self::marshal(values, formats, result_format)?;

        if let Some(types) = types {
            check_len("param_types", values.len(), types.len())?;
            params.types = Some(types.to_vec());
        }

        Ok(params)
    }

    /// Marshal parameters for executing a prepared statement.
    ///
    /// The parameter types were fixed when the statement was prepared, so no type array is built.
    pub fn prepared(
        values: &[Option<&'a [u8]>],
        formats: Option<&[Format]>,
        result_format: Format,
    ) -> Result<Self> {
        Self::marshal(values, formats, result_format)
    }

    fn marshal(
        values: &[Option<&'a [u8]>],
        formats: Option<&[Format]>,
        result_format: Format,
    ) -> Result<Self> {
        let nparams = values.len();
        check_count("parameters", nparams)?;

        if let Some(formats) = formats {
            check_len("param_formats", nparams, formats.len())?;
        }

        let mut params = QueryParams {
            values: values.to_vec(),
            pointers: Vec::with_capacity(nparams),
            lengths: Vec::with_capacity(nparams),
            formats: formats.map(|formats| formats.iter().map(|f| f.to_native()).collect()),
            types: None,
            result_format,
            text: Vec::new(),
        };

        for (index, value) in values.iter().enumerate() {
            let format = formats.map_or(Format::Text, |formats| formats[index]);

            let Some(value) = value else {
                params.pointers.push(ptr::null());
                params.lengths.push(0);
                continue;
            };

            let length = c_int::try_from(value.len()).map_err(|_| {
                Error::invalid_argument(format!(
                    "parameter {index} is too large: {} bytes",
                    value.len()
                ))
            })?;

            let pointer = match format {
                Format::Binary => value.as_ptr().cast::<c_char>(),
                Format::Text => {
                    let text = CString::new(*value).map_err(|_| {
                        Error::invalid_argument(format!(
                            "text parameter {index} contains a nul byte"
                        ))
                    })?;

                    // the heap allocation of a `CString` does not move with it
                    let pointer = text.as_ptr();
                    params.text.push(text);
                    pointer
                }
            };

            params.pointers.push(pointer);
            params.lengths.push(length);
        }

        Ok(params)
    }

    /// Number of parameters.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Number of parameters, as the native engine counts them.
    #[inline]
    pub fn nparams(&self) -> c_int {
        // checked to fit when marshalling
        c_int::try_from(self.values.len()).unwrap_or(c_int::MAX)
    }

    /// The value of parameter `index`, `None` for SQL `NULL` or past the end.
    pub fn value(&self, index: usize) -> Option<&'a [u8]> {
        self.values.get(index).copied().flatten()
    }

    /// Length of every value, `0` for SQL `NULL`.
    pub fn lengths(&self) -> &[c_int] {
        &self.lengths
    }

    /// Declared formats, if any were given.
    pub fn formats(&self) -> Option<&[c_int]> {
        self.formats.as_deref()
    }

    /// Declared types, if any were given.
    pub fn types(&self) -> Option<&[Oid]> {
        self.types.as_deref()
    }

    pub fn result_format(&self) -> Format {
        self.result_format
    }

    /// The value pointer array, or null when there are no parameters.
    ///
    /// Each entry is null for SQL `NULL`. Valid for as long as `self` is.
    pub fn values_ptr(&self) -> *const *const c_char {
        non_empty_ptr(&self.pointers)
    }

    /// The length array, or null when there are no parameters.
    pub fn lengths_ptr(&self) -> *const c_int {
        non_empty_ptr(&self.lengths)
    }

    /// The format array, or null when every parameter is text.
    pub fn formats_ptr(&self) -> *const c_int {
        self.formats.as_deref().map_or(ptr::null(), non_empty_ptr)
    }

    /// The type array, or null when the server should infer every type.
    pub fn types_ptr(&self) -> *const Oid {
        self.types.as_deref().map_or(ptr::null(), non_empty_ptr)
    }
}

/// Copy a byte string into a `NUL`-terminated one, rejecting interior `NUL` bytes.
pub(crate) fn c_string(what: &str, bytes: &[u8]) -> Result<CString> {
    CString::new(bytes).map_err(|err| {
        Error::invalid_argument(format!(
            "{what} contains a nul byte at position {}",
            err.nul_position()
        ))
    })
}

/// The types given when preparing a statement, checked to fit the native count.
pub(crate) fn statement_types(types: Option<&[Oid]>) -> Result<&[Oid]> {
    let types = types.unwrap_or_default();
    check_count("param_types", types.len())?;

    Ok(types)
}

fn check_count(what: &str, n: usize) -> Result<c_int> {
    c_int::try_from(n).map_err(|_| Error::invalid_argument(format!("too many {what}: {n}")))
}

fn check_len(what: &str, nparams: usize, len: usize) -> Result<()> {
    if len == nparams {
        Ok(())
    } else {
        Err(Error::invalid_argument(format!(
            "got {nparams} param_values but {len} {what}"
        )))
    }
}

fn non_empty_ptr<T>(slice: &[T]) -> *const T {
    if slice.is_empty() {
        ptr::null()
    } else {
        slice.as_ptr()
    }
}
