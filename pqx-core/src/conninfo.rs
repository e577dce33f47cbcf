//! Connection option discovery and parsing.

use std::ffi::CStr;
use std::os::raw::c_int;

use crate::engine::{Engine, RawConninfoOption};
use crate::error::{Error, Result};
use crate::params::c_string;

/// One connection option known to the native engine, with its current value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConninfoOption {
    /// The keyword used in a conninfo string, e.g. `dbname`.
    pub keyword: Vec<u8>,
    /// The environment variable consulted when the option is not given.
    pub envvar: Option<Vec<u8>>,
    /// The compiled-in default.
    pub compiled: Option<Vec<u8>>,
    pub val: Option<Vec<u8>>,
    pub label: Option<Vec<u8>>,
    /// `""` for a normal option, `"*"` for a password, `"D"` for a debug option.
    pub dispchar: Vec<u8>,
    pub dispsize: c_int,
}

impl ConninfoOption {
    fn from_raw(keyword: &CStr, raw: RawConninfoOption<'_>) -> Self {
        let owned = |value: Option<&CStr>| value.map(|value| value.to_bytes().to_vec());

        Self {
            keyword: keyword.to_bytes().to_vec(),
            envvar: owned(raw.envvar),
            compiled: owned(raw.compiled),
            val: owned(raw.val),
            label: owned(raw.label),
            dispchar: owned(raw.dispchar).unwrap_or_default(),
            dispsize: raw.dispsize,
        }
    }

    /// Returns `true` for options that should be hidden, such as passwords.
    pub fn is_secret(&self) -> bool {
        self.dispchar == b"*"
    }
}

/// Frees a native option array on every exit path.
struct OptionsGuard<'e, E: Engine> {
    engine: &'e E,
    options: Option<E::Options>,
}

impl<E: Engine> Drop for OptionsGuard<'_, E> {
    fn drop(&mut self) {
        if let Some(options) = self.options.take() {
            self.engine.conninfo_free(options);
        }
    }
}

/// Copy every option out of a native option array, then free it.
pub(crate) fn collect<E: Engine>(engine: &E, options: E::Options) -> Vec<ConninfoOption> {
    let guard = OptionsGuard {
        engine,
        options: Some(options),
    };

    let mut collected = Vec::new();

    if let Some(options) = &guard.options {
        while let Some(raw) = engine.conninfo_option(options, collected.len()) {
            let Some(keyword) = raw.keyword else {
                break;
            };

            collected.push(ConninfoOption::from_raw(keyword, raw));
        }
    }

    collected
}

/// Access to the connection options of the native engine.
pub struct Conninfo;

impl Conninfo {
    /// Every option the native engine knows, with its default value.
    pub fn get_defaults<E: Engine>(engine: &E) -> Result<Vec<ConninfoOption>> {
        let options = engine
            .conndefaults()
            .ok_or_else(|| Error::allocation("couldn't allocate connection options"))?;

        Ok(collect(engine, options))
    }

    /// Parse a conninfo string, either `key=value` pairs or a `postgresql://` URI.
    ///
    /// The result lists every known option; options not set by `conninfo` have no value.
    pub fn parse<E: Engine>(engine: &E, conninfo: impl AsRef<[u8]>) -> Result<Vec<ConninfoOption>> {
        let conninfo = c_string("conninfo", conninfo.as_ref())?;

        let mut errmsg = None;
        let options = engine.conninfo_parse(&conninfo, &mut errmsg);

        match (options, errmsg) {
            (Some(options), _) => Ok(collect(engine, options)),
            (None, Some(errmsg)) => {
                let errmsg = String::from_utf8_lossy(errmsg.as_ref());

                Err(err_protocol!(
                    "invalid conninfo: {}",
                    errmsg.trim_end_matches('\0').trim_end()
                ))
            }
            (None, None) => Err(Error::allocation("couldn't allocate connection options")),
        }
    }
}
