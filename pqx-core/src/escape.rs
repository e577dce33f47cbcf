use crate::connection::ConnectionHandle;
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::params::c_string;

/// Escaping of binary data for use as a `bytea` literal.
///
/// Bound to a connection with [`with_conn`][Self::with_conn], escaping follows that
/// connection's settings (such as `standard_conforming_strings`) and fails once the
/// connection is closed. Its output decodes with [`unescape_bytea`][Self::unescape_bytea].
///
/// Created with [`new`][Self::new], escaping assumes `standard_conforming_strings` is off:
/// backslashes and quotes are doubled for an `E'...'` literal, and the output decodes only
/// after the server has parsed that literal.
pub struct Escaping<'c, E: Engine> {
    engine: E,
    conn: Option<&'c mut ConnectionHandle<E>>,
}

impl<'c, E: Engine> Escaping<'c, E> {
    pub fn new(engine: E) -> Self {
        Self { engine, conn: None }
    }

    pub fn with_conn(conn: &'c mut ConnectionHandle<E>) -> Self {
        Self {
            engine: conn.engine().clone(),
            conn: Some(conn),
        }
    }

    /// Escape `data` into the text form of a `bytea` literal.
    pub fn escape_bytea(&mut self, data: &[u8]) -> Result<Vec<u8>> {
        let escaped = match &mut self.conn {
            Some(conn) => conn.with_conn(|engine, conn| engine.escape_bytea_conn(conn, data))?,
            None => self.engine.escape_bytea(data),
        };

        let escaped = escaped.ok_or_else(|| Error::allocation("couldn't escape bytea"))?;

        // the reported length counts the terminator
        let escaped = escaped.as_ref();
        Ok(escaped.strip_suffix(b"\0").unwrap_or(escaped).to_vec())
    }

    /// Decode the text form of a `bytea` value.
    pub fn unescape_bytea(&self, data: &[u8]) -> Result<Vec<u8>> {
        let data = c_string("escaped bytea", data)?;

        let unescaped = self
            .engine
            .unescape_bytea(&data)
            .ok_or_else(|| Error::allocation("couldn't unescape bytea"))?;

        Ok(unescaped.as_ref().to_vec())
    }
}
