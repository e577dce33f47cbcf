use std::fmt::{self, Debug, Formatter};
use std::ops::Deref;

use crate::connection::ConnectionHandle;
use crate::engine::Engine;
use crate::error::Result;
use crate::params::c_string;

/// Outcome of pushing data during `COPY FROM STDIN`.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum CopyPut {
    /// The data was queued for sending.
    Sent,
    /// The send buffer is full; wait for the socket to become writable and try again.
    ///
    /// Only returned in non-blocking mode.
    WouldBlock,
}

/// Outcome of pulling data during `COPY TO STDOUT`.
pub enum CopyOut<E: Engine> {
    /// One row of data, exactly as sent by the server.
    Data(CopyData<E>),
    /// No complete row is available yet; wait for the socket to become readable, call
    /// [`consume_input`][ConnectionHandle::consume_input] and try again.
    ///
    /// Only returned in non-blocking mode.
    WouldBlock,
    /// The copy is complete. Collect its final status with
    /// [`get_result`][ConnectionHandle::get_result].
    Done,
}

/// A chunk of `COPY` data in memory allocated by the native engine.
///
/// The memory is released when this is dropped.
pub struct CopyData<E: Engine> {
    buffer: E::Buffer,
    len: usize,
}

impl<E: Engine> CopyData<E> {
    pub fn into_vec(self) -> Vec<u8> {
        self.to_vec()
    }
}

impl<E: Engine> Deref for CopyData<E> {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        let buffer = self.buffer.as_ref();
        buffer.get(..self.len).unwrap_or(buffer)
    }
}

impl<E: Engine> AsRef<[u8]> for CopyData<E> {
    fn as_ref(&self) -> &[u8] {
        self
    }
}

impl<E: Engine> Debug for CopyData<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("CopyData")
            .field(&String::from_utf8_lossy(self))
            .finish()
    }
}

impl<E: Engine> Debug for CopyOut<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CopyOut::Data(data) => f.debug_tuple("Data").field(data).finish(),
            CopyOut::WouldBlock => f.write_str("WouldBlock"),
            CopyOut::Done => f.write_str("Done"),
        }
    }
}

impl<E: Engine> ConnectionHandle<E> {
    /// Send a chunk of data while the connection is in the `COPY_IN` state.
    ///
    /// Chunks are passed on as given; rows may span several chunks.
    pub fn put_copy_data(&mut self, data: &[u8]) -> Result<CopyPut> {
        let sent = self.with_conn(|engine, conn| engine.put_copy_data(conn, data))?;

        match sent {
            1 => {
                tracing::trace!(target: "pqx::copy", len = data.len(), "copy data sent");
                Ok(CopyPut::Sent)
            }
            0 => Ok(CopyPut::WouldBlock),
            -1 => Err(self.protocol_error("sending COPY data failed")),
            n => Err(err_protocol!("unexpected result from PQputCopyData: {n}")),
        }
    }

    /// Signal the end of `COPY_IN` data.
    ///
    /// With an `error`, the server aborts the copy and fails it with that message; the
    /// surrounding transaction is left in the error state.
    pub fn put_copy_end(&mut self, error: Option<&[u8]>) -> Result<CopyPut> {
        let error = error
            .map(|error| c_string("COPY error message", error))
            .transpose()?;

        let sent = self.with_conn(|engine, conn| engine.put_copy_end(conn, error.as_deref()))?;

        match sent {
            1 => {
                if let Some(error) = &error {
                    tracing::debug!(
                        target: "pqx::copy",
                        reason = %error.to_string_lossy(),
                        "copy aborted by client"
                    );
                } else {
                    tracing::trace!(target: "pqx::copy", "copy end sent");
                }

                Ok(CopyPut::Sent)
            }
            0 => Ok(CopyPut::WouldBlock),
            -1 => Err(self.protocol_error("ending COPY failed")),
            n => Err(err_protocol!("unexpected result from PQputCopyEnd: {n}")),
        }
    }

    /// Receive one row of data while the connection is in the `COPY_OUT` state.
    pub fn get_copy_data(&mut self, nonblocking: bool) -> Result<CopyOut<E>> {
        let mut buffer = None;

        let received =
            self.with_conn(|engine, conn| engine.get_copy_data(conn, nonblocking, &mut buffer))?;

        match received {
            n if n > 0 => {
                let buffer = buffer.ok_or_else(|| err_protocol!("missing COPY data buffer"))?;
                let len = usize::try_from(n).unwrap_or_default();

                tracing::trace!(target: "pqx::copy", len, "copy data received");

                Ok(CopyOut::Data(CopyData { buffer, len }))
            }
            0 => Ok(CopyOut::WouldBlock),
            -1 => {
                tracing::trace!(target: "pqx::copy", "copy out done");
                Ok(CopyOut::Done)
            }
            -2 => Err(self.protocol_error("receiving COPY data failed")),
            n => Err(err_protocol!("unexpected result from PQgetCopyData: {n}")),
        }
    }
}
