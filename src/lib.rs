#![cfg_attr(docsrs, feature(doc_cfg))]
//! Safe, thin handles over the libpq PostgreSQL client library.
//!
//! pqx owns the native connection and result objects, marshals query parameters into the arrays
//! libpq expects, and turns libpq's failure signals into [`Error`]s. It does not decode values,
//! pool connections or run an event loop: a [`PgConnection`] in non-blocking mode hands you its
//! [socket][ConnectionHandle::socket] to wait on with whatever reactor you use.
//!
//! ```rust,no_run
//! # #[cfg(feature = "libpq")]
//! # fn main() -> pqx::Result<()> {
//! use pqx::{ExecStatus, Format, Libpq, PgConnection};
//!
//! let mut conn = PgConnection::connect(Libpq, "host=localhost dbname=pqx")?;
//!
//! let res = conn
//!     .exec_params("select $1::int + 1", &[Some(&b"41"[..])], None, None, Format::Text)?
//!     .error_for_status()?;
//!
//! assert_eq!(res.status()?, ExecStatus::TuplesOk);
//! assert_eq!(res.get_value(0, 0)?, Some(&b"42"[..]));
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "libpq"))]
//! # fn main() {}
//! ```
//!
//! Every handle is generic over an [`Engine`], the seam to the native library. The `libpq`
//! feature provides the real one; `pqx-mock` provides an in-process fake for tests.

pub use pqx_core::*;

#[cfg(feature = "libpq")]
#[cfg_attr(docsrs, doc(cfg(feature = "libpq")))]
pub use pqx_libpq::{self as libpq, Libpq};

/// A connection through libpq.
#[cfg(feature = "libpq")]
#[cfg_attr(docsrs, doc(cfg(feature = "libpq")))]
pub type PgConnection = ConnectionHandle<Libpq>;

/// A result produced by libpq.
#[cfg(feature = "libpq")]
#[cfg_attr(docsrs, doc(cfg(feature = "libpq")))]
pub type PgResult = ResultHandle<Libpq>;
