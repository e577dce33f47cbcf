//! Core of pqx, safe handles over a native PostgreSQL client engine.
//!
//! The native engine itself is reached only through the [`Engine`] trait; see `pqx-libpq` for
//! the implementation over libpq.
#![warn(future_incompatible, rust_2018_idioms)]

#[macro_use]
pub mod error;

#[macro_use]
mod logger;

pub mod connection;
pub mod conninfo;
pub mod engine;
pub mod escape;
pub mod options;
pub mod params;
pub mod result;
pub mod status;

#[doc(inline)]
pub use self::{
    connection::{ConnectionHandle, CopyData, CopyOut, CopyPut},
    conninfo::{Conninfo, ConninfoOption},
    engine::{ConnInt, ConnStr, Engine, Oid, RawConninfoOption},
    error::{DatabaseError, Error, ErrorKind, PgDatabaseError, Result},
    escape::Escaping,
    logger::LogSettings,
    options::{ConnectOptions, PgSslMode},
    params::QueryParams,
    result::ResultHandle,
    status::{ConnStatus, DiagnosticField, ExecStatus, Format, Ping, PollingStatus, TransactionStatus},
};

pub use log::LevelFilter;
