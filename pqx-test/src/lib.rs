use std::env;

use pqx_core::{ConnStatus, ConnectionHandle, Engine, ExecStatus};

use anyhow::{bail, Context};

pub fn setup_if_needed() {
    let _ = dotenvy::dotenv();
    let _ = env_logger::builder().is_test(true).try_init();
}

/// The server to test against, from `DATABASE_URL` (or `.env`).
pub fn database_url() -> anyhow::Result<String> {
    setup_if_needed();
    env::var("DATABASE_URL").context("DATABASE_URL must be set to run the tests")
}

// Make a new connection
// Ensure [dotenvy] and [env_logger] have been setup
pub fn connect<E: Engine>(engine: E) -> anyhow::Result<ConnectionHandle<E>> {
    let conn = ConnectionHandle::connect(engine, database_url()?)?;

    if conn.status()? != ConnStatus::Ok {
        bail!(
            "failed to connect: {}",
            String::from_utf8_lossy(conn.error_message()?).trim_end()
        );
    }

    Ok(conn)
}

/// Run a command that must succeed.
pub fn execute<E: Engine>(conn: &mut ConnectionHandle<E>, command: &str) -> anyhow::Result<()> {
    let res = conn.exec(command)?.error_for_status()?;

    if !matches!(res.status()?, ExecStatus::CommandOk | ExecStatus::TuplesOk) {
        bail!("{command:?} returned {:?}", res.status()?);
    }

    log::debug!("executed {command:?}");

    Ok(())
}

/// (Re)create an empty table.
pub fn ensure_table<E: Engine>(
    conn: &mut ConnectionHandle<E>,
    name: &str,
    definition: &str,
) -> anyhow::Result<()> {
    execute(conn, &format!("drop table if exists {name}"))?;
    execute(conn, &format!("create table {name} ({definition})"))
}
