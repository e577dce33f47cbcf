use pqx::{
    ConnStatus, ConnectionHandle, Conninfo, DatabaseError, DiagnosticField, ErrorKind, Escaping,
    ExecStatus, Format, Libpq, PgConnection, Ping, PollingStatus, TransactionStatus,
};
use pqx_test::{connect, database_url, ensure_table, execute};

fn new() -> anyhow::Result<PgConnection> {
    connect(Libpq)
}

#[test]
fn it_connects() -> anyhow::Result<()> {
    let mut conn = new()?;

    assert_eq!(conn.status()?, ConnStatus::Ok);
    assert_eq!(conn.transaction_status()?, TransactionStatus::Idle);
    assert_eq!(conn.protocol_version()?, 3);
    assert!(conn.server_version()? >= 90000);
    assert!(conn.backend_pid()? > 0);
    assert!(conn.socket()? >= 0);

    let res = conn.exec("select 1 + 1")?.error_for_status()?;

    assert_eq!(res.status()?, ExecStatus::TuplesOk);
    assert_eq!(res.get_value(0, 0)?, Some(&b"2"[..]));

    Ok(())
}

#[test]
fn it_pings() -> anyhow::Result<()> {
    assert_eq!(ConnectionHandle::ping(&Libpq, database_url()?)?, Ping::Ok);
    assert_eq!(ConnectionHandle::ping(&Libpq, "nosuchoption=1")?, Ping::NoAttempt);

    Ok(())
}

#[test]
fn it_polls_a_connection() -> anyhow::Result<()> {
    let mut conn = ConnectionHandle::connect_start(Libpq, database_url()?)?;

    // a real client would wait on the socket between polls
    let mut status = PollingStatus::Writing;
    for _ in 0..1000 {
        status = conn.connect_poll()?;

        if status.is_terminal() {
            break;
        }

        std::thread::sleep(std::time::Duration::from_millis(5));
    }

    assert_eq!(status, PollingStatus::Ok);
    assert_eq!(conn.status()?, ConnStatus::Ok);

    Ok(())
}

#[test]
fn it_returns_a_handle_for_a_failed_connection() -> anyhow::Result<()> {
    let conn = ConnectionHandle::connect(Libpq, "host=localhost port=1 connect_timeout=1")?;

    assert_eq!(conn.status()?, ConnStatus::Bad);
    assert!(!conn.error_message()?.is_empty());

    Ok(())
}

#[test]
fn it_reads_connection_parameters() -> anyhow::Result<()> {
    let conn = new()?;

    assert!(!conn.db()?.is_empty());
    assert!(!conn.user()?.is_empty());
    assert!(conn.parameter_status("server_version")?.is_some());
    assert_eq!(conn.parameter_status("no_such_parameter")?, None);

    let info = conn.info()?;
    assert!(info.iter().any(|option| option.keyword == b"dbname"));

    let defaults = Conninfo::get_defaults(&Libpq)?;
    assert!(defaults.iter().any(|option| option.keyword == b"port"));

    Ok(())
}

#[test]
fn it_executes_with_parameters() -> anyhow::Result<()> {
    let mut conn = new()?;

    let res = conn
        .exec_params(
            "select $1::int4 + 1, $2::text is null, $3::int4",
            &[Some(&b"41"[..]), None, Some(&7_i32.to_be_bytes()[..])],
            Some(&[23, 25, 23]),
            Some(&[Format::Text, Format::Text, Format::Binary]),
            Format::Text,
        )?
        .error_for_status()?;

    assert_eq!(res.get_value(0, 0)?, Some(&b"42"[..]));
    assert_eq!(res.get_value(0, 1)?, Some(&b"t"[..]));
    assert_eq!(res.get_value(0, 2)?, Some(&b"7"[..]));
    assert_eq!(res.ftype(0)?, 23);

    let res = conn
        .exec_params("select 7::int4", &[], None, None, Format::Binary)?
        .error_for_status()?;

    assert_eq!(res.binary_tuples()?, Format::Binary);
    assert_eq!(res.fsize(0)?, 4);
    assert_eq!(res.get_value(0, 0)?, Some(&7_i32.to_be_bytes()[..]));

    Ok(())
}

#[test]
fn it_prepares_statements() -> anyhow::Result<()> {
    let mut conn = new()?;

    conn.prepare("add_one", "select $1::int4 + 1, $2::text", None)?
        .error_for_status()?;

    let res = conn.describe_prepared("add_one")?.error_for_status()?;
    assert_eq!(res.nparams()?, 2);
    assert_eq!(res.param_type(0)?, 23);
    assert_eq!(res.param_type(1)?, 25);
    assert_eq!(res.nfields()?, 2);

    let res = conn
        .exec_prepared("add_one", &[Some(&b"1"[..]), None], None, Format::Text)?
        .error_for_status()?;
    assert_eq!(res.get_value(0, 0)?, Some(&b"2"[..]));
    assert_eq!(res.get_value(0, 1)?, None);

    let res = conn.exec_prepared("no_such_statement", &[], None, Format::Text)?;
    assert_eq!(res.error_field(DiagnosticField::Sqlstate)?, Some(&b"26000"[..]));

    Ok(())
}

#[test]
fn it_reports_database_errors() -> anyhow::Result<()> {
    let mut conn = new()?;

    ensure_table(&mut conn, "pqx_todos", "id int primary key, title text not null")?;
    execute(&mut conn, "insert into pqx_todos values (1, 'first')")?;

    let res = conn.exec("insert into pqx_todos values (1, 'again')")?;
    assert_eq!(res.status()?, ExecStatus::FatalError);

    let err = res.error_for_status().unwrap_err();
    let err = err.as_database_error().expect("database error");

    assert_eq!(err.kind(), ErrorKind::UniqueViolation);
    assert_eq!(err.code().as_deref(), Some("23505"));
    assert_eq!(err.table(), Some("pqx_todos"));
    assert_eq!(err.constraint(), Some("pqx_todos_pkey"));
    assert_eq!(err.severity(), Some("ERROR"));

    let res = conn.exec("insert into pqx_todos (id) values (2)")?;
    let err = res.error_for_status().unwrap_err();
    assert_eq!(
        err.as_database_error().map(DatabaseError::kind),
        Some(ErrorKind::NotNullViolation)
    );

    Ok(())
}

#[test]
fn it_tracks_transaction_status() -> anyhow::Result<()> {
    let mut conn = new()?;

    execute(&mut conn, "begin")?;
    assert_eq!(conn.transaction_status()?, TransactionStatus::InTrans);

    let res = conn.exec("select 1/0")?;
    assert_eq!(res.error_field(DiagnosticField::Sqlstate)?, Some(&b"22012"[..]));
    assert_eq!(conn.transaction_status()?, TransactionStatus::InError);

    execute(&mut conn, "rollback")?;
    assert_eq!(conn.transaction_status()?, TransactionStatus::Idle);

    Ok(())
}

#[test]
fn it_collects_every_result_of_a_query_string() -> anyhow::Result<()> {
    let mut conn = new()?;

    conn.send_query("select 1; select 2, 3")?;

    let mut shapes = Vec::new();
    while let Some(res) = conn.get_result()? {
        shapes.push((res.ntuples()?, res.nfields()?));
    }

    assert_eq!(shapes, [(1, 1), (1, 2)]);

    Ok(())
}

#[test]
fn it_returns_rows_one_at_a_time() -> anyhow::Result<()> {
    let mut conn = new()?;

    conn.send_query_params(
        "select generate_series(1, 3)",
        &[],
        None,
        None,
        Format::Text,
    )?;
    conn.set_single_row_mode()?;

    let mut statuses = Vec::new();
    while let Some(res) = conn.get_result()? {
        statuses.push(res.status()?);
    }

    assert_eq!(
        statuses,
        [
            ExecStatus::SingleTuple,
            ExecStatus::SingleTuple,
            ExecStatus::SingleTuple,
            ExecStatus::TuplesOk
        ]
    );

    Ok(())
}

#[test]
fn it_drives_a_query_without_blocking() -> anyhow::Result<()> {
    let mut conn = new()?;

    conn.set_nonblocking(true)?;
    conn.send_query("select pg_sleep(0.05), 1")?;

    while conn.flush()? {}

    while conn.is_busy()? {
        std::thread::sleep(std::time::Duration::from_millis(5));
        conn.consume_input()?;
    }

    let res = conn.get_result()?.expect("one result").error_for_status()?;
    assert_eq!(res.get_value(0, 1)?, Some(&b"1"[..]));
    assert!(conn.get_result()?.is_none());

    Ok(())
}

#[test]
fn it_resets() -> anyhow::Result<()> {
    let mut conn = new()?;
    let pid = conn.backend_pid()?;

    conn.reset()?;

    assert_eq!(conn.status()?, ConnStatus::Ok);
    assert_ne!(conn.backend_pid()?, pid);

    Ok(())
}

#[test]
fn it_escapes_bytea() -> anyhow::Result<()> {
    let mut conn = new()?;
    let data = b"\0\x01'\\\xff";

    let escaped = Escaping::with_conn(&mut conn).escape_bytea(data)?;
    assert_eq!(escaped, b"\\x0001275cff");

    let command = format!("select '{}'::bytea", String::from_utf8(escaped.clone())?);
    let res = conn.exec(command)?.error_for_status()?;
    let value = res.get_value(0, 0)?.unwrap_or_default();

    assert_eq!(Escaping::new(Libpq).unescape_bytea(value)?, data);

    Ok(())
}

#[test]
fn it_escapes_bytea_without_a_connection() -> anyhow::Result<()> {
    let mut conn = new()?;
    let data: Vec<u8> = (0..=255).collect();

    let mut escaping = Escaping::new(Libpq);
    let escaped = escaping.escape_bytea(&data)?;

    // meant for a literal with backslash escapes, not for decoding directly
    assert!(escaped.starts_with(b"\\\\000\\\\001"));
    assert_ne!(escaping.unescape_bytea(&escaped)?, data);

    let command = format!("select E'{}'::bytea", String::from_utf8(escaped)?);
    let res = conn.exec(command)?.error_for_status()?;
    let value = res.get_value(0, 0)?.unwrap_or_default();

    assert_eq!(escaping.unescape_bytea(value)?, data);

    Ok(())
}
