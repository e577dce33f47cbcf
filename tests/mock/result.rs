use pqx::{ConnectionHandle, DiagnosticField, Error, ErrorKind, ExecStatus, Format};
use pqx_mock::{MockEngine, ResultData};
use pqx_test::setup_if_needed;

fn connect(engine: &MockEngine) -> anyhow::Result<ConnectionHandle<MockEngine>> {
    setup_if_needed();
    Ok(ConnectionHandle::connect(engine.clone(), "dbname=pqx")?)
}

fn todos() -> ResultData {
    ResultData::tuples(
        &[("id", 23), ("title", 25)],
        &[
            &[Some(&b"1"[..]), Some(&b"write tests"[..])],
            &[Some(&b"2"[..]), None],
        ],
    )
}

#[test]
fn it_reads_rows_and_columns() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    engine.respond(todos().with_table(16384));
    let res = conn.exec("select id, title from todos")?;

    assert_eq!(res.status()?, ExecStatus::TuplesOk);
    assert_eq!(res.ntuples()?, 2);
    assert_eq!(res.nfields()?, 2);

    assert_eq!(res.fname(0)?, Some(&b"id"[..]));
    assert_eq!(res.fname(1)?, Some(&b"title"[..]));
    assert_eq!(res.ftype(0)?, 23);
    assert_eq!(res.ftype(1)?, 25);
    assert_eq!(res.ftable(1)?, 16384);
    assert_eq!(res.ftablecol(1)?, 2);
    assert_eq!(res.fformat(0)?, Format::Text);
    assert_eq!(res.fmod(0)?, -1);
    assert_eq!(res.fsize(1)?, -1);
    assert_eq!(res.binary_tuples()?, Format::Text);

    assert_eq!(res.get_value(0, 1)?, Some(&b"write tests"[..]));
    assert_eq!(res.get_value(1, 0)?, Some(&b"2"[..]));
    assert_eq!(res.get_value(1, 1)?, None);

    assert_eq!(res.command_status()?, Some(&b"SELECT 2"[..]));
    assert_eq!(res.command_tuples()?, Some(2));

    Ok(())
}

#[test]
fn it_answers_out_of_range_lookups_with_sentinels() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    engine.respond(todos());
    let res = conn.exec("select id, title from todos")?;

    assert_eq!(res.fname(2)?, None);
    assert_eq!(res.fname(-1)?, None);
    assert_eq!(res.ftype(2)?, 0);
    assert_eq!(res.ftable(0)?, 0);
    assert_eq!(res.ftablecol(0)?, 0);
    assert_eq!(res.get_value(2, 0)?, None);
    assert_eq!(res.get_value(0, 5)?, None);
    assert_eq!(res.param_type(0)?, 0);

    Ok(())
}

#[test]
fn it_clears_once() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    let mut res = conn.exec("begin")?;
    assert_eq!(engine.live().results, 1);

    res.clear();
    res.clear();
    assert!(res.is_cleared());

    drop(res);

    assert_eq!(engine.calls("clear"), 1);
    assert_eq!(engine.live().results, 0);

    Ok(())
}

#[test]
fn it_fails_every_read_after_clear() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    engine.respond(todos());
    let mut res = conn.exec("select id, title from todos")?;
    res.clear();

    let calls = engine.total_calls();

    assert!(matches!(res.status(), Err(Error::ResultCleared)));
    assert!(matches!(res.ntuples(), Err(Error::ResultCleared)));
    assert!(matches!(res.fname(0), Err(Error::ResultCleared)));
    assert!(matches!(res.get_value(0, 0), Err(Error::ResultCleared)));
    assert!(matches!(res.error_message(), Err(Error::ResultCleared)));
    assert!(matches!(
        res.error_field(DiagnosticField::Sqlstate),
        Err(Error::ResultCleared)
    ));
    assert!(matches!(res.command_tuples(), Err(Error::ResultCleared)));

    assert_eq!(engine.total_calls(), calls);

    Ok(())
}

#[test]
fn it_releases_results_on_drop() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    {
        let _begin = conn.exec("begin")?;
        let _commit = conn.exec("commit")?;
        assert_eq!(engine.live().results, 2);
    }

    assert_eq!(engine.live().results, 0);
    assert_eq!(engine.calls("clear"), 2);

    Ok(())
}

#[test]
fn it_outlives_its_connection() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    engine.respond(todos());
    let res = conn.exec("select id, title from todos")?;

    conn.finish();
    drop(conn);

    assert_eq!(engine.live().conns, 0);
    assert_eq!(res.get_value(0, 0)?, Some(&b"1"[..]));

    drop(res);
    assert!(engine.live().is_empty());

    Ok(())
}

#[test]
fn it_reads_the_inserted_oid() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    engine.respond(ResultData::command_ok("INSERT 24601 1").with_oid(24601));
    let res = conn.exec("insert into todos values (3, 'oid')")?;

    assert_eq!(res.oid_value()?, 24601);
    assert_eq!(res.command_tuples()?, Some(1));

    let res = conn.exec("begin")?;
    assert_eq!(res.oid_value()?, 0);
    assert_eq!(res.command_tuples()?, None);

    Ok(())
}

#[test]
fn it_reads_binary_columns() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    engine.respond(
        ResultData::tuples(&[("id", 23)], &[&[Some(&[0, 0, 0, 1][..])]]).with_format(Format::Binary),
    );
    let res = conn.exec_params("select 1", &[], None, None, Format::Binary)?;

    assert_eq!(res.binary_tuples()?, Format::Binary);
    assert_eq!(res.fformat(0)?, Format::Binary);
    assert_eq!(res.fsize(0)?, 4);
    assert_eq!(res.get_value(0, 0)?, Some(&[0, 0, 0, 1][..]));

    Ok(())
}

#[test]
fn it_turns_error_results_into_database_errors() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    engine.respond(
        ResultData::error(
            "23505",
            "duplicate key value violates unique constraint \"todos_pkey\"",
        )
        .with_field(DiagnosticField::MessageDetail, "Key (id)=(1) already exists.")
        .with_field(DiagnosticField::SchemaName, "public")
        .with_field(DiagnosticField::TableName, "todos")
        .with_field(DiagnosticField::ConstraintName, "todos_pkey"),
    );

    let res = conn.exec("insert into todos values (1, 'again')")?;
    let err = res.error_for_status().unwrap_err();

    assert!(matches!(err, Error::Database(_)), "{err:?}");
    assert_eq!(
        err.to_string(),
        "error returned from database: duplicate key value violates unique constraint \"todos_pkey\" (SQLSTATE 23505)"
    );

    let err = err.as_database_error().expect("database error");

    assert_eq!(err.severity(), Some("ERROR"));
    assert_eq!(err.sqlstate(), Some("23505"));
    assert_eq!(err.detail(), Some("Key (id)=(1) already exists."));
    assert_eq!(err.schema(), Some("public"));
    assert_eq!(err.table(), Some("todos"));
    assert_eq!(err.constraint(), Some("todos_pkey"));
    assert_eq!(err.hint(), None);
    assert_eq!(pqx::DatabaseError::kind(err), ErrorKind::UniqueViolation);

    // released with the handle
    assert_eq!(engine.live().results, 0);

    Ok(())
}

#[test]
fn it_passes_successful_results_through() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    let res = conn.exec("begin")?.error_for_status()?;
    assert_eq!(res.command_status()?, Some(&b"BEGIN"[..]));

    let res = conn.make_empty_result(ExecStatus::EmptyQuery)?.error_for_status()?;
    assert_eq!(res.status()?, ExecStatus::EmptyQuery);

    let res = conn.make_empty_result(ExecStatus::NonfatalError)?;
    assert!(res.error_for_status().is_ok());

    let res = conn.make_empty_result(ExecStatus::BadResponse)?;
    assert!(res.error_for_status().is_err());

    Ok(())
}
