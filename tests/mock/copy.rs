use pqx::{
    ConnectionHandle, CopyOut, CopyPut, DatabaseError, Error, ErrorKind, ExecStatus,
    TransactionStatus,
};
use pqx_mock::{Fault, MockEngine};
use pqx_test::setup_if_needed;

const SAMPLE_TEXT: &[u8] = b"10\t20\thello\n40\t\\N\tworld\n";

const COPY_OUT_TEXT: &str = "copy (values (10::int, 20::int, 'hello'::text), (40, NULL, 'world')) \
                             to stdout (format text)";

const COPY_OUT_BINARY: &str = "copy (values (10::int, 20::int, 'hello'::text), (40, NULL, 'world')) \
                               to stdout (format binary)";

fn connect(engine: &MockEngine) -> anyhow::Result<ConnectionHandle<MockEngine>> {
    setup_if_needed();

    let mut conn = ConnectionHandle::connect(engine.clone(), "dbname=pqx")?;
    conn.exec("drop table if exists copy_in")?.error_for_status()?;
    conn.exec("create table copy_in (col1 int primary key, col2 int, data text)")?
        .error_for_status()?;

    Ok(conn)
}

fn copy_in(
    conn: &mut ConnectionHandle<MockEngine>,
    chunks: &[&[u8]],
) -> anyhow::Result<pqx::ResultHandle<MockEngine>> {
    let res = conn.exec("copy copy_in from stdin")?;
    assert_eq!(res.status()?, ExecStatus::CopyIn);

    for chunk in chunks {
        assert_eq!(conn.put_copy_data(chunk)?, CopyPut::Sent);
    }

    assert_eq!(conn.put_copy_end(None)?, CopyPut::Sent);

    let res = conn.get_result()?.expect("copy result");
    assert!(conn.get_result()?.is_none());

    Ok(res)
}

fn drain(conn: &mut ConnectionHandle<MockEngine>) -> anyhow::Result<Vec<Vec<u8>>> {
    let mut rows = Vec::new();

    loop {
        match conn.get_copy_data(false)? {
            CopyOut::Data(data) => rows.push(data.into_vec()),
            CopyOut::WouldBlock => anyhow::bail!("blocking copy would block"),
            CopyOut::Done => return Ok(rows),
        }
    }
}

#[test]
fn it_copies_text_in() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    let res = copy_in(&mut conn, &[SAMPLE_TEXT])?.error_for_status()?;

    assert_eq!(res.command_status()?, Some(&b"COPY 2"[..]));
    assert_eq!(res.command_tuples()?, Some(2));
    assert_eq!(engine.copy_in(), [SAMPLE_TEXT.to_vec()]);

    Ok(())
}

#[test]
fn it_passes_chunks_through_unchanged() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    let (head, tail) = SAMPLE_TEXT.split_at(5);

    let res = copy_in(&mut conn, &[head, tail])?.error_for_status()?;

    assert_eq!(res.command_tuples()?, Some(2));
    assert_eq!(engine.copy_in(), [head.to_vec(), tail.to_vec()]);

    Ok(())
}

#[test]
fn it_reports_a_failed_copy_in_transaction() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    copy_in(&mut conn, &[SAMPLE_TEXT])?.error_for_status()?;

    conn.exec("begin")?.error_for_status()?;

    let res = copy_in(&mut conn, &[SAMPLE_TEXT])?;
    assert_eq!(res.status()?, ExecStatus::FatalError);

    let err = res.error_for_status().unwrap_err();
    let err = err.as_database_error().expect("database error");

    assert_eq!(err.kind(), ErrorKind::UniqueViolation);
    assert_eq!(err.detail(), Some("Key (col1)=(10) already exists."));
    assert_eq!(err.context(), Some("COPY copy_in, line 1"));
    assert_eq!(err.constraint(), Some("copy_in_pkey"));

    assert_eq!(conn.transaction_status()?, TransactionStatus::InError);

    conn.exec("rollback")?.error_for_status()?;
    assert_eq!(conn.transaction_status()?, TransactionStatus::Idle);

    Ok(())
}

#[test]
fn it_aborts_copy_in_with_a_message() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    conn.exec("copy copy_in from stdin")?;
    conn.put_copy_data(b"10\t20\thello\n")?;
    conn.put_copy_end(Some(&b"aborted by the client"[..]))?;

    let res = conn.get_result()?.expect("copy result");
    let err = res.error_for_status().unwrap_err();
    let err = err.as_database_error().expect("database error");

    assert_eq!(err.code().as_deref(), Some("57014"));
    assert_eq!(err.kind(), ErrorKind::QueryCanceled);
    assert!(err.message().contains("aborted by the client"), "{err}");

    assert!(conn.get_result()?.is_none());

    Ok(())
}

#[test]
fn it_rejects_nul_in_the_abort_message() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    conn.exec("copy copy_in from stdin")?;

    let err = conn.put_copy_end(Some(&b"bad\0message"[..])).unwrap_err();
    assert_eq!(
        err.to_string(),
        "invalid argument: COPY error message contains a nul byte at position 3"
    );
    assert_eq!(engine.calls("put_copy_end"), 0);

    // still copying
    assert_eq!(conn.put_copy_end(None)?, CopyPut::Sent);

    Ok(())
}

#[test]
fn it_waits_while_the_send_buffer_is_full() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    conn.exec("copy copy_in from stdin")?;
    conn.set_nonblocking(true)?;

    engine.stall(1);
    assert_eq!(conn.put_copy_data(SAMPLE_TEXT)?, CopyPut::WouldBlock);
    assert_eq!(conn.put_copy_data(SAMPLE_TEXT)?, CopyPut::Sent);

    engine.stall(1);
    assert_eq!(conn.put_copy_end(None)?, CopyPut::WouldBlock);
    assert_eq!(conn.put_copy_end(None)?, CopyPut::Sent);

    assert_eq!(engine.copy_in(), [SAMPLE_TEXT.to_vec()]);

    Ok(())
}

#[test]
fn it_copies_text_out() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    engine.set_copy_out([&b"10\t20\thello\n"[..], b"40\t\\N\tworld\n"]);

    let res = conn.exec(COPY_OUT_TEXT)?;
    assert_eq!(res.status()?, ExecStatus::CopyOut);

    let rows = drain(&mut conn)?;
    assert_eq!(rows.concat(), SAMPLE_TEXT);

    let res = conn.get_result()?.expect("copy result");
    assert_eq!(res.command_status()?, Some(&b"COPY 2"[..]));
    assert!(conn.get_result()?.is_none());

    assert_eq!(engine.live().buffers, 0);

    Ok(())
}

#[test]
fn it_copies_binary_out() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    // the trailer arrives with the last row
    let rows = [
        hex::decode(concat!(
            "5047434f50590aff0d0a00",
            "00000000",
            "00000000",
            "0003",
            "00000004",
            "0000000a",
            "00000004",
            "00000014",
            "00000005",
            "68656c6c6f",
        ))?,
        hex::decode(concat!(
            "0003",
            "00000004",
            "00000028",
            "ffffffff",
            "00000005",
            "776f726c64",
            "ffff",
        ))?,
    ];

    engine.set_copy_out(rows.clone());

    conn.exec(COPY_OUT_BINARY)?;

    assert_eq!(drain(&mut conn)?, rows);

    let res = conn.get_result()?.expect("copy result");
    assert_eq!(res.command_tuples()?, Some(2));

    Ok(())
}

#[test]
fn it_holds_copy_data_until_dropped() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    engine.set_copy_out([&b"10\t20\thello\n"[..]]);
    conn.exec(COPY_OUT_TEXT)?;

    let CopyOut::Data(data) = conn.get_copy_data(false)? else {
        anyhow::bail!("expected a row");
    };

    assert_eq!(&*data, b"10\t20\thello\n");
    assert_eq!(engine.live().buffers, 1);

    drop(data);
    assert_eq!(engine.live().buffers, 0);

    Ok(())
}

#[test]
fn it_polls_copy_out_without_blocking() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    engine.set_copy_out([&b"10\t20\thello\n"[..]]);
    conn.exec(COPY_OUT_TEXT)?;

    engine.stall(2);

    assert!(matches!(conn.get_copy_data(true)?, CopyOut::WouldBlock));
    assert!(matches!(conn.get_copy_data(true)?, CopyOut::WouldBlock));
    assert!(matches!(conn.get_copy_data(true)?, CopyOut::Data(_)));
    assert!(matches!(conn.get_copy_data(true)?, CopyOut::Done));

    Ok(())
}

#[test]
fn it_fails_outside_of_copy() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    let err = conn.put_copy_data(SAMPLE_TEXT).unwrap_err();
    assert_eq!(err.to_string(), "sending COPY data failed: no COPY in progress");

    let err = conn.put_copy_end(None).unwrap_err();
    assert_eq!(err.to_string(), "ending COPY failed: no COPY in progress");

    let err = conn.get_copy_data(false).unwrap_err();
    assert!(matches!(err, Error::Protocol(_)), "{err:?}");
    assert_eq!(err.to_string(), "receiving COPY data failed: no COPY in progress");

    Ok(())
}

#[test]
fn it_reports_transport_failures_during_copy() -> anyhow::Result<()> {
    let engine = MockEngine::new();
    let mut conn = connect(&engine)?;

    conn.exec("copy copy_in from stdin")?;

    engine.inject(Fault::PutCopy);
    let err = conn.put_copy_data(SAMPLE_TEXT).unwrap_err();
    assert_eq!(
        err.to_string(),
        "sending COPY data failed: server closed the connection unexpectedly"
    );

    conn.put_copy_end(None)?;
    conn.get_result()?;

    engine.set_copy_out([&b"1\n"[..]]);
    conn.exec(COPY_OUT_TEXT)?;

    engine.inject(Fault::GetCopy);
    let err = conn.get_copy_data(false).unwrap_err();
    assert_eq!(
        err.to_string(),
        "receiving COPY data failed: could not receive data from server"
    );

    Ok(())
}
