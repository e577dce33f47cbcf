//! What the mock server answers.
//!
//! Results queued with [`MockEngine::respond`][crate::MockEngine::respond] answer statements
//! first, in order. Otherwise the server understands transaction control, `COPY` and table
//! (re)creation, and acknowledges anything else with its command tag.

use std::collections::{HashSet, VecDeque};

use pqx_core::{DiagnosticField, ExecStatus, TransactionStatus};

use crate::conn::{CopyState, MockConn};
use crate::result::ResultData;
use crate::state::State;

/// Split a query string into its statements.
pub(crate) fn statements(command: &[u8]) -> Vec<&[u8]> {
    let statements: Vec<&[u8]> = command
        .split(|&b| b == b';')
        .filter(|statement| !statement.trim_ascii().is_empty())
        .collect();

    if statements.is_empty() {
        vec![command]
    } else {
        statements
    }
}

/// Run one statement.
pub(crate) fn execute(state: &mut State, conn: &mut MockConn, statement: &[u8]) -> ResultData {
    state.queries.push(statement.to_vec());

    let result = match state.responses.pop_front() {
        Some(result) => {
            match result.status {
                ExecStatus::CopyIn => begin_copy_in(conn, statement),
                ExecStatus::CopyOut => begin_copy_out(state, conn),
                _ => {}
            }

            result
        }
        None => answer(state, conn, statement),
    };

    if result.is_error() && conn.transaction == TransactionStatus::InTrans {
        conn.transaction = TransactionStatus::InError;
    }

    result
}

fn answer(state: &mut State, conn: &mut MockConn, statement: &[u8]) -> ResultData {
    let text = String::from_utf8_lossy(statement).to_lowercase();
    let words: Vec<&str> = text.split_whitespace().collect();

    let Some(&first) = words.first() else {
        return ResultData::new(ExecStatus::EmptyQuery);
    };

    if conn.transaction == TransactionStatus::InError
        && !matches!(first, "commit" | "end" | "rollback" | "abort")
    {
        return ResultData::error(
            "25P02",
            "current transaction is aborted, commands ignored until end of transaction block",
        );
    }

    match first {
        "begin" | "start" => {
            conn.transaction = TransactionStatus::InTrans;
            ResultData::command_ok("BEGIN")
        }
        "commit" | "end" => {
            let tag = match conn.transaction {
                TransactionStatus::InError => "ROLLBACK",
                _ => "COMMIT",
            };
            conn.transaction = TransactionStatus::Idle;
            ResultData::command_ok(tag)
        }
        "rollback" | "abort" => {
            conn.transaction = TransactionStatus::Idle;
            ResultData::command_ok("ROLLBACK")
        }
        "copy" if text.contains("from stdin") => {
            begin_copy_in(conn, statement);
            ResultData::new(ExecStatus::CopyIn)
        }
        "copy" if text.contains("to stdout") => {
            begin_copy_out(state, conn);
            ResultData::new(ExecStatus::CopyOut)
        }
        "drop" | "create" if words.get(1) == Some(&"table") => {
            if let Some(table) = table_name(&words) {
                state.keys.remove(table);
            }
            ResultData::command_ok(&format!("{} TABLE", first.to_uppercase()))
        }
        "select" => ResultData::tuples(&[], &[]),
        _ => ResultData::command_ok(&first.to_uppercase()),
    }
}

// `drop table [if exists] name` and `create table name (...)`
fn table_name<'w>(words: &[&'w str]) -> Option<&'w str> {
    let mut rest = words.get(2..)?;

    if rest.starts_with(&["if", "exists"]) {
        rest = &rest[2..];
    } else if rest.starts_with(&["if", "not", "exists"]) {
        rest = &rest[3..];
    }

    rest.first().copied().map(|name| name.split('(').next().unwrap_or(name))
}

fn begin_copy_in(conn: &mut MockConn, statement: &[u8]) {
    let text = String::from_utf8_lossy(statement).to_lowercase();

    let table = text
        .split_whitespace()
        .nth(1)
        .unwrap_or("copy")
        .split('(')
        .next()
        .unwrap_or("copy")
        .to_owned();

    conn.copy = CopyState::In {
        table,
        binary: text.contains("binary"),
        data: Vec::new(),
    };
}

fn begin_copy_out(state: &State, conn: &mut MockConn) {
    conn.copy = CopyState::Out {
        rows: state.copy_out.iter().cloned().collect::<VecDeque<_>>(),
        sent: 0,
    };
}

/// Finish `COPY FROM STDIN`, with the client's error message if it aborted the copy.
pub(crate) fn end_copy_in(state: &mut State, conn: &mut MockConn, error: Option<&str>) {
    let CopyState::In {
        table,
        binary,
        data,
    } = std::mem::take(&mut conn.copy)
    else {
        return;
    };

    let result = match error {
        Some(error) => ResultData::error("57014", &format!("COPY from stdin failed: {error}"))
            .with_field(DiagnosticField::Context, &format!("COPY {table}, line 1")),
        None if binary => match binary_rows(&data) {
            Some(rows) => ResultData::command_ok(&format!("COPY {rows}")),
            None => ResultData::error("22P04", "invalid COPY file header (missing signature)")
                .with_field(DiagnosticField::Context, &format!("COPY {table}, line 1")),
        },
        None => insert_text_rows(state, &table, &data),
    };

    if result.is_error() && conn.transaction == TransactionStatus::InTrans {
        conn.transaction = TransactionStatus::InError;
    }

    conn.pending.push_back(result);
}

// rows are keyed on their first column
fn insert_text_rows(state: &mut State, table: &str, data: &[u8]) -> ResultData {
    let keys = state.keys.entry(table.to_owned()).or_default();
    let mut added = HashSet::new();

    let rows: Vec<&[u8]> = data
        .split(|&b| b == b'\n')
        .filter(|row| !row.is_empty())
        .collect();

    for (line, row) in rows.iter().enumerate() {
        let key = row.split(|&b| b == b'\t').next().unwrap_or_default();

        if keys.contains(key) || !added.insert(key.to_vec()) {
            let key = String::from_utf8_lossy(key);

            return ResultData::error(
                "23505",
                &format!("duplicate key value violates unique constraint \"{table}_pkey\""),
            )
            .with_field(DiagnosticField::MessageDetail, &format!("Key (col1)=({key}) already exists."))
            .with_field(DiagnosticField::Context, &format!("COPY {table}, line {}", line + 1))
            .with_field(DiagnosticField::TableName, table)
            .with_field(DiagnosticField::ConstraintName, &format!("{table}_pkey"));
        }
    }

    keys.extend(added);

    ResultData::command_ok(&format!("COPY {}", rows.len()))
}

/// Count the tuples of binary `COPY` data, `None` if the data is malformed.
fn binary_rows(data: &[u8]) -> Option<usize> {
    const SIGNATURE: &[u8] = b"PGCOPY\n\xff\r\n\0";

    let rest = data.strip_prefix(SIGNATURE)?;
    let (_flags, rest) = rest.split_at_checked(4)?;
    let (extension, mut rest) = rest.split_at_checked(4)?;
    let extension = usize::try_from(u32::from_be_bytes(extension.try_into().ok()?)).ok()?;
    rest = rest.get(extension..)?;

    let mut rows = 0;

    loop {
        let (fields, tail) = rest.split_at_checked(2)?;
        rest = tail;

        let fields = i16::from_be_bytes(fields.try_into().ok()?);
        if fields == -1 {
            return Some(rows);
        }

        for _ in 0..fields {
            let (len, tail) = rest.split_at_checked(4)?;
            rest = tail;

            let len = i32::from_be_bytes(len.try_into().ok()?);
            if let Ok(len) = usize::try_from(len) {
                rest = rest.get(len..)?;
            }
        }

        rows += 1;
    }
}
