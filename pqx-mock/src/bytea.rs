//! The two text encodings of `bytea`.

use std::fmt::Write;

/// The escape format, as written without a connection.
///
/// Lacking a connection, the native engine assumes `standard_conforming_strings` is off: the
/// output is meant for an `E'...'` literal, so backslashes are doubled once more and quotes
/// are doubled. The output carries a trailing `NUL`, like the native engine's.
pub(crate) fn escape(data: &[u8]) -> Vec<u8> {
    let mut escaped = Vec::with_capacity(data.len() + 1);

    for &b in data {
        match b {
            0..=0x1f | 0x7f..=0xff => {
                escaped.extend_from_slice(format!("\\\\{b:03o}").as_bytes());
            }
            b'\'' => escaped.extend_from_slice(b"''"),
            b'\\' => escaped.extend_from_slice(b"\\\\\\\\"),
            _ => escaped.push(b),
        }
    }

    escaped.push(0);
    escaped
}

/// The hex format, with a trailing `NUL`.
pub(crate) fn escape_hex(data: &[u8]) -> Vec<u8> {
    let mut escaped = String::with_capacity(data.len() * 2 + 3);
    escaped.push_str("\\x");

    for b in data {
        let _ = write!(escaped, "{b:02x}");
    }

    let mut escaped = escaped.into_bytes();
    escaped.push(0);
    escaped
}

/// Decode either format.
pub(crate) fn unescape(text: &[u8]) -> Vec<u8> {
    if let Some(hex) = text.strip_prefix(b"\\x") {
        let digits: Vec<u8> = hex.iter().filter_map(|&c| hex_value(c)).collect();

        return digits
            .chunks_exact(2)
            .map(|pair| (pair[0] << 4) | pair[1])
            .collect();
    }

    let mut data = Vec::with_capacity(text.len());
    let mut rest = text;

    while let Some((&b, tail)) = rest.split_first() {
        rest = tail;

        if b != b'\\' {
            data.push(b);
            continue;
        }

        match rest {
            [b'\\', tail @ ..] => {
                data.push(b'\\');
                rest = tail;
            }
            [a @ b'0'..=b'3', b @ b'0'..=b'7', c @ b'0'..=b'7', tail @ ..] => {
                data.push(((a - b'0') << 6) | ((b - b'0') << 3) | (c - b'0'));
                rest = tail;
            }
            _ => {}
        }
    }

    data
}

fn hex_value(c: u8) -> Option<u8> {
    match c {
        b'0'..=b'9' => Some(c - b'0'),
        b'a'..=b'f' => Some(c - b'a' + 10),
        b'A'..=b'F' => Some(c - b'A' + 10),
        _ => None,
    }
}
