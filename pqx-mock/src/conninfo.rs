//! The connection options the mock engine understands, and a conninfo parser for them.

use std::ffi::CString;
use std::os::raw::c_int;

use pqx_core::RawConninfoOption;

use crate::result::c_str;

struct Known {
    keyword: &'static str,
    envvar: Option<&'static str>,
    compiled: Option<&'static str>,
    label: &'static str,
    dispchar: &'static str,
    dispsize: c_int,
}

const fn known(
    keyword: &'static str,
    envvar: Option<&'static str>,
    compiled: Option<&'static str>,
    label: &'static str,
    dispchar: &'static str,
    dispsize: c_int,
) -> Known {
    Known {
        keyword,
        envvar,
        compiled,
        label,
        dispchar,
        dispsize,
    }
}

const KNOWN: &[Known] = &[
    known("user", Some("PGUSER"), None, "Database-User", "", 20),
    known("password", Some("PGPASSWORD"), None, "Database-Password", "*", 20),
    known("passfile", Some("PGPASSFILE"), None, "Database-Password-File", "", 64),
    known("connect_timeout", Some("PGCONNECT_TIMEOUT"), None, "Connect-timeout", "", 10),
    known("dbname", Some("PGDATABASE"), None, "Database-Name", "", 20),
    known("host", Some("PGHOST"), None, "Database-Host", "", 40),
    known("hostaddr", Some("PGHOSTADDR"), None, "Database-Host-IP-Address", "", 45),
    known("port", Some("PGPORT"), Some("5432"), "Database-Port", "", 6),
    known("client_encoding", Some("PGCLIENTENCODING"), None, "Client-Encoding", "", 10),
    known("options", Some("PGOPTIONS"), None, "Backend-Options", "", 40),
    known("application_name", Some("PGAPPNAME"), None, "Application-Name", "", 64),
    known("keepalives", None, None, "TCP-Keepalives", "", 1),
    known("sslmode", Some("PGSSLMODE"), Some("prefer"), "SSL-Mode", "", 12),
    known("sslrootcert", Some("PGSSLROOTCERT"), None, "SSL-Root-Certificate", "", 64),
    known(
        "target_session_attrs",
        Some("PGTARGETSESSIONATTRS"),
        Some("any"),
        "Target-Session-Attrs",
        "",
        15,
    ),
];

/// An array of connection options allocated by the mock engine.
#[derive(Debug)]
pub struct MockOptions {
    entries: Vec<Entry>,
}

#[derive(Debug)]
struct Entry {
    keyword: CString,
    envvar: Option<CString>,
    compiled: Option<CString>,
    val: Option<CString>,
    label: CString,
    dispchar: CString,
    dispsize: c_int,
}

impl MockOptions {
    /// Every known option; `value` supplies the value of each one.
    pub(crate) fn new(value: impl Fn(&str, Option<&str>) -> Option<String>) -> Self {
        let entries = KNOWN
            .iter()
            .map(|known| Entry {
                keyword: c_str(known.keyword),
                envvar: known.envvar.map(c_str),
                compiled: known.compiled.map(c_str),
                val: value(known.keyword, known.compiled).map(c_str),
                label: c_str(known.label),
                dispchar: c_str(known.dispchar),
                dispsize: known.dispsize,
            })
            .collect();

        Self { entries }
    }

    pub(crate) fn get(&self, index: usize) -> Option<RawConninfoOption<'_>> {
        let entry = self.entries.get(index)?;

        Some(RawConninfoOption {
            keyword: Some(&entry.keyword),
            envvar: entry.envvar.as_deref(),
            compiled: entry.compiled.as_deref(),
            val: entry.val.as_deref(),
            label: Some(&entry.label),
            dispchar: Some(&entry.dispchar),
            dispsize: entry.dispsize,
        })
    }
}

/// Parsed `keyword = value` pairs, in the order given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub(crate) struct Params(Vec<(String, String)>);

impl Params {
    pub(crate) fn get(&self, keyword: &str) -> Option<&str> {
        self.0
            .iter()
            .rev()
            .find(|(k, _)| k == keyword)
            .map(|(_, v)| v.as_str())
    }

    fn push(&mut self, keyword: &str, value: String) -> Result<(), String> {
        if !KNOWN.iter().any(|known| known.keyword == keyword) {
            return Err(format!("invalid connection option \"{keyword}\"\n"));
        }

        self.0.push((keyword.to_owned(), value));
        Ok(())
    }
}

/// Parse a conninfo string into its parameters, or the error message of the native parser.
pub(crate) fn parse(conninfo: &str) -> Result<Params, String> {
    let uri = conninfo
        .strip_prefix("postgresql://")
        .or_else(|| conninfo.strip_prefix("postgres://"));

    match uri {
        Some(uri) => parse_uri(uri),
        None => parse_pairs(conninfo),
    }
}

fn parse_pairs(conninfo: &str) -> Result<Params, String> {
    let mut params = Params::default();
    let mut chars = conninfo.chars().peekable();

    loop {
        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        if chars.peek().is_none() {
            return Ok(params);
        }

        let mut keyword = String::new();
        while let Some(c) = chars.next_if(|c| *c != '=' && !c.is_whitespace()) {
            keyword.push(c);
        }

        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        if chars.next() != Some('=') {
            return Err(format!(
                "missing \"=\" after \"{keyword}\" in connection info string\n"
            ));
        }

        while chars.next_if(|c| c.is_whitespace()).is_some() {}

        let mut value = String::new();

        if chars.next_if_eq(&'\'').is_some() {
            loop {
                match chars.next() {
                    Some('\'') => break,
                    Some('\\') => {
                        if let Some(c) = chars.next() {
                            value.push(c);
                        }
                    }
                    Some(c) => value.push(c),
                    None => {
                        return Err("unterminated quoted string in connection info string\n".into())
                    }
                }
            }
        } else {
            while let Some(c) = chars.next_if(|c| !c.is_whitespace()) {
                if c == '\\' {
                    if let Some(c) = chars.next() {
                        value.push(c);
                    }
                } else {
                    value.push(c);
                }
            }
        }

        params.push(&keyword, value)?;
    }
}

fn parse_uri(uri: &str) -> Result<Params, String> {
    let mut params = Params::default();

    let (rest, query) = uri.split_once('?').unwrap_or((uri, ""));
    let (authority, dbname) = rest.split_once('/').unwrap_or((rest, ""));

    let hostport = match authority.rsplit_once('@') {
        Some((userinfo, hostport)) => {
            let (user, password) = match userinfo.split_once(':') {
                Some((user, password)) => (user, Some(password)),
                None => (userinfo, None),
            };

            if !user.is_empty() {
                params.push("user", user.to_owned())?;
            }
            if let Some(password) = password {
                params.push("password", password.to_owned())?;
            }

            hostport
        }
        None => authority,
    };

    let (host, port) = match hostport.strip_prefix('[') {
        Some(bracketed) => match bracketed.split_once(']') {
            Some((host, port)) => (host, port.strip_prefix(':')),
            None => (bracketed, None),
        },
        None => match hostport.split_once(':') {
            Some((host, port)) => (host, Some(port)),
            None => (hostport, None),
        },
    };

    if !host.is_empty() {
        params.push("host", host.to_owned())?;
    }
    if let Some(port) = port {
        params.push("port", port.to_owned())?;
    }
    if !dbname.is_empty() {
        params.push("dbname", dbname.to_owned())?;
    }

    for pair in query.split('&').filter(|pair| !pair.is_empty()) {
        let Some((keyword, value)) = pair.split_once('=') else {
            return Err(format!(
                "missing key/value separator \"=\" in URI query parameter: \"{pair}\"\n"
            ));
        };

        params.push(keyword, value.to_owned())?;
    }

    Ok(params)
}
