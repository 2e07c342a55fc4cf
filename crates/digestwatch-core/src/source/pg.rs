//! PostgreSQL snapshot source backed by `pg_stat_statements`.
//!
//! One row per `(dbid, userid, queryid)`; top-level and nested entries of
//! the same statement (PG 14+) are summed. Counter mapping:
//!
//! | DigestStat      | pg_stat_statements                              |
//! |-----------------|-------------------------------------------------|
//! | `digest`        | `queryid`                                       |
//! | `text`          | `query` (normalized, `$n` placeholders)         |
//! | `sample`        | none, PostgreSQL keeps no literal samples       |
//! | `count`         | `calls`                                         |
//! | `rows_examined` | `shared_blks_hit + shared_blks_read` (pages)    |
//! | `rows_sent`     | `rows` of read statements                       |
//! | `rows_affected` | `rows` of every other statement                 |
//!
//! Because "examined" counts 8 KiB buffer pages here, the matching
//! bytes-per-row-examined estimator for this source is the page size.

use std::str::FromStr;
use std::time::Duration;

use postgres::{Client, Config, NoTls, Row};
use tracing::{debug, info};

use super::{SnapshotSource, SourceError};
use crate::model::{DigestKey, DigestStat, Snapshot};

/// Size of one buffer page, the unit `rows_examined` is counted in.
pub const PAGE_SIZE: u64 = 8192;

const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const STATEMENTS_QUERY: &str = r#"
    SELECT
        s.dbid::bigint AS dbid,
        s.userid::bigint AS userid,
        s.queryid::text AS queryid,
        min(s.query) AS query,
        sum(s.calls)::bigint AS calls,
        sum(s.rows)::bigint AS rows,
        sum(s.shared_blks_hit + s.shared_blks_read)::bigint AS blks
    FROM pg_stat_statements s
    WHERE s.queryid IS NOT NULL
    GROUP BY s.dbid, s.userid, s.queryid
"#;

/// Statement leaders whose `rows` are rows returned to the client.
const READ_KEYWORDS: [&str; 5] = ["SELECT", "WITH", "VALUES", "TABLE", "SHOW"];

/// Snapshot source reading `pg_stat_statements` over a single connection.
///
/// The connection is opened lazily and re-opened on the next call after a
/// failure.
pub struct PostgresSource {
    config: Config,
    client: Option<Client>,
    connect_timeout: Duration,
}

impl PostgresSource {
    /// Creates a source from a libpq `key=value` string or a `postgres://` URL.
    pub fn new(dsn: &str) -> Result<Self, SourceError> {
        let config = Config::from_str(dsn).map_err(|e| SourceError::Config(e.to_string()))?;
        Ok(Self {
            config,
            client: None,
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        })
    }

    /// Sets the timeout for (re)connecting. Default: 10 seconds.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    fn ensure_connected(&mut self, timeout: Duration) -> Result<&mut Client, SourceError> {
        if self.client.as_ref().is_some_and(Client::is_closed) {
            self.client = None;
        }

        if self.client.is_none() {
            let mut config = self.config.clone();
            config.connect_timeout(timeout);
            let client = config
                .connect(NoTls)
                .map_err(|e| SourceError::Connection(format_postgres_error(&e)))?;
            info!(source = %self.describe(), "connected");
            self.client = Some(client);
        }

        self.client.as_mut().ok_or(SourceError::Closed)
    }
}

impl SnapshotSource for PostgresSource {
    fn ping(&mut self, timeout: Duration) -> Result<(), SourceError> {
        let client = self.ensure_connected(timeout)?;
        let result = client
            .is_valid(timeout)
            .map_err(|e| SourceError::Connection(format_postgres_error(&e)));
        if result.is_err() {
            self.client = None;
        }
        result
    }

    fn snapshot(&mut self) -> Result<Snapshot, SourceError> {
        let timeout = self.connect_timeout;
        let client = self.ensure_connected(timeout)?;

        let rows = match client.query(STATEMENTS_QUERY, &[]) {
            Ok(rows) => rows,
            Err(e) => {
                let msg = format_postgres_error(&e);
                if e.as_db_error().is_none() {
                    // Transport-level failure: reconnect on the next call.
                    self.client = None;
                }
                return Err(SourceError::Query(msg));
            }
        };

        let mut snapshot = Snapshot::with_capacity(rows.len());
        for row in &rows {
            let (key, stat) = parse_row(row)?;
            snapshot.insert(key, stat);
        }

        debug!(digests = snapshot.len(), "pg_stat_statements collected");
        Ok(snapshot)
    }

    fn close(&mut self) -> Result<(), SourceError> {
        match self.client.take() {
            Some(client) => client
                .close()
                .map_err(|e| SourceError::Connection(format_postgres_error(&e))),
            None => Ok(()),
        }
    }

    fn describe(&self) -> String {
        let hosts: Vec<String> = self
            .config
            .get_hosts()
            .iter()
            .map(|h| match h {
                postgres::config::Host::Tcp(name) => name.clone(),
                #[cfg(unix)]
                postgres::config::Host::Unix(path) => path.display().to_string(),
            })
            .collect();
        format!(
            "postgres://{}/{}",
            hosts.join(","),
            self.config.get_dbname().unwrap_or_default()
        )
    }
}

fn parse_row(row: &Row) -> Result<(DigestKey, DigestStat), SourceError> {
    let col_err = |e: postgres::Error| SourceError::Query(format_postgres_error(&e));

    let dbid: i64 = row.try_get("dbid").map_err(col_err)?;
    let userid: i64 = row.try_get("userid").map_err(col_err)?;
    let queryid: String = row.try_get("queryid").map_err(col_err)?;
    let query: Option<String> = row.try_get("query").map_err(col_err)?;
    let calls: Option<i64> = row.try_get("calls").map_err(col_err)?;
    let rows: Option<i64> = row.try_get("rows").map_err(col_err)?;
    let blks: Option<i64> = row.try_get("blks").map_err(col_err)?;

    let text = query.unwrap_or_default();
    let rows = non_negative(rows);
    let (rows_sent, rows_affected) = if is_read_statement(&text) {
        (rows, 0)
    } else {
        (0, rows)
    };

    let key = DigestKey::new(format!("{dbid}:{userid}:{queryid}"));
    let stat = DigestStat {
        digest: queryid,
        text,
        sample: None,
        count: non_negative(calls),
        rows_examined: non_negative(blks),
        rows_sent,
        rows_affected,
    };
    Ok((key, stat))
}

fn non_negative(v: Option<i64>) -> u64 {
    v.unwrap_or(0).max(0) as u64
}

/// Whether the statement's leading keyword marks a read.
pub(crate) fn is_read_statement(text: &str) -> bool {
    let mut rest = text.trim_start();
    // Skip leading block and line comments.
    loop {
        if let Some(after) = rest.strip_prefix("/*") {
            rest = after.split_once("*/").map_or("", |(_, r)| r).trim_start();
        } else if let Some(after) = rest.strip_prefix("--") {
            rest = after.split_once('\n').map_or("", |(_, r)| r).trim_start();
        } else {
            break;
        }
    }
    rest = rest.trim_start_matches('(').trim_start();

    let word_len = rest
        .find(|c: char| !c.is_ascii_alphabetic())
        .unwrap_or(rest.len());
    let word = &rest[..word_len];
    READ_KEYWORDS
        .iter()
        .any(|kw| word.eq_ignore_ascii_case(kw))
}

/// Formats PostgreSQL error message for logs.
pub(crate) fn format_postgres_error(e: &postgres::Error) -> String {
    if let Some(db_error) = e.as_db_error() {
        format!("{}: {}", db_error.severity(), db_error.message())
    } else {
        let msg = e.to_string();
        if msg.contains("Connection refused") {
            "connection refused".to_string()
        } else if msg.contains("password authentication failed") {
            "password authentication failed".to_string()
        } else {
            msg
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_statements_are_recognized() {
        assert!(is_read_statement("SELECT 1"));
        assert!(is_read_statement("  select * from t"));
        assert!(is_read_statement("WITH x AS (SELECT 1) SELECT * FROM x"));
        assert!(is_read_statement("/* app=api */ SELECT $1"));
        assert!(is_read_statement("-- report\nSELECT count(*) FROM t"));
        assert!(is_read_statement("(SELECT 1) UNION (SELECT 2)"));
        assert!(is_read_statement("show work_mem"));
    }

    #[test]
    fn write_statements_are_not_reads() {
        assert!(!is_read_statement("INSERT INTO t VALUES ($1)"));
        assert!(!is_read_statement("UPDATE t SET a = $1"));
        assert!(!is_read_statement("DELETE FROM t"));
        assert!(!is_read_statement("SELECTED"));
        assert!(!is_read_statement(""));
        assert!(!is_read_statement("/* unterminated"));
    }

    #[test]
    fn page_sized_estimate_counts_page_bytes() {
        use crate::estimate::Estimator;
        use crate::model::DigestDelta;

        let estimator = Estimator {
            avg_bytes_per_row_examined: PAGE_SIZE,
            avg_bytes_per_row_sent: 200,
            read_threshold: 1 << 20,
            write_threshold: 1 << 20,
        };
        // 128 pages of 8 KiB are exactly 1 MiB of buffer traffic.
        let delta = DigestDelta {
            rows_examined: 128,
            count: 1,
            ..DigestDelta::default()
        };
        let verdict = estimator.evaluate(&delta);
        assert_eq!(verdict.offender.bytes_read, 1 << 20);
        assert!(verdict.alert);
    }

    #[test]
    fn new_rejects_bad_dsn() {
        assert!(matches!(
            PostgresSource::new("host=localhost port=notaport"),
            Err(SourceError::Config(_))
        ));
    }

    #[test]
    fn new_accepts_key_value_and_url() {
        let kv = PostgresSource::new("host=db1 user=app dbname=shop").unwrap();
        assert_eq!(kv.describe(), "postgres://db1/shop");

        let url = PostgresSource::new("postgres://app@db2:5433/orders").unwrap();
        assert_eq!(url.describe(), "postgres://db2/orders");
    }

    #[test]
    fn close_without_connection_is_ok() {
        let mut source = PostgresSource::new("host=localhost").unwrap();
        assert!(source.close().is_ok());
    }

    #[test]
    fn non_negative_clamps() {
        assert_eq!(non_negative(Some(-5)), 0);
        assert_eq!(non_negative(None), 0);
        assert_eq!(non_negative(Some(42)), 42);
    }
}
