pub mod pool;
pub mod value;

pub use pool::{DbConn, DbPool, PoolManager};
pub use value::{Row, Rows, SqlValue};

use futures::TryStreamExt;
use pool::Pooled;
use sqlx::mysql::MySqlConnection;
use sqlx::postgres::PgConnection;
use sqlx::{Column, ColumnIndex, Decode, Either, Executor, TypeInfo, ValueRef};

#[derive(Debug, Default)]
pub struct Fetched {
    pub rows: Rows,
    /// At least one row came back (before the cap was applied).
    pub saw_rows: bool,
    pub truncated: bool,
}

impl Fetched {
    /// Keeps `row` while fewer than `max_rows` are held. Returns `false` once
    /// a row had to be dropped, and the caller stops reading.
    pub fn push_capped(&mut self, row: Row, max_rows: usize) -> bool {
        self.saw_rows = true;
        if self.rows.len() >= max_rows {
            self.truncated = true;
            return false;
        }
        self.rows.push(row);
        true
    }
}

// Same loop for both backends; only the connection and row types differ.
macro_rules! collect_capped {
    ($stream:expr, $max:expr, $decode:expr) => {{
        let mut stream = $stream;
        let mut out = Fetched::default();
        while let Some(item) = stream.try_next().await? {
            if let Either::Right(row) = item {
                if !out.push_capped(decode_row(&row, $decode)?, $max) {
                    break;
                }
            }
        }
        Ok(out)
    }};
}

// A bare `&str` carries no arguments, so both drivers send it over the
// simple/text protocol and every cell decodes as text.
async fn fetch_pg(
    conn: &mut PgConnection,
    sql: &str,
    max_rows: usize,
) -> Result<Fetched, sqlx::Error> {
    collect_capped!(conn.fetch_many(sql), max_rows, SqlValue::from_text)
}

async fn fetch_mysql(
    conn: &mut MySqlConnection,
    sql: &str,
    max_rows: usize,
) -> Result<Fetched, sqlx::Error> {
    collect_capped!(conn.fetch_many(sql), max_rows, SqlValue::from_mysql_text)
}

async fn execute_pg(conn: &mut PgConnection, sql: &str) -> Result<(), sqlx::Error> {
    conn.execute(sql).await.map(|_| ())
}

async fn execute_mysql(conn: &mut MySqlConnection, sql: &str) -> Result<(), sqlx::Error> {
    conn.execute(sql).await.map(|_| ())
}

impl DbConn {
    /// Run one statement over the simple-query protocol and collect at most
    /// `max_rows` rows.
    pub async fn fetch_capped(&mut self, sql: &str, max_rows: usize) -> Result<Fetched, sqlx::Error> {
        self.in_flight = true;
        let res = match &mut self.inner {
            Pooled::Postgres(c) => fetch_pg(c, sql, max_rows).await,
            Pooled::MySql(c) => fetch_mysql(c, sql, max_rows).await,
        };
        self.in_flight = false;
        res
    }

    pub async fn execute_simple(&mut self, sql: &str) -> Result<(), sqlx::Error> {
        self.in_flight = true;
        let res = match &mut self.inner {
            Pooled::Postgres(c) => execute_pg(c, sql).await,
            Pooled::MySql(c) => execute_mysql(c, sql).await,
        };
        self.in_flight = false;
        res
    }
}

fn decode_row<R>(row: &R, decode: fn(&str, String) -> SqlValue) -> Result<Row, sqlx::Error>
where
    R: sqlx::Row,
    usize: ColumnIndex<R>,
    for<'r> String: Decode<'r, R::Database>,
{
    let mut out = Vec::with_capacity(row.len());
    for i in 0..row.len() {
        if row.try_get_raw(i)?.is_null() {
            out.push(SqlValue::Null);
            continue;
        }
        let type_name = row.column(i).type_info().name().to_string();
        // Text protocol: every cell decodes as its textual form.
        let text: String = row.try_get_unchecked(i)?;
        out.push(decode(&type_name, text));
    }
    Ok(out)
}
