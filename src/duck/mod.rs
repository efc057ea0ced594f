use anyhow::{bail, Context, Result};
use duckdb::types::{TimeUnit, Value};
use duckdb::{params_from_iter, Connection, Statement};
use std::path::Path;
use tracing::debug;

use crate::extract::value::{Column, ColumnKind, FieldValue, RowRecord};

/// Open a DuckDB database on disk at `path`, creating the file if it doesn't exist.
pub fn open_disk_db(path: impl AsRef<Path>) -> Result<Connection> {
    let path = path.as_ref();
    let conn = Connection::open(path)
        .with_context(|| format!("opening DuckDB database {}", path.display()))?;
    Ok(conn)
}

/// Open a DuckDB in-memory database.
pub fn open_mem_db() -> Result<Connection> {
    let conn = Connection::open_in_memory()?;
    Ok(conn)
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn duckdb_type(kind: ColumnKind) -> &'static str {
    match kind {
        ColumnKind::Text => "VARCHAR",
        ColumnKind::Integer => "BIGINT",
        ColumnKind::Real => "DOUBLE",
        ColumnKind::Boolean => "BOOLEAN",
        ColumnKind::Timestamp => "TIMESTAMP",
    }
}

fn duckdb_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Null => Value::Null,
        FieldValue::Text(s) => Value::Text(s.clone()),
        FieldValue::Integer(i) => Value::BigInt(*i),
        FieldValue::Real(f) => Value::Double(*f),
        FieldValue::Boolean(b) => Value::Boolean(*b),
        FieldValue::Timestamp(ts) => Value::Timestamp(TimeUnit::Microsecond, ts.timestamp_micros()),
    }
}

/// Streams rows into one table, appending to whatever is already there.
/// Rows are written inside a single transaction committed by `finish`.
pub struct EventSink<'c> {
    conn: &'c Connection,
    insert: Statement<'c>,
    target: String,
    appended: u64,
}

impl<'c> EventSink<'c> {
    /// Create the target schema and table from the extractor's columns and
    /// prepare the append path.
    pub fn create(
        conn: &'c Connection,
        dataset: &str,
        table: &str,
        columns: &[Column],
    ) -> Result<Self> {
        if columns.is_empty() {
            bail!("cannot create `{dataset}.{table}` without a result schema");
        }

        let target = format!("{}.{}", quote_ident(dataset), quote_ident(table));
        let column_defs: Vec<String> = columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), duckdb_type(c.kind)))
            .collect();
        let ddl = format!(
            "CREATE SCHEMA IF NOT EXISTS {};\n\
             CREATE TABLE IF NOT EXISTS {} ({});\n\
             BEGIN TRANSACTION;",
            quote_ident(dataset),
            target,
            column_defs.join(", "),
        );
        debug!(%target, columns = columns.len(), "creating destination table");
        conn.execute_batch(&ddl)
            .with_context(|| format!("creating destination table {target}"))?;

        let placeholders: Vec<&str> = columns.iter().map(|_| "?").collect();
        let insert_sql = format!(
            "INSERT INTO {} VALUES ({})",
            target,
            placeholders.join(", ")
        );
        let insert = conn
            .prepare(&insert_sql)
            .context("preparing destination insert")?;

        Ok(Self {
            conn,
            insert,
            target,
            appended: 0,
        })
    }

    /// Append one row.
    pub fn append(&mut self, row: &RowRecord) -> Result<()> {
        let params = row.fields.iter().map(|(_, v)| duckdb_value(v));
        self.insert
            .execute(params_from_iter(params))
            .with_context(|| format!("inserting into {}", self.target))?;
        self.appended += 1;
        Ok(())
    }

    /// Commit the transaction and return the number of rows appended.
    pub fn finish(self) -> Result<u64> {
        self.conn
            .execute_batch("COMMIT;")
            .with_context(|| format!("committing load into {}", self.target))?;
        Ok(self.appended)
    }
}

/// All user tables in the database as (schema, table) pairs.
pub fn list_tables(conn: &Connection) -> Result<Vec<(String, String)>> {
    let mut stmt = conn.prepare(
        "select table_schema, table_name from information_schema.tables \
         order by table_schema, table_name",
    )?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Row count of one table.
pub fn table_count(conn: &Connection, dataset: &str, table: &str) -> Result<i64> {
    let sql = format!(
        "select count(*) from {}.{}",
        quote_ident(dataset),
        quote_ident(table)
    );
    let count = conn.query_row(&sql, [], |r| r.get(0))?;
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn column(name: &str, kind: ColumnKind) -> Column {
        Column {
            name: name.to_string(),
            kind,
            children: Vec::new(),
        }
    }

    fn event_columns() -> Vec<Column> {
        vec![
            column("event_name", ColumnKind::Text),
            column("event_count", ColumnKind::Integer),
            column("revenue", ColumnKind::Real),
            column("is_conversion", ColumnKind::Boolean),
            column("event_timestamp", ColumnKind::Timestamp),
        ]
    }

    fn event_row(name: &str, count: i64) -> RowRecord {
        RowRecord {
            fields: vec![
                ("event_name".into(), FieldValue::Text(name.into())),
                ("event_count".into(), FieldValue::Integer(count)),
                ("revenue".into(), FieldValue::Real(1.25)),
                ("is_conversion".into(), FieldValue::Boolean(false)),
                (
                    "event_timestamp".into(),
                    FieldValue::Timestamp(Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()),
                ),
            ],
        }
    }

    #[test]
    fn sink_creates_table_and_appends() -> Result<()> {
        let conn = open_mem_db()?;
        let mut sink = EventSink::create(&conn, "bigquery_data", "events", &event_columns())?;
        sink.append(&event_row("page_view", 3))?;
        sink.append(&event_row("scroll", 1))?;
        let appended = sink.finish()?;
        assert_eq!(appended, 2);
        assert_eq!(table_count(&conn, "bigquery_data", "events")?, 2);

        let name: String = conn.query_row(
            "select event_name from bigquery_data.events where event_count = 3",
            [],
            |r| r.get(0),
        )?;
        assert_eq!(name, "page_view");
        Ok(())
    }

    #[test]
    fn second_load_appends_to_existing_table() -> Result<()> {
        let conn = open_mem_db()?;
        let cols = event_columns();

        let mut sink = EventSink::create(&conn, "bigquery_data", "events", &cols)?;
        sink.append(&event_row("page_view", 1))?;
        sink.finish()?;

        let mut sink = EventSink::create(&conn, "bigquery_data", "events", &cols)?;
        sink.append(&event_row("purchase", 2))?;
        sink.finish()?;

        assert_eq!(table_count(&conn, "bigquery_data", "events")?, 2);
        Ok(())
    }

    #[test]
    fn nulls_round_trip() -> Result<()> {
        let conn = open_mem_db()?;
        let cols = vec![
            column("event_name", ColumnKind::Text),
            column("event_count", ColumnKind::Integer),
        ];
        let mut sink = EventSink::create(&conn, "bigquery_data", "events", &cols)?;
        sink.append(&RowRecord {
            fields: vec![
                ("event_name".into(), FieldValue::Text("view".into())),
                ("event_count".into(), FieldValue::Null),
            ],
        })?;
        sink.finish()?;

        let count: Option<i64> =
            conn.query_row("select event_count from bigquery_data.events", [], |r| {
                r.get(0)
            })?;
        assert_eq!(count, None);
        Ok(())
    }

    #[test]
    fn empty_schema_is_rejected() {
        let conn = open_mem_db().unwrap();
        assert!(EventSink::create(&conn, "bigquery_data", "events", &[]).is_err());
    }

    #[test]
    fn list_tables_sees_the_destination() -> Result<()> {
        let conn = open_mem_db()?;
        let mut sink = EventSink::create(&conn, "bigquery_data", "events", &event_columns())?;
        sink.append(&event_row("page_view", 1))?;
        sink.finish()?;

        let tables = list_tables(&conn)?;
        assert!(tables
            .iter()
            .any(|(s, t)| s == "bigquery_data" && t == "events"));
        Ok(())
    }
}
