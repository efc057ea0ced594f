// src/bin/inspect_duck.rs
// Print the tables and row counts of a DuckDB database file.

use anyhow::Result;
use eventsync::duck;

fn main() -> Result<()> {
    let path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "events.duckdb".to_string());
    println!("→ Inspecting {}", path);

    let conn = duck::open_disk_db(&path)?;
    let tables = duck::list_tables(&conn)?;
    if tables.is_empty() {
        println!("no tables");
        return Ok(());
    }

    for (schema, table) in tables {
        let count = duck::table_count(&conn, &schema, &table)?;
        println!("{}.{}: {} rows", schema, table, count);
    }
    Ok(())
}
