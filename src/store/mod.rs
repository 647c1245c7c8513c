// src/store/mod.rs — Durable result store (SQLite)

pub mod db;
pub mod schema;
pub mod server;

use rusqlite::{Connection, OpenFlags};
use std::path::Path;

pub use db::Store;
pub use server::{spawn_store_server, StoreHandle};

/// Open (or create) the database at the given path.
pub fn open(path: &Path) -> anyhow::Result<Store> {
    let conn = Connection::open(path)?;
    // WAL lets CLI readers inspect the database while the server writes
    conn.execute_batch("PRAGMA journal_mode=WAL;")?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;

    schema::run_migrations(&conn)?;

    Ok(Store::new(conn))
}

/// Open an existing database for inspection. No migrations run and every
/// write fails.
pub fn open_read_only(path: &Path) -> anyhow::Result<Store> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    Ok(Store::new(conn))
}

/// Create an in-memory database (for testing).
pub fn open_in_memory() -> anyhow::Result<Store> {
    let conn = Connection::open_in_memory()?;
    conn.execute_batch("PRAGMA foreign_keys=ON;")?;
    schema::run_migrations(&conn)?;
    Ok(Store::new(conn))
}
