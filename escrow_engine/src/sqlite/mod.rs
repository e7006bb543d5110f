//! SQLite backend for the escrow engine.
mod sqlite_impl;

pub mod db;
pub use sqlite_impl::SqliteDatabase;
