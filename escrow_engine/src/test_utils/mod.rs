//! Helpers for tests that run the engine against a real SQLite database.
mod fake_provider;
mod prepare_env;

pub use fake_provider::FakePaymentProvider;
pub use prepare_env::{create_database, prepare_test_env, random_db_path, run_migrations};
