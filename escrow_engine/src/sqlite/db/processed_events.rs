use sqlx::SqliteConnection;

use crate::db_types::ProcessedEvent;

pub async fn fetch(event_id: &str, conn: &mut SqliteConnection) -> Result<Option<ProcessedEvent>, sqlx::Error> {
    let event = sqlx::query_as("SELECT * FROM processed_events WHERE event_id = $1")
        .bind(event_id)
        .fetch_optional(conn)
        .await?;
    Ok(event)
}

/// Returns `false` if the event was already recorded.
pub async fn record(
    event_id: &str,
    event_type: &str,
    outcome: &str,
    conn: &mut SqliteConnection,
) -> Result<bool, sqlx::Error> {
    let rows = sqlx::query("INSERT OR IGNORE INTO processed_events (event_id, event_type, outcome) VALUES ($1, $2, $3)")
        .bind(event_id)
        .bind(event_type)
        .bind(outcome)
        .execute(conn)
        .await?
        .rows_affected();
    Ok(rows == 1)
}
