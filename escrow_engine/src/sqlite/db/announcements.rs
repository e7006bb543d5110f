use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;

use crate::{
    db_types::{AnnouncementRequest, AnnouncementResolution, Booking, BookingId},
    traits::AnnouncementDecision,
};

/// The SQLite `CURRENT_TIMESTAMP` format, so that cutoffs compare correctly against stored timestamps.
const SQLITE_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub async fn insert_announcement(
    booking: &Booking,
    conn: &mut SqliteConnection,
) -> Result<AnnouncementRequest, sqlx::Error> {
    let request = sqlx::query_as(
        r#"
        INSERT INTO announcement_requests (booking_id, travel_id, package_id)
        VALUES ($1, $2, $3)
        RETURNING *;
        "#,
    )
    .bind(booking.id)
    .bind(&booking.travel_id)
    .bind(&booking.package_id)
    .fetch_one(conn)
    .await?;
    Ok(request)
}

pub async fn fetch_announcement(
    booking: BookingId,
    conn: &mut SqliteConnection,
) -> Result<Option<AnnouncementRequest>, sqlx::Error> {
    let request = sqlx::query_as("SELECT * FROM announcement_requests WHERE booking_id = $1")
        .bind(booking)
        .fetch_optional(conn)
        .await?;
    Ok(request)
}

pub async fn fetch_unprocessed_before(
    cutoff: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<Vec<AnnouncementRequest>, sqlx::Error> {
    let cutoff = cutoff.format(SQLITE_TIMESTAMP_FORMAT).to_string();
    let requests = sqlx::query_as(
        "SELECT * FROM announcement_requests WHERE is_processed = FALSE AND created_at < $1 ORDER BY created_at, id",
    )
    .bind(cutoff)
    .fetch_all(conn)
    .await?;
    Ok(requests)
}

/// Takes the one-way `is_processed` latch. `None` means somebody else got there first (or there is no request).
pub async fn latch(
    booking: BookingId,
    decision: AnnouncementDecision,
    conn: &mut SqliteConnection,
) -> Result<Option<AnnouncementRequest>, sqlx::Error> {
    let (accepted, refused, resolution) = match decision {
        AnnouncementDecision::Accept => (true, false, AnnouncementResolution::Accepted),
        AnnouncementDecision::Refuse => (false, true, AnnouncementResolution::Refused),
        AnnouncementDecision::Expire => (false, true, AnnouncementResolution::Expired),
    };
    let request = sqlx::query_as(
        r#"
        UPDATE announcement_requests SET
            is_processed = TRUE,
            is_accepted = $1,
            is_refused = $2,
            resolution = $3,
            processed_at = CURRENT_TIMESTAMP
        WHERE booking_id = $4 AND is_processed = FALSE
        RETURNING *;
        "#,
    )
    .bind(accepted)
    .bind(refused)
    .bind(resolution)
    .bind(booking)
    .fetch_optional(conn)
    .await?;
    Ok(request)
}

/// Closes a request whose booking left `pending_acceptance` without the traveler's answer. Neither flag is set, so the
/// request reads as processed but never accepted or refused. `None` if there was no open request.
pub async fn close_unanswered(
    booking: BookingId,
    conn: &mut SqliteConnection,
) -> Result<Option<AnnouncementRequest>, sqlx::Error> {
    let request = sqlx::query_as(
        r#"
        UPDATE announcement_requests SET
            is_processed = TRUE,
            resolution = $1,
            processed_at = CURRENT_TIMESTAMP
        WHERE booking_id = $2 AND is_processed = FALSE
        RETURNING *;
        "#,
    )
    .bind(AnnouncementResolution::Cancelled)
    .bind(booking)
    .fetch_optional(conn)
    .await?;
    Ok(request)
}
