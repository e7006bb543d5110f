use log::*;
use sqlx::SqliteConnection;

use crate::{
    db_types::{Booking, BookingEvent, BookingId, BookingStatus, NewBooking, PaymentStatus, Report, UserId},
    traits::{Actor, BookingError, TransitionUpdate},
};

/// Inserts a booking in `new` status. The unique partial index on active travel + package pairs turns a duplicate into
/// [`BookingError::ActiveBookingExists`].
pub async fn insert_booking(
    booking: NewBooking,
    traveler: &UserId,
    conn: &mut SqliteConnection,
) -> Result<Booking, BookingError> {
    let result = sqlx::query_as(
        r#"
        INSERT INTO bookings (travel_id, package_id, owner_id, traveler_id, amount, currency)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *;
        "#,
    )
    .bind(&booking.travel_id)
    .bind(&booking.package_id)
    .bind(&booking.owner_id)
    .bind(traveler)
    .bind(booking.amount)
    .bind(&booking.currency)
    .fetch_one(conn)
    .await;
    match result {
        Ok(b) => Ok(b),
        Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
            Err(BookingError::ActiveBookingExists { travel_id: booking.travel_id, package_id: booking.package_id })
        },
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_booking(id: BookingId, conn: &mut SqliteConnection) -> Result<Option<Booking>, sqlx::Error> {
    let booking = sqlx::query_as("SELECT * FROM bookings WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(booking)
}

pub async fn fetch_booking_by_payment_intent(
    intent_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Booking>, sqlx::Error> {
    let booking = sqlx::query_as("SELECT * FROM bookings WHERE payment_intent_id = $1")
        .bind(intent_id)
        .fetch_optional(conn)
        .await?;
    Ok(booking)
}

pub async fn fetch_bookings_for_user(user: &UserId, conn: &mut SqliteConnection) -> Result<Vec<Booking>, sqlx::Error> {
    let bookings = sqlx::query_as("SELECT * FROM bookings WHERE owner_id = $1 OR traveler_id = $1 ORDER BY id DESC")
        .bind(user)
        .fetch_all(conn)
        .await?;
    Ok(bookings)
}

pub async fn attach_payment_intent(
    id: BookingId,
    intent_id: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<Booking>, sqlx::Error> {
    let booking = sqlx::query_as(
        r#"
        UPDATE bookings SET payment_intent_id = $1, payment_status = 'processing'
        WHERE id = $2 AND status = 'new' AND paid = FALSE
        RETURNING *;
        "#,
    )
    .bind(intent_id)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(booking)
}

pub async fn mark_payment_failed(id: BookingId, conn: &mut SqliteConnection) -> Result<Option<Booking>, sqlx::Error> {
    let booking = sqlx::query_as(
        "UPDATE bookings SET payment_status = 'failed' WHERE id = $1 AND paid = FALSE AND status = 'new' RETURNING *",
    )
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(booking)
}

/// `new -> pending_acceptance`, setting the paid flags. `None` if the booking was not in `new` or already paid.
pub async fn mark_funded(
    id: BookingId,
    intent_id: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Option<Booking>, sqlx::Error> {
    let booking = sqlx::query_as(
        r#"
        UPDATE bookings SET
            status = 'pending_acceptance',
            paid = TRUE,
            payment_status = 'paid',
            payment_intent_id = COALESCE($1, payment_intent_id)
        WHERE id = $2 AND status = 'new' AND paid = FALSE
        RETURNING *;
        "#,
    )
    .bind(intent_id)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(booking)
}

pub async fn set_payment_status(
    id: BookingId,
    status: PaymentStatus,
    conn: &mut SqliteConnection,
) -> Result<Booking, sqlx::Error> {
    let booking = sqlx::query_as("UPDATE bookings SET payment_status = $1 WHERE id = $2 RETURNING *")
        .bind(status)
        .bind(id)
        .fetch_one(conn)
        .await?;
    Ok(booking)
}

/// Compare-and-set status change that writes the fields belonging to `update`. `None` if the booking is no longer in
/// `from`.
pub async fn transition(
    id: BookingId,
    from: BookingStatus,
    to: BookingStatus,
    update: &TransitionUpdate,
    conn: &mut SqliteConnection,
) -> Result<Option<Booking>, sqlx::Error> {
    let query = match update {
        TransitionUpdate::PickUp { photo, sender_signature, traveler_signature } => sqlx::query_as(
            r#"
            UPDATE bookings SET status = $1, pick_up_photo = $4, pick_up_sender_signature = $5,
                pick_up_traveler_signature = $6
            WHERE id = $2 AND status = $3
            RETURNING *;
            "#,
        )
        .bind(to)
        .bind(id)
        .bind(from)
        .bind(photo)
        .bind(sender_signature)
        .bind(traveler_signature),
        TransitionUpdate::DropOff { photo, receiver_signature, traveler_signature } => sqlx::query_as(
            r#"
            UPDATE bookings SET status = $1, drop_off_photo = $4, drop_off_receiver_signature = $5,
                drop_off_traveler_signature = $6
            WHERE id = $2 AND status = $3
            RETURNING *;
            "#,
        )
        .bind(to)
        .bind(id)
        .bind(from)
        .bind(photo)
        .bind(receiver_signature)
        .bind(traveler_signature),
        TransitionUpdate::Problem { reason } => sqlx::query_as(
            "UPDATE bookings SET status = $1, problem_reason = $4 WHERE id = $2 AND status = $3 RETURNING *",
        )
        .bind(to)
        .bind(id)
        .bind(from)
        .bind(reason),
        TransitionUpdate::Reject { reason } => sqlx::query_as(
            r#"
            UPDATE bookings SET status = $1, confirmed = FALSE, rejection_reason = $4
            WHERE id = $2 AND status = $3
            RETURNING *;
            "#,
        )
        .bind(to)
        .bind(id)
        .bind(from)
        .bind(reason),
        TransitionUpdate::Complete => sqlx::query_as(
            "UPDATE bookings SET status = $1, confirmed = TRUE WHERE id = $2 AND status = $3 RETURNING *",
        )
        .bind(to)
        .bind(id)
        .bind(from),
        TransitionUpdate::ConditionsUnmet { .. } => {
            sqlx::query_as("UPDATE bookings SET status = $1 WHERE id = $2 AND status = $3 RETURNING *")
                .bind(to)
                .bind(id)
                .bind(from)
        },
    };
    let booking = query.fetch_optional(conn).await?;
    Ok(booking)
}

/// Moves a `pending_acceptance` booking on after its announcement has been resolved.
pub async fn resolve_pending(
    id: BookingId,
    to: BookingStatus,
    confirmed: bool,
    conn: &mut SqliteConnection,
) -> Result<Option<Booking>, sqlx::Error> {
    let booking = sqlx::query_as(
        r#"
        UPDATE bookings SET status = $1, confirmed = $2
        WHERE id = $3 AND status = 'pending_acceptance'
        RETURNING *;
        "#,
    )
    .bind(to)
    .bind(confirmed)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(booking)
}

pub async fn cancel(
    id: BookingId,
    from: BookingStatus,
    actor: &Actor,
    reason: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<Option<Booking>, sqlx::Error> {
    let booking = sqlx::query_as(
        r#"
        UPDATE bookings SET status = 'cancel', cancelled_by = $1, cancelled_by_role = $2, cancel_reason = $3
        WHERE id = $4 AND status = $5
        RETURNING *;
        "#,
    )
    .bind(&actor.user_id)
    .bind(actor.role)
    .bind(reason)
    .bind(id)
    .bind(from)
    .fetch_optional(conn)
    .await?;
    Ok(booking)
}

pub async fn record_event(
    booking: BookingId,
    from: Option<BookingStatus>,
    to: BookingStatus,
    actor: &Actor,
    note: Option<&str>,
    conn: &mut SqliteConnection,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO booking_events (booking_id, from_status, to_status, actor_id, actor_role, note)
        VALUES ($1, $2, $3, $4, $5, $6);
        "#,
    )
    .bind(booking)
    .bind(from)
    .bind(to)
    .bind(&actor.user_id)
    .bind(actor.role)
    .bind(note)
    .execute(conn)
    .await?;
    trace!("📦️ Booking #{booking}: {} -> {to} by {}", from.map(|s| s.as_str()).unwrap_or("(none)"), actor.role);
    Ok(())
}

pub async fn fetch_history(booking: BookingId, conn: &mut SqliteConnection) -> Result<Vec<BookingEvent>, sqlx::Error> {
    let events = sqlx::query_as("SELECT * FROM booking_events WHERE booking_id = $1 ORDER BY id")
        .bind(booking)
        .fetch_all(conn)
        .await?;
    Ok(events)
}

pub async fn insert_report(
    booking: BookingId,
    reporter: &UserId,
    details: &str,
    conn: &mut SqliteConnection,
) -> Result<Report, sqlx::Error> {
    let report = sqlx::query_as(
        "INSERT INTO reports (booking_id, reporter_id, details) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(booking)
    .bind(reporter)
    .bind(details)
    .fetch_one(conn)
    .await?;
    Ok(report)
}

pub async fn fetch_reports(booking: BookingId, conn: &mut SqliteConnection) -> Result<Vec<Report>, sqlx::Error> {
    let reports = sqlx::query_as("SELECT * FROM reports WHERE booking_id = $1 ORDER BY id")
        .bind(booking)
        .fetch_all(conn)
        .await?;
    Ok(reports)
}
