use sqlx::{types::Json, SqliteConnection};

use crate::db_types::{
    BookingId,
    NewWalletTransaction,
    TransactionId,
    TransactionStatus,
    TransactionType,
    WalletId,
    WalletTransaction,
};

pub async fn insert(tx: NewWalletTransaction, conn: &mut SqliteConnection) -> Result<WalletTransaction, sqlx::Error> {
    let record = sqlx::query_as(
        r#"
        INSERT INTO wallet_transactions
            (wallet_id, tx_type, amount, status, booking_id, provider_ref, related_tx_id, metadata)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        RETURNING *;
        "#,
    )
    .bind(tx.wallet_id)
    .bind(tx.tx_type)
    .bind(tx.amount)
    .bind(tx.status)
    .bind(tx.booking_id)
    .bind(tx.provider_ref)
    .bind(tx.related_tx_id)
    .bind(Json(tx.metadata))
    .fetch_one(conn)
    .await?;
    Ok(record)
}

pub async fn fetch_transaction(
    id: TransactionId,
    conn: &mut SqliteConnection,
) -> Result<Option<WalletTransaction>, sqlx::Error> {
    let record =
        sqlx::query_as("SELECT * FROM wallet_transactions WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(record)
}

pub async fn fetch_for_wallet(
    wallet: WalletId,
    conn: &mut SqliteConnection,
) -> Result<Vec<WalletTransaction>, sqlx::Error> {
    let records = sqlx::query_as("SELECT * FROM wallet_transactions WHERE wallet_id = $1 ORDER BY id DESC")
        .bind(wallet)
        .fetch_all(conn)
        .await?;
    Ok(records)
}

pub async fn fetch_for_booking(
    booking: BookingId,
    conn: &mut SqliteConnection,
) -> Result<Vec<WalletTransaction>, sqlx::Error> {
    let records = sqlx::query_as("SELECT * FROM wallet_transactions WHERE booking_id = $1 ORDER BY id")
        .bind(booking)
        .fetch_all(conn)
        .await?;
    Ok(records)
}

pub async fn fetch_outstanding_hold(
    booking: BookingId,
    conn: &mut SqliteConnection,
) -> Result<Option<WalletTransaction>, sqlx::Error> {
    let record = sqlx::query_as(
        "SELECT * FROM wallet_transactions WHERE booking_id = $1 AND tx_type = 'HOLD' AND settled_at IS NULL",
    )
    .bind(booking)
    .fetch_optional(conn)
    .await?;
    Ok(record)
}

pub async fn fetch_by_provider_ref(
    provider_ref: &str,
    tx_type: TransactionType,
    conn: &mut SqliteConnection,
) -> Result<Option<WalletTransaction>, sqlx::Error> {
    let record = sqlx::query_as("SELECT * FROM wallet_transactions WHERE provider_ref = $1 AND tx_type = $2")
        .bind(provider_ref)
        .bind(tx_type)
        .fetch_optional(conn)
        .await?;
    Ok(record)
}

pub async fn fetch_refund_of(
    related: TransactionId,
    wallet: WalletId,
    conn: &mut SqliteConnection,
) -> Result<Option<WalletTransaction>, sqlx::Error> {
    let record = sqlx::query_as(
        "SELECT * FROM wallet_transactions WHERE related_tx_id = $1 AND wallet_id = $2 AND tx_type = 'REFUND'",
    )
    .bind(related)
    .bind(wallet)
    .fetch_optional(conn)
    .await?;
    Ok(record)
}

/// Compare-and-set on the status column. Returns the updated record, or `None` if the record is not of type
/// `tx_type` or not in status `from`.
pub async fn update_status(
    id: TransactionId,
    tx_type: TransactionType,
    from: TransactionStatus,
    to: TransactionStatus,
    conn: &mut SqliteConnection,
) -> Result<Option<WalletTransaction>, sqlx::Error> {
    let record = sqlx::query_as(
        r#"
        UPDATE wallet_transactions SET status = $1, updated_at = CURRENT_TIMESTAMP
        WHERE id = $2 AND tx_type = $3 AND status = $4
        RETURNING *;
        "#,
    )
    .bind(to)
    .bind(id)
    .bind(tx_type)
    .bind(from)
    .fetch_optional(conn)
    .await?;
    Ok(record)
}

/// Sets a single string field in the JSON metadata of a record.
pub async fn set_metadata_field(
    id: TransactionId,
    field: &str,
    value: &str,
    conn: &mut SqliteConnection,
) -> Result<WalletTransaction, sqlx::Error> {
    let path = format!("$.{field}");
    let record = sqlx::query_as(
        r#"
        UPDATE wallet_transactions SET metadata = json_set(metadata, $1, $2), updated_at = CURRENT_TIMESTAMP
        WHERE id = $3
        RETURNING *;
        "#,
    )
    .bind(path)
    .bind(value)
    .bind(id)
    .fetch_one(conn)
    .await?;
    Ok(record)
}

pub async fn set_provider_ref(
    id: TransactionId,
    provider_ref: &str,
    conn: &mut SqliteConnection,
) -> Result<Option<WalletTransaction>, sqlx::Error> {
    let record = sqlx::query_as(
        "UPDATE wallet_transactions SET provider_ref = $1, updated_at = CURRENT_TIMESTAMP WHERE id = $2 RETURNING *",
    )
    .bind(provider_ref)
    .bind(id)
    .fetch_optional(conn)
    .await?;
    Ok(record)
}

/// Marks the booking's outstanding hold as settled and returns it. `None` means there was no outstanding hold.
///
/// This is the latch that makes release and refund mutually exclusive: only one caller can flip `settled_at`.
pub async fn settle_hold(
    booking: BookingId,
    conn: &mut SqliteConnection,
) -> Result<Option<WalletTransaction>, sqlx::Error> {
    let record = sqlx::query_as(
        r#"
        UPDATE wallet_transactions SET settled_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
        WHERE booking_id = $1 AND tx_type = 'HOLD' AND settled_at IS NULL
        RETURNING *;
        "#,
    )
    .bind(booking)
    .fetch_optional(conn)
    .await?;
    Ok(record)
}

/// Like [`settle_hold`], but keyed on the SPEND the hold was paired with.
pub async fn settle_hold_for_spend(
    spend: TransactionId,
    conn: &mut SqliteConnection,
) -> Result<Option<WalletTransaction>, sqlx::Error> {
    let record = sqlx::query_as(
        r#"
        UPDATE wallet_transactions SET settled_at = CURRENT_TIMESTAMP, updated_at = CURRENT_TIMESTAMP
        WHERE related_tx_id = $1 AND tx_type = 'HOLD' AND settled_at IS NULL
        RETURNING *;
        "#,
    )
    .bind(spend)
    .fetch_optional(conn)
    .await?;
    Ok(record)
}
