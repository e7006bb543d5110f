use log::*;
use sqlx::SqliteConnection;

use crate::db_types::{Amount, UserId, Wallet, WalletId};

pub async fn fetch_wallet(id: WalletId, conn: &mut SqliteConnection) -> Result<Option<Wallet>, sqlx::Error> {
    let wallet = sqlx::query_as("SELECT * FROM wallets WHERE id = $1").bind(id).fetch_optional(conn).await?;
    Ok(wallet)
}

pub async fn fetch_wallet_for_user(user: &UserId, conn: &mut SqliteConnection) -> Result<Option<Wallet>, sqlx::Error> {
    let wallet =
        sqlx::query_as("SELECT * FROM wallets WHERE owner_id = $1").bind(user).fetch_optional(conn).await?;
    Ok(wallet)
}

/// Idempotently creates the user's wallet and returns it.
pub async fn fetch_or_create_wallet(
    user: &UserId,
    currency: &str,
    conn: &mut SqliteConnection,
) -> Result<Wallet, sqlx::Error> {
    let inserted = sqlx::query(
        "INSERT INTO wallets (owner_id, role, currency) VALUES ($1, 'user', $2) ON CONFLICT (owner_id) DO NOTHING",
    )
    .bind(user)
    .bind(currency)
    .execute(&mut *conn)
    .await?
    .rows_affected();
    if inserted > 0 {
        debug!("💰️ Created a {currency} wallet for {user}");
    }
    let wallet = sqlx::query_as("SELECT * FROM wallets WHERE owner_id = $1").bind(user).fetch_one(conn).await?;
    Ok(wallet)
}

/// Idempotently creates the central escrow wallet and returns it. A partial unique index guarantees there is only one.
pub async fn fetch_or_create_central_wallet(
    currency: &str,
    conn: &mut SqliteConnection,
) -> Result<Wallet, sqlx::Error> {
    let inserted = sqlx::query("INSERT OR IGNORE INTO wallets (owner_id, role, currency) VALUES (NULL, 'central', $1)")
        .bind(currency)
        .execute(&mut *conn)
        .await?
        .rows_affected();
    if inserted > 0 {
        info!("💰️ Created the central escrow wallet ({currency})");
    }
    let wallet = sqlx::query_as("SELECT * FROM wallets WHERE role = 'central'").fetch_one(conn).await?;
    Ok(wallet)
}

pub async fn fetch_central_wallet(conn: &mut SqliteConnection) -> Result<Option<Wallet>, sqlx::Error> {
    let wallet = sqlx::query_as("SELECT * FROM wallets WHERE role = 'central'").fetch_optional(conn).await?;
    Ok(wallet)
}

/// Decrements the balance, provided it covers `amount`. The check and the write are one statement, so concurrent
/// debits can never both pass a check that only one of them satisfies.
///
/// Returns `false` (and changes nothing) if the wallet does not exist or the balance is short.
pub async fn debit(wallet: WalletId, amount: Amount, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let rows = sqlx::query("UPDATE wallets SET balance = balance - $1 WHERE id = $2 AND balance >= $1")
        .bind(amount)
        .bind(wallet)
        .execute(conn)
        .await?
        .rows_affected();
    trace!("💰️ Debit of {amount} from wallet #{wallet}: {}", if rows == 1 { "ok" } else { "refused" });
    Ok(rows == 1)
}

/// Returns `false` if the wallet does not exist.
pub async fn credit(wallet: WalletId, amount: Amount, conn: &mut SqliteConnection) -> Result<bool, sqlx::Error> {
    let rows = sqlx::query("UPDATE wallets SET balance = balance + $1 WHERE id = $2")
        .bind(amount)
        .bind(wallet)
        .execute(conn)
        .await?
        .rows_affected();
    trace!("💰️ Credit of {amount} to wallet #{wallet}");
    Ok(rows == 1)
}
