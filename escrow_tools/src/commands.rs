use std::io::Read;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use escrow_engine::{
    db_types::{BookingId, UserId},
    events::EventProducers,
    AnnouncementApi,
    AnnouncementManagement,
    BookingManagement,
    LedgerManagement,
    SqliteDatabase,
};
use escrow_server::{announcement_sweeper::sweep_summary, config::ServerConfig};
use log::*;
use provider_tools::signature::{sign_payload, SIGNATURE_HEADER};

use crate::{
    formatting::{format_audit, format_booking, format_expiry_result, format_wallet},
    SignWebhookParams,
};

const MAX_TOOL_CONNECTIONS: u32 = 2;

async fn connect(database: Option<String>) -> Result<(SqliteDatabase, ServerConfig)> {
    let mut config = ServerConfig::from_env_or_default();
    if let Some(url) = database {
        config.database_url = url;
    }
    debug!("Connecting to {}", config.database_url);
    let db = SqliteDatabase::new_with_url(&config.database_url, MAX_TOOL_CONNECTIONS)
        .await
        .with_context(|| format!("Could not open {}", config.database_url))?;
    db.run_migrations().await.context("Could not bring the database schema up to date")?;
    Ok((db, config))
}

pub async fn run_sweep(database: Option<String>) -> Result<()> {
    let (db, config) = connect(database).await?;
    let escrow = db.escrow_wallet(&config.ledger_policy.currency).await?;
    // No notification hooks are attached, so producers with no listeners are enough here.
    let api = AnnouncementApi::new(db, escrow, EventProducers::default())
        .with_window(config.announcement_window)
        .with_retry_policy(config.retry_policy);
    let result = api.expire_stale(Utc::now()).await?;
    info!("{}", sweep_summary(&result));
    println!("{}", format_expiry_result(&result)?);
    if result.failed.is_empty() {
        Ok(())
    } else {
        Err(anyhow!("{} booking(s) could not be expired", result.failed.len()))
    }
}

pub async fn print_audit(database: Option<String>, all: bool) -> Result<()> {
    let (db, _) = connect(database).await?;
    let audit = db.audit_ledger().await?;
    println!("{}", format_audit(&audit, all)?);
    if audit.is_consistent() {
        Ok(())
    } else {
        Err(anyhow!("The ledger is inconsistent"))
    }
}

pub async fn print_balance(database: Option<String>, user: String) -> Result<()> {
    let (db, _) = connect(database).await?;
    let user = UserId::new(user);
    let wallet = db.fetch_wallet_for_user(&user).await?.ok_or_else(|| anyhow!("{user} does not have a wallet"))?;
    let transactions = db.fetch_transactions_for_wallet(wallet.id).await?;
    println!("{}", format_wallet(&wallet, &transactions)?);
    Ok(())
}

pub async fn print_booking(database: Option<String>, id: BookingId) -> Result<()> {
    let (db, _) = connect(database).await?;
    let booking = db.fetch_booking(id).await?.ok_or_else(|| anyhow!("Booking #{id} does not exist"))?;
    let history = db.fetch_booking_history(id).await?;
    let announcement = db.fetch_announcement(id).await?;
    let transactions = db.fetch_transactions_for_booking(id).await?;
    println!("{}", format_booking(&booking, &history, announcement.as_ref(), &transactions)?);
    Ok(())
}

pub fn print_webhook_signature(params: SignWebhookParams) -> Result<()> {
    let payload = match &params.file {
        Some(path) => std::fs::read(path).with_context(|| format!("Could not read {}", path.display()))?,
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf).context("Could not read the payload from stdin")?;
            buf
        },
    };
    let secret = params
        .secret
        .or_else(|| std::env::var("ESC_WEBHOOK_SECRET").ok())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("No signing secret. Use --secret or set ESC_WEBHOOK_SECRET"))?;
    let timestamp = params.timestamp.unwrap_or_else(|| Utc::now().timestamp());
    let header = sign_payload(&secret, timestamp, &payload)?;
    println!("{SIGNATURE_HEADER}: {header}");
    Ok(())
}
