use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use escrow_engine::db_types::BookingId;

mod commands;
mod formatting;

use commands::{print_audit, print_balance, print_booking, print_webhook_signature, run_sweep};

#[derive(Parser, Debug)]
#[command(version, about = "Operator tools for the escrow service")]
pub struct Arguments {
    /// The escrow database URL. If omitted, ESC_DATABASE_URL is used.
    #[arg(short, long)]
    database: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Decline every acceptance request that has waited longer than the announcement window, and refund the payers.
    Sweep,
    /// Recompute every wallet balance from its transaction log. Exits with an error if any wallet disagrees.
    Audit {
        /// List every wallet, not only the inconsistent ones
        #[arg(short, long)]
        all: bool,
    },
    /// Show a user's wallet and its transactions
    Balance {
        #[arg(required = true, index = 1)]
        user: String,
    },
    /// Show a booking, its status history and the ledger entries recorded against it
    Booking {
        #[arg(required = true, index = 1)]
        id: BookingId,
    },
    /// Sign a webhook payload the way the payment provider does. Useful for replaying or simulating deliveries.
    #[clap(name = "sign-webhook")]
    SignWebhook(SignWebhookParams),
}

#[derive(Debug, Args)]
pub struct SignWebhookParams {
    /// The file holding the raw JSON payload. Standard input is read if omitted.
    #[arg(index = 1)]
    file: Option<PathBuf>,
    /// The signing secret. If omitted, ESC_WEBHOOK_SECRET is used.
    #[arg(short, long)]
    secret: Option<String>,
    /// The unix timestamp to sign with. Defaults to now.
    #[arg(short, long)]
    timestamp: Option<i64>,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    env_logger::init();
    let cli = Arguments::parse();
    let result = match cli.command {
        Command::Sweep => run_sweep(cli.database).await,
        Command::Audit { all } => print_audit(cli.database, all).await,
        Command::Balance { user } => print_balance(cli.database, user).await,
        Command::Booking { id } => print_booking(cli.database, id).await,
        Command::SignWebhook(params) => print_webhook_signature(params),
    };
    if let Err(e) = result {
        eprintln!("🚨️ {e:#}");
        std::process::exit(1);
    }
}
