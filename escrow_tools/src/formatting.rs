use std::fmt::Write;

use anyhow::Result;
use escrow_engine::{
    db_types::{AnnouncementRequest, Booking, BookingEvent, Wallet, WalletTransaction},
    traits::{ExpiryResult, LedgerAudit},
};
use prettytable::{
    format::{LinePosition, LineSeparator, TableFormat},
    row,
    Table,
};

fn markdown_format() -> TableFormat {
    prettytable::format::FormatBuilder::new()
        .column_separator('|')
        .borders('|')
        .separator(LinePosition::Title, LineSeparator::new('-', '|', '|', '|'))
        .padding(1, 1)
        .build()
}

fn markdown_style(table: &mut Table) {
    table.set_format(markdown_format());
}

fn opt<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

pub fn format_audit(audit: &LedgerAudit, all: bool) -> Result<String> {
    let mut f = String::new();
    writeln!(f, "Escrow balance:    {}", audit.escrow_balance)?;
    writeln!(f, "Outstanding holds: {}", audit.outstanding_holds)?;
    let wallets = audit.wallets.iter().filter(|w| all || !w.is_consistent()).collect::<Vec<_>>();
    if wallets.is_empty() {
        writeln!(f, "All {} wallets agree with their transaction logs", audit.wallets.len())?;
    } else {
        let mut table = Table::new();
        table.set_titles(row!["Wallet", "Role", "Owner", "Balance", "Projected", "Discrepancy"]);
        for w in wallets {
            table.add_row(row![
                w.wallet_id,
                format!("{:?}", w.role),
                opt(w.owner_id.as_ref()),
                w.balance.to_string(),
                w.projected.to_string(),
                w.discrepancy().to_string()
            ]);
        }
        markdown_style(&mut table);
        writeln!(f, "{table}")?;
    }
    let verdict = if audit.is_consistent() { "✅️ Consistent" } else { "🚨️ INCONSISTENT" };
    writeln!(f, "{verdict}")?;
    Ok(f)
}

pub fn format_wallet(wallet: &Wallet, transactions: &[WalletTransaction]) -> Result<String> {
    let mut f = String::new();
    writeln!(f, "Wallet #{} ({})", wallet.id, opt(wallet.owner_id.as_ref()))?;
    writeln!(f, "Balance: {} {}", wallet.balance, wallet.currency)?;
    writeln!(f, "Opened:  {}", wallet.created_at)?;
    writeln!(f, "{}", format_transactions(transactions))?;
    Ok(f)
}

pub fn format_transactions(transactions: &[WalletTransaction]) -> String {
    if transactions.is_empty() {
        return "No transactions".to_string();
    }
    let mut table = Table::new();
    table.set_titles(row![
        "ID",
        "Wallet",
        "Type",
        "Amount",
        "Status",
        "Booking",
        "Provider ref",
        "Related",
        "Created At"
    ]);
    let mut notes = Vec::new();
    for tx in transactions {
        let id = match tx.metadata.note {
            Some(ref note) => {
                notes.push(note.clone());
                format!("{}^{}", tx.id, notes.len())
            },
            None => tx.id.to_string(),
        };
        table.add_row(row![
            id,
            tx.wallet_id,
            format!("{:?}", tx.tx_type).to_uppercase(),
            tx.amount.to_string(),
            format!("{:?}", tx.status).to_uppercase(),
            opt(tx.booking_id),
            opt(tx.provider_ref.as_ref()),
            opt(tx.related_tx_id),
            tx.created_at.to_string()
        ]);
    }
    markdown_style(&mut table);
    let notes = notes.iter().enumerate().map(|(i, n)| format!("^{}: {n}", i + 1)).collect::<Vec<String>>().join("\n");
    if notes.is_empty() {
        format!("{table}")
    } else {
        format!("{table}\n## Notes\n{notes}")
    }
}

pub fn format_booking(
    booking: &Booking,
    history: &[BookingEvent],
    announcement: Option<&AnnouncementRequest>,
    transactions: &[WalletTransaction],
) -> Result<String> {
    let mut f = String::new();
    writeln!(f, "===============================================================================")?;
    writeln!(f, "Booking #{}: {} -> {}", booking.id, booking.package_id, booking.travel_id)?;
    writeln!(f, "===============================================================================")?;
    writeln!(f, "Owner:    {}", booking.owner_id)?;
    writeln!(f, "Traveler: {}", booking.traveler_id)?;
    writeln!(f, "Amount:   {} {}", booking.amount, booking.currency)?;
    writeln!(f, "Status:   {}", booking.status)?;
    writeln!(f, "Payment:  {:?} (paid: {})", booking.payment_status, booking.paid)?;
    if let Some(intent) = &booking.payment_intent_id {
        writeln!(f, "Intent:   {intent}")?;
    }
    if let Some(reason) = booking.problem_reason.as_ref().or(booking.rejection_reason.as_ref()) {
        writeln!(f, "Reason:   {reason}")?;
    }
    if let Some(by) = &booking.cancelled_by {
        writeln!(f, "Cancelled by {by} ({}): {}", opt(booking.cancelled_by_role), opt(booking.cancel_reason.as_ref()))?;
    }
    match announcement {
        Some(a) if a.is_processed => {
            let resolution = opt(a.resolution.map(|r| format!("{r:?}")));
            writeln!(f, "Announcement: {resolution} at {}", opt(a.processed_at))?
        },
        Some(a) => writeln!(f, "Announcement: waiting since {}", a.created_at)?,
        None => writeln!(f, "Announcement: none")?,
    }
    writeln!(f, "\n## History")?;
    let mut table = Table::new();
    table.set_titles(row!["From", "To", "Actor", "Role", "Note", "At"]);
    for e in history {
        table.add_row(row![
            opt(e.from_status),
            e.to_status,
            opt(e.actor_id.as_ref()),
            e.actor_role,
            opt(e.note.as_ref()),
            e.created_at.to_string()
        ]);
    }
    markdown_style(&mut table);
    writeln!(f, "{table}")?;
    writeln!(f, "## Ledger entries")?;
    writeln!(f, "{}", format_transactions(transactions))?;
    Ok(f)
}

pub fn format_expiry_result(result: &ExpiryResult) -> Result<String> {
    let mut f = String::new();
    if result.is_empty() {
        writeln!(f, "Nothing to expire")?;
        return Ok(f);
    }
    for declined in &result.declined {
        let refund = declined.refund.as_ref().map(|r| format!("refunded {}", r.amount())).unwrap_or_default();
        writeln!(f, "Declined #{} {refund}", declined.booking.id)?;
    }
    for id in &result.skipped {
        writeln!(f, "Skipped #{id}: answered while the sweep was running")?;
    }
    for (id, e) in &result.failed {
        writeln!(f, "Failed #{id}: {e}")?;
    }
    Ok(f)
}

#[cfg(test)]
mod test {
    use escrow_common::Amount;
    use escrow_engine::{db_types::WalletRole, traits::WalletAudit};

    use super::*;

    fn audit_with(balance: i64, projected: i64) -> LedgerAudit {
        let wallets = vec![
            WalletAudit {
                wallet_id: 1,
                role: WalletRole::Central,
                owner_id: None,
                balance: Amount::from(0),
                projected: Amount::from(0),
            },
            WalletAudit {
                wallet_id: 2,
                role: WalletRole::User,
                owner_id: Some("alice".into()),
                balance: Amount::from(balance),
                projected: Amount::from(projected),
            },
        ];
        LedgerAudit { wallets, escrow_balance: Amount::from(0), outstanding_holds: Amount::from(0) }
    }

    #[test]
    fn consistent_audit_hides_the_wallets() {
        let s = format_audit(&audit_with(1250, 1250), false).unwrap();
        assert!(s.contains("All 2 wallets agree"), "{s}");
        assert!(s.ends_with("✅️ Consistent\n"));
        let s = format_audit(&audit_with(1250, 1250), true).unwrap();
        assert!(s.contains("| 2 "), "{s}");
    }

    #[test]
    fn inconsistent_audit_lists_the_culprit() {
        let s = format_audit(&audit_with(1250, 1000), false).unwrap();
        assert!(s.contains("alice"), "{s}");
        assert!(s.contains("2.50"), "{s}");
        assert!(!s.contains("Central"), "{s}");
        assert!(s.contains("INCONSISTENT"));
    }

    #[test]
    fn empty_sweep() {
        assert_eq!(format_expiry_result(&ExpiryResult::default()).unwrap(), "Nothing to expire\n");
        let failed = vec![(5, "database is locked".into())];
        let result = ExpiryResult { skipped: vec![3], failed, ..Default::default() };
        let s = format_expiry_result(&result).unwrap();
        assert_eq!(s, "Skipped #3: answered while the sweep was running\nFailed #5: database is locked\n");
    }

    #[test]
    fn no_transactions() {
        assert_eq!(format_transactions(&[]), "No transactions");
    }
}
