//! Data types that are persisted in, and returned from, the escrow database.
use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
pub use escrow_common::Amount;
use serde::{Deserialize, Serialize};
use sqlx::{types::Json, FromRow, Type};
use thiserror::Error;

pub type WalletId = i64;
pub type TransactionId = i64;
pub type BookingId = i64;

#[derive(Debug, Clone, Error)]
#[error("Invalid conversion: {0}")]
pub struct ConversionError(String);

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Type)]
        #[sqlx(transparent)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn new<S: Into<String>>(id: S) -> Self {
                Self(id.into())
            }

            pub fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

string_id!(
    /// The identity of an authenticated actor, as supplied by the upstream auth layer.
    UserId
);
string_id!(TravelId);
string_id!(PackageId);

//--------------------------------------        Wallets        -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum WalletRole {
    User,
    Central,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Wallet {
    pub id: WalletId,
    pub owner_id: Option<UserId>,
    pub role: WalletRole,
    pub balance: Amount,
    pub currency: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Handle on the single central escrow wallet. It can only be obtained from the database (see
/// [`crate::traits::LedgerManagement::escrow_wallet`]), is resolved once at start-up and then handed to every API that
/// moves funds in or out of escrow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EscrowWallet {
    id: WalletId,
    currency: String,
}

impl EscrowWallet {
    pub fn id(&self) -> WalletId {
        self.id
    }

    pub fn currency(&self) -> &str {
        self.currency.as_str()
    }
}

impl TryFrom<Wallet> for EscrowWallet {
    type Error = ConversionError;

    fn try_from(wallet: Wallet) -> Result<Self, Self::Error> {
        match wallet.role {
            WalletRole::Central => Ok(Self { id: wallet.id, currency: wallet.currency }),
            WalletRole::User => Err(ConversionError(format!("Wallet #{} is a user wallet", wallet.id))),
        }
    }
}

//--------------------------------------   Wallet transactions   -----------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Deposit,
    Withdraw,
    Spend,
    Hold,
    Release,
    Refund,
}

impl Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Deposit => "DEPOSIT",
            Self::Withdraw => "WITHDRAW",
            Self::Spend => "SPEND",
            Self::Hold => "HOLD",
            Self::Release => "RELEASE",
            Self::Refund => "REFUND",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(rename_all = "UPPERCASE")]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
}

impl Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Free-form context attached to a ledger record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payout_status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl TxMetadata {
    pub fn with_note<S: Into<String>>(note: S) -> Self {
        Self { note: Some(note.into()), ..Default::default() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct WalletTransaction {
    pub id: TransactionId,
    pub wallet_id: WalletId,
    pub tx_type: TransactionType,
    /// The signed change this record applied (or, while pending, will apply) to the wallet balance.
    pub amount: Amount,
    pub status: TransactionStatus,
    pub booking_id: Option<BookingId>,
    pub provider_ref: Option<String>,
    pub related_tx_id: Option<TransactionId>,
    /// Only meaningful for HOLD records: set once the hold has been released or refunded.
    pub settled_at: Option<DateTime<Utc>>,
    pub metadata: Json<TxMetadata>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WalletTransaction {
    pub fn is_outstanding_hold(&self) -> bool {
        self.tx_type == TransactionType::Hold && self.settled_at.is_none()
    }
}

/// The shape of a ledger record before it is written.
#[derive(Debug, Clone)]
pub struct NewWalletTransaction {
    pub wallet_id: WalletId,
    pub tx_type: TransactionType,
    pub amount: Amount,
    pub status: TransactionStatus,
    pub booking_id: Option<BookingId>,
    pub provider_ref: Option<String>,
    pub related_tx_id: Option<TransactionId>,
    pub metadata: TxMetadata,
}

impl NewWalletTransaction {
    pub fn new(wallet_id: WalletId, tx_type: TransactionType, amount: Amount, status: TransactionStatus) -> Self {
        Self {
            wallet_id,
            tx_type,
            amount,
            status,
            booking_id: None,
            provider_ref: None,
            related_tx_id: None,
            metadata: TxMetadata::default(),
        }
    }

    pub fn for_booking(mut self, booking_id: BookingId) -> Self {
        self.booking_id = Some(booking_id);
        self
    }

    pub fn with_provider_ref<S: Into<String>>(mut self, provider_ref: S) -> Self {
        self.provider_ref = Some(provider_ref.into());
        self
    }

    pub fn related_to(mut self, tx_id: TransactionId) -> Self {
        self.related_tx_id = Some(tx_id);
        self
    }

    pub fn with_metadata(mut self, metadata: TxMetadata) -> Self {
        self.metadata = metadata;
        self
    }
}

//--------------------------------------        Bookings       -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    New,
    PendingAcceptance,
    PickUp,
    OnTheWay,
    Delivered,
    Completed,
    Rejected,
    Cancel,
    ProblemWithThePackage,
    AllConditionsAreNotMet,
    Declined,
}

impl BookingStatus {
    /// States from which no further transition is possible. `Rejected` is not terminal: it re-opens drop-off.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancel | Self::Declined)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::PendingAcceptance => "pending_acceptance",
            Self::PickUp => "pick_up",
            Self::OnTheWay => "on_the_way",
            Self::Delivered => "delivered",
            Self::Completed => "completed",
            Self::Rejected => "rejected",
            Self::Cancel => "cancel",
            Self::ProblemWithThePackage => "problem_with_the_package",
            Self::AllConditionsAreNotMet => "all_conditions_are_not_met",
            Self::Declined => "declined",
        }
    }
}

impl Display for BookingStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BookingStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(Self::New),
            "pending_acceptance" => Ok(Self::PendingAcceptance),
            "pick_up" => Ok(Self::PickUp),
            "on_the_way" => Ok(Self::OnTheWay),
            "delivered" => Ok(Self::Delivered),
            "completed" => Ok(Self::Completed),
            "rejected" => Ok(Self::Rejected),
            "cancel" => Ok(Self::Cancel),
            "problem_with_the_package" => Ok(Self::ProblemWithThePackage),
            "all_conditions_are_not_met" => Ok(Self::AllConditionsAreNotMet),
            "declined" => Ok(Self::Declined),
            _ => Err(ConversionError(format!("'{s}' is not a booking status"))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Unpaid,
    Processing,
    Paid,
    Failed,
    Refunded,
    Released,
}

impl Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Unpaid => "unpaid",
            Self::Processing => "processing",
            Self::Paid => "paid",
            Self::Failed => "failed",
            Self::Refunded => "refunded",
            Self::Released => "released",
        };
        f.write_str(s)
    }
}

/// Who performed a transition, relative to the booking it applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ActorRole {
    Owner,
    Traveler,
    System,
}

impl Display for ActorRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Owner => "owner",
            Self::Traveler => "traveler",
            Self::System => "system",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Booking {
    pub id: BookingId,
    pub travel_id: TravelId,
    pub package_id: PackageId,
    /// The package owner, who pays for the booking.
    pub owner_id: UserId,
    /// The traveler carrying the package, who is paid on completion.
    pub traveler_id: UserId,
    pub status: BookingStatus,
    pub amount: Amount,
    pub currency: String,
    pub paid: bool,
    pub payment_status: PaymentStatus,
    pub payment_intent_id: Option<String>,
    pub confirmed: bool,
    pub pick_up_photo: Option<String>,
    pub pick_up_sender_signature: Option<String>,
    pub pick_up_traveler_signature: Option<String>,
    pub drop_off_photo: Option<String>,
    pub drop_off_receiver_signature: Option<String>,
    pub drop_off_traveler_signature: Option<String>,
    pub problem_reason: Option<String>,
    pub rejection_reason: Option<String>,
    pub cancelled_by: Option<UserId>,
    pub cancelled_by_role: Option<ActorRole>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Booking {
    /// The role `user` plays in this booking, if any.
    pub fn role_of(&self, user: &UserId) -> Option<ActorRole> {
        if &self.owner_id == user {
            Some(ActorRole::Owner)
        } else if &self.traveler_id == user {
            Some(ActorRole::Traveler)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBooking {
    pub travel_id: TravelId,
    pub package_id: PackageId,
    pub owner_id: UserId,
    pub amount: Amount,
    pub currency: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct BookingEvent {
    pub id: i64,
    pub booking_id: BookingId,
    pub from_status: Option<BookingStatus>,
    pub to_status: BookingStatus,
    pub actor_id: Option<UserId>,
    pub actor_role: ActorRole,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------     Catalog read model    ---------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Travel {
    pub id: TravelId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Package {
    pub id: PackageId,
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Report {
    pub id: i64,
    pub booking_id: BookingId,
    pub reporter_id: UserId,
    pub details: String,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------     Announcements     -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Type)]
#[sqlx(rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AnnouncementResolution {
    Accepted,
    Refused,
    Expired,
    /// The booking was cancelled, or its payment refunded, before the traveler answered.
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct AnnouncementRequest {
    pub id: i64,
    pub booking_id: BookingId,
    pub travel_id: TravelId,
    pub package_id: PackageId,
    pub is_accepted: bool,
    pub is_refused: bool,
    pub is_processed: bool,
    pub resolution: Option<AnnouncementResolution>,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

//--------------------------------------   Processed webhooks   ------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ProcessedEvent {
    pub event_id: String,
    pub event_type: String,
    pub outcome: String,
    pub processed_at: DateTime<Utc>,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn booking_status_round_trips_through_strings() {
        for status in [
            BookingStatus::New,
            BookingStatus::PendingAcceptance,
            BookingStatus::AllConditionsAreNotMet,
            BookingStatus::Cancel,
        ] {
            assert_eq!(status.as_str().parse::<BookingStatus>().unwrap(), status);
        }
        assert!("cancelled".parse::<BookingStatus>().is_err());
    }

    #[test]
    fn escrow_wallet_requires_central_role() {
        let now = Utc::now();
        let mut wallet = Wallet {
            id: 1,
            owner_id: Some(UserId::from("alice")),
            role: WalletRole::User,
            balance: Amount::ZERO,
            currency: "EUR".into(),
            created_at: now,
            updated_at: now,
        };
        assert!(EscrowWallet::try_from(wallet.clone()).is_err());
        wallet.role = WalletRole::Central;
        wallet.owner_id = None;
        let escrow = EscrowWallet::try_from(wallet).unwrap();
        assert_eq!(escrow.id(), 1);
        assert_eq!(escrow.currency(), "EUR");
    }
}
