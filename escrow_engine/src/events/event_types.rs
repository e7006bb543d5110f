use serde::{Deserialize, Serialize};

use crate::{
    db_types::{AnnouncementRequest, Booking, BookingId, BookingStatus, UserId, WalletTransaction},
    traits::Actor,
};

/// A booking has been paid for and is waiting for the traveler's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingFundedEvent {
    pub booking: Booking,
    pub announcement: AnnouncementRequest,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookingStatusChangedEvent {
    pub booking: Booking,
    pub from: BookingStatus,
    pub actor: Actor,
}

impl BookingStatusChangedEvent {
    pub fn new(booking: Booking, from: BookingStatus, actor: Actor) -> Self {
        Self { booking, from, actor }
    }
}

/// A message for a single user, to be delivered by the notification collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationEvent {
    pub recipient: UserId,
    pub booking_id: BookingId,
    pub message: String,
}

impl NotificationEvent {
    pub fn new<S: Into<String>>(recipient: UserId, booking_id: BookingId, message: S) -> Self {
        Self { recipient, booking_id, message: message.into() }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConversationStatus {
    Accepted,
    Declined,
}

/// The chat between owner and traveler should be flagged with the traveler's decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationStatusEvent {
    pub booking_id: BookingId,
    pub owner_id: UserId,
    pub traveler_id: UserId,
    pub status: ConversationStatus,
}

/// The provider reported that a payout it had accepted did not arrive. The wallet has already been credited back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PayoutFailedEvent {
    pub refund: WalletTransaction,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventType {
    BookingFunded(BookingFundedEvent),
    BookingStatusChanged(BookingStatusChangedEvent),
    Notification(NotificationEvent),
    ConversationStatus(ConversationStatusEvent),
    PayoutFailed(PayoutFailedEvent),
}
