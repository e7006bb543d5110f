//! Forwards engine events to the notification/chat collaborator.
//!
//! Events are delivered after the transition that produced them has committed, and each one in its own task. A
//! delivery that fails is logged and dropped; the booking or ledger change stands regardless.
use escrow_engine::events::{
    ConversationStatusEvent,
    EventHooks,
    NotificationEvent,
    PayoutFailedEvent,
};
use log::*;
use reqwest::Client;
use serde::Serialize;
use serde_json::{json, Value};

#[derive(Clone)]
pub struct NotificationForwarder {
    client: Client,
    url: String,
}

impl NotificationForwarder {
    pub fn new<S: Into<String>>(url: S) -> Self {
        Self { client: Client::new(), url: url.into() }
    }

    pub async fn forward(&self, body: Value) {
        match self.client.post(&self.url).json(&body).send().await {
            Ok(res) if res.status().is_success() => trace!("📬️ Event delivered to {}", self.url),
            Ok(res) => warn!("📬️ {} refused an event with status {}", self.url, res.status()),
            Err(e) => warn!("📬️ Could not deliver an event to {}. {e}", self.url),
        }
    }
}

fn envelope<T: Serialize>(kind: &str, payload: &T) -> Value {
    json!({ "type": kind, "payload": payload })
}

/// Builds the hooks that log every user-facing event and, if `url` is set, post it there.
pub fn notification_hooks(url: Option<String>) -> EventHooks {
    let forwarder = url.map(NotificationForwarder::new);
    let mut hooks = EventHooks::default();
    let fwd = forwarder.clone();
    hooks.on_notification(move |ev: NotificationEvent| {
        let fwd = fwd.clone();
        Box::pin(async move {
            info!("📬️ To {} about booking #{}: {}", ev.recipient, ev.booking_id, ev.message);
            if let Some(fwd) = fwd {
                fwd.forward(envelope("notification", &ev)).await;
            }
        })
    });
    let fwd = forwarder.clone();
    hooks.on_conversation_status(move |ev: ConversationStatusEvent| {
        let fwd = fwd.clone();
        Box::pin(async move {
            debug!("📬️ Conversation for booking #{} is now {:?}", ev.booking_id, ev.status);
            if let Some(fwd) = fwd {
                fwd.forward(envelope("conversation_status", &ev)).await;
            }
        })
    });
    hooks.on_payout_failed(move |ev: PayoutFailedEvent| {
        let fwd = forwarder.clone();
        Box::pin(async move {
            warn!(
                "📬️ A payout failed ({}). Wallet #{} was credited {}",
                ev.reason, ev.refund.wallet_id, ev.refund.amount
            );
            if let Some(fwd) = fwd {
                fwd.forward(envelope("payout_failed", &ev)).await;
            }
        })
    });
    hooks
}

#[cfg(test)]
mod test {
    use escrow_engine::db_types::UserId;

    use super::*;

    #[test]
    fn events_are_wrapped_with_their_type() {
        let ev = NotificationEvent::new(UserId::new("alice"), 3, "Your booking #3 has been accepted");
        let body = envelope("notification", &ev);
        assert_eq!(body["type"], "notification");
        assert_eq!(body["payload"]["recipient"], "alice");
        assert_eq!(body["payload"]["booking_id"], 3);
    }

    #[test]
    fn hooks_are_always_installed() {
        let hooks = notification_hooks(None);
        assert!(hooks.on_notification.is_some());
        assert!(hooks.on_conversation_status.is_some());
        assert!(hooks.on_payout_failed.is_some());
        assert!(hooks.on_booking_funded.is_none());
    }
}
