use std::{future::Future, pin::Pin, sync::Arc};

use crate::events::{
    BookingFundedEvent,
    BookingStatusChangedEvent,
    ConversationStatusEvent,
    EventHandler,
    EventProducer,
    Handler,
    NotificationEvent,
    PayoutFailedEvent,
};

type HookFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

#[derive(Default, Clone)]
pub struct EventProducers {
    pub booking_funded_producer: Vec<EventProducer<BookingFundedEvent>>,
    pub status_changed_producer: Vec<EventProducer<BookingStatusChangedEvent>>,
    pub notification_producer: Vec<EventProducer<NotificationEvent>>,
    pub conversation_producer: Vec<EventProducer<ConversationStatusEvent>>,
    pub payout_failed_producer: Vec<EventProducer<PayoutFailedEvent>>,
}

impl EventProducers {
    pub async fn publish_booking_funded(&self, event: BookingFundedEvent) {
        for producer in &self.booking_funded_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_status_changed(&self, event: BookingStatusChangedEvent) {
        for producer in &self.status_changed_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_notification(&self, event: NotificationEvent) {
        for producer in &self.notification_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_conversation_status(&self, event: ConversationStatusEvent) {
        for producer in &self.conversation_producer {
            producer.publish_event(event.clone()).await;
        }
    }

    pub async fn publish_payout_failed(&self, event: PayoutFailedEvent) {
        for producer in &self.payout_failed_producer {
            producer.publish_event(event.clone()).await;
        }
    }
}

pub struct EventHandlers {
    pub on_booking_funded: Option<EventHandler<BookingFundedEvent>>,
    pub on_status_changed: Option<EventHandler<BookingStatusChangedEvent>>,
    pub on_notification: Option<EventHandler<NotificationEvent>>,
    pub on_conversation_status: Option<EventHandler<ConversationStatusEvent>>,
    pub on_payout_failed: Option<EventHandler<PayoutFailedEvent>>,
}

impl EventHandlers {
    pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
        Self {
            on_booking_funded: hooks.on_booking_funded.map(|f| EventHandler::new(buffer_size, f)),
            on_status_changed: hooks.on_status_changed.map(|f| EventHandler::new(buffer_size, f)),
            on_notification: hooks.on_notification.map(|f| EventHandler::new(buffer_size, f)),
            on_conversation_status: hooks.on_conversation_status.map(|f| EventHandler::new(buffer_size, f)),
            on_payout_failed: hooks.on_payout_failed.map(|f| EventHandler::new(buffer_size, f)),
        }
    }

    pub fn producers(&self) -> EventProducers {
        let mut result = EventProducers::default();
        if let Some(handler) = &self.on_booking_funded {
            result.booking_funded_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_status_changed {
            result.status_changed_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_notification {
            result.notification_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_conversation_status {
            result.conversation_producer.push(handler.subscribe());
        }
        if let Some(handler) = &self.on_payout_failed {
            result.payout_failed_producer.push(handler.subscribe());
        }
        result
    }

    pub async fn start_handlers(self) {
        if let Some(handler) = self.on_booking_funded {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_status_changed {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_notification {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_conversation_status {
            tokio::spawn(handler.start_handler());
        }
        if let Some(handler) = self.on_payout_failed {
            tokio::spawn(handler.start_handler());
        }
    }
}

#[derive(Default, Clone)]
pub struct EventHooks {
    pub on_booking_funded: Option<Handler<BookingFundedEvent>>,
    pub on_status_changed: Option<Handler<BookingStatusChangedEvent>>,
    pub on_notification: Option<Handler<NotificationEvent>>,
    pub on_conversation_status: Option<Handler<ConversationStatusEvent>>,
    pub on_payout_failed: Option<Handler<PayoutFailedEvent>>,
}

impl EventHooks {
    pub fn on_booking_funded<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(BookingFundedEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_booking_funded = Some(Arc::new(f));
        self
    }

    pub fn on_status_changed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(BookingStatusChangedEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_status_changed = Some(Arc::new(f));
        self
    }

    pub fn on_notification<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(NotificationEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_notification = Some(Arc::new(f));
        self
    }

    pub fn on_conversation_status<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(ConversationStatusEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_conversation_status = Some(Arc::new(f));
        self
    }

    pub fn on_payout_failed<F>(&mut self, f: F) -> &mut Self
    where F: (Fn(PayoutFailedEvent) -> HookFuture) + Send + Sync + 'static {
        self.on_payout_failed = Some(Arc::new(f));
        self
    }
}
