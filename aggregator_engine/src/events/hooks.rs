use std::{future::Future, pin::Pin, sync::Arc};

use paste::paste;

use crate::events::{
    EventHandler,
    EventProducer,
    Handler,
    LockOrderCreatedEvent,
    OrderCancelledEvent,
    OrderRefundedEvent,
    OrderValidatedEvent,
    PaymentOrderExpiredEvent,
    ProviderAssignedEvent,
    WebhookExhaustedEvent,
};

/// Generates, for every `name: Event` pair, an `on_<name>` hook on [`EventHooks`] and [`EventHandlers`], a
/// `<name>_producer` list on [`EventProducers`] and an `EventProducers::publish_<name>` fan-out method.
macro_rules! event_hooks {
    ($($name:ident: $event:ty),+ $(,)?) => { paste! {
        #[derive(Default, Clone)]
        pub struct EventProducers {
            $(pub [<$name _producer>]: Vec<EventProducer<$event>>,)+
        }

        impl EventProducers {
            /// Combines the subscribers of two sets of handlers, so that components wired up in stages can share one
            /// set of producers.
            pub fn merge(mut self, other: EventProducers) -> Self {
                $(self.[<$name _producer>].extend(other.[<$name _producer>]);)+
                self
            }

            $(
            pub async fn [<publish_ $name>](&self, event: $event) {
                for producer in &self.[<$name _producer>] {
                    producer.publish_event(event.clone()).await;
                }
            }
            )+
        }

        pub struct EventHandlers {
            $(pub [<on_ $name>]: Option<EventHandler<$event>>,)+
        }

        impl EventHandlers {
            pub fn new(buffer_size: usize, hooks: EventHooks) -> Self {
                Self {
                    $([<on_ $name>]: hooks.[<on_ $name>].map(|f| EventHandler::new(buffer_size, f)),)+
                }
            }

            pub fn producers(&self) -> EventProducers {
                let mut result = EventProducers::default();
                $(
                if let Some(handler) = &self.[<on_ $name>] {
                    result.[<$name _producer>].push(handler.subscribe());
                }
                )+
                result
            }

            pub async fn start_handlers(self) {
                $(
                if let Some(handler) = self.[<on_ $name>] {
                    tokio::spawn(async move {
                        handler.start_handler().await;
                    });
                }
                )+
            }
        }

        #[derive(Default, Clone)]
        pub struct EventHooks {
            $(pub [<on_ $name>]: Option<Handler<$event>>,)+
        }

        impl EventHooks {
            $(
            pub fn [<on_ $name>]<F>(&mut self, f: F) -> &mut Self
            where F: (Fn($event) -> Pin<Box<dyn Future<Output = ()> + Send>>) + Send + Sync + 'static {
                self.[<on_ $name>] = Some(Arc::new(f));
                self
            }
            )+
        }
    }};
}

event_hooks! {
    lock_order_created: LockOrderCreatedEvent,
    provider_assigned: ProviderAssignedEvent,
    order_validated: OrderValidatedEvent,
    order_cancelled: OrderCancelledEvent,
    order_refunded: OrderRefundedEvent,
    payment_order_expired: PaymentOrderExpiredEvent,
    webhook_exhausted: WebhookExhaustedEvent,
}
