//! Event routing from gateway connection to subscribers.

use std::sync::Arc;

use crate::{filter::Filter, subscriber::Subscriber, ws::Event};

/// Receives every dispatch event, in the order they arrived on the socket
#[async_trait::async_trait]
pub trait EventRouter: Send + Sync {
    /// route one event
    async fn dispatch(&self, event: Arc<Event>);
}

struct Route {
    filter: Box<dyn Filter + Send + Sync>,
    subscriber: Arc<dyn Subscriber + Send + Sync>,
}

/// Explicit list of filter and subscriber pairs.
///
/// By default matching subscribers are run as separate tasks, so a slow
/// subscriber never holds up the connection. Events are handed out in socket
/// order, but tasks of one subscriber may finish out of that order.
///
/// A router built by [`Router::ordered`] awaits each subscriber in place
/// instead. Every subscriber then sees events in socket order, at the cost of
/// holding up the connection while it runs. Such a subscriber must not wait
/// on the gateway connection, or it waits on itself.
#[derive(Default)]
pub struct Router {
    routes: Vec<Route>,
    ordered: bool,
}

impl std::fmt::Debug for Router {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.routes.iter().map(|route| route.subscriber.name()))
            .finish()
    }
}

impl Router {
    /// Router that runs subscribers one by one on the connection task
    pub fn ordered() -> Self {
        Self {
            routes: Vec::new(),
            ordered: true,
        }
    }

    /// Register a subscriber for events passing `filter`
    pub fn route<F, S>(&mut self, filter: F, subscriber: S)
    where
        F: Filter + Send + Sync + 'static,
        S: Subscriber + Send + Sync + 'static,
    {
        self.add(Box::new(filter), Arc::new(subscriber));
    }

    pub(crate) fn add(
        &mut self,
        filter: Box<dyn Filter + Send + Sync>,
        subscriber: Arc<dyn Subscriber + Send + Sync>,
    ) {
        log::debug!("Register subscriber {}", subscriber.name());
        self.routes.push(Route { filter, subscriber });
    }

    /// count of registered subscribers
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// no subscriber registered
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

#[async_trait::async_trait]
impl EventRouter for Router {
    async fn dispatch(&self, event: Arc<Event>) {
        for route in &self.routes {
            if !route.filter.filter_event(&event) {
                continue;
            }

            log::trace!(
                "Event {} {} goes to {}",
                event.sn,
                event.kind,
                route.subscriber.name()
            );

            let handled = Arc::clone(&route.subscriber).on_event(Arc::clone(&event));
            if self.ordered {
                handled.await;
            } else {
                tokio::spawn(handled);
            }
        }
    }
}

#[cfg(test)]
mod test {
    use std::borrow::Cow;

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;
    use crate::{filter, subscriber::Context};

    struct Recorder {
        tx: mpsc::UnboundedSender<String>,
    }

    #[async_trait::async_trait]
    impl Subscriber for Recorder {
        fn name(&self) -> Cow<'static, str> {
            "recorder".into()
        }

        async fn on_loaded(&mut self, _context: Context) {}

        async fn on_event(self: Arc<Self>, event: Arc<Event>) {
            self.tx.send(event.kind.clone()).unwrap();
        }
    }

    #[tokio::test]
    async fn test_router_dispatches_matching_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut router = Router::default();
        router.route(filter::kind("MESSAGE_CREATE"), Recorder { tx });
        assert_eq!(router.len(), 1);

        for (sn, kind) in [(1, "READY"), (2, "MESSAGE_CREATE")] {
            router
                .dispatch(Arc::new(Event {
                    sn,
                    kind: kind.to_string(),
                    data: json!({}),
                }))
                .await;
        }

        assert_eq!(rx.recv().await.as_deref(), Some("MESSAGE_CREATE"));
        assert!(rx.try_recv().is_err());
    }

    struct Slow {
        tx: mpsc::UnboundedSender<u64>,
    }

    #[async_trait::async_trait]
    impl Subscriber for Slow {
        fn name(&self) -> Cow<'static, str> {
            "slow".into()
        }

        async fn on_loaded(&mut self, _context: Context) {}

        async fn on_event(self: Arc<Self>, event: Arc<Event>) {
            // first event takes longest
            let delay = if event.sn == 1 { 100 } else { 0 };
            tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
            self.tx.send(event.sn).unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_ordered_router_keeps_socket_order() {
        let (tx, mut rx) = mpsc::unbounded_channel();

        let mut router = Router::ordered();
        router.route(filter::kind("TYPING_START"), Slow { tx });

        for sn in 1..=3 {
            router
                .dispatch(Arc::new(Event {
                    sn,
                    kind: "TYPING_START".to_string(),
                    data: json!({}),
                }))
                .await;
        }

        let mut seen = Vec::new();
        while let Ok(sn) = rx.try_recv() {
            seen.push(sn);
        }
        assert_eq!(seen, [1, 2, 3]);
    }
}
