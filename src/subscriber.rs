//! Event subscribers.

use std::{borrow::Cow, future::Future, sync::Arc};

use crate::{api, ws};

/// Handles a subscriber gets when it is registered
#[derive(Debug, Clone)]
pub struct Context {
    /// REST channel
    pub api: api::Client,
    /// gateway connection, for presence updates and member queries
    pub gateway: ws::Client,
}

/// Subscriber can be register to bot and process event.
#[async_trait::async_trait]
pub trait Subscriber {
    /// subscriber name
    fn name(&self) -> Cow<'static, str>;
    /// callback will be execute when a bot load this subscriber
    async fn on_loaded(&mut self, context: Context);
    /// callback will be execute for every event passing the subscriber's filter
    async fn on_event(self: Arc<Self>, event: Arc<ws::Event>);
}

#[async_trait::async_trait]
impl<F, Fut> Subscriber for F
where
    F: Fn(Arc<ws::Event>) -> Fut + Send + Sync,
    Fut: Future<Output = ()> + Send,
{
    fn name(&self) -> Cow<'static, str> {
        "Anonymous Fn Subscriber".into()
    }

    async fn on_loaded(&mut self, _context: Context) {}

    async fn on_event(self: Arc<Self>, event: Arc<ws::Event>) {
        self(event).await
    }
}
