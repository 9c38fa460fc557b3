//! Local event handlers.

use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use futures::future::BoxFuture;

use playhub_core::events::DomainEvent;
use playhub_core::result::AppResult;

/// A local consumer of domain events.
///
/// Each invocation runs in its own task; an error is logged by the broker
/// and never reaches the publisher or other handlers.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Handle one event.
    async fn handle(&self, event: &DomainEvent) -> AppResult<()>;
}

/// Handler backed by a closure.
pub struct FnHandler<F> {
    name: String,
    f: F,
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").field("name", &self.name).finish()
    }
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(DomainEvent) -> BoxFuture<'static, AppResult<()>> + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &DomainEvent) -> AppResult<()> {
        (self.f)(event.clone()).await
    }
}

/// Build a handler from an async closure.
pub fn handler_fn<F, Fut>(
    name: impl Into<String>,
    f: F,
) -> FnHandler<impl Fn(DomainEvent) -> BoxFuture<'static, AppResult<()>> + Send + Sync + 'static>
where
    F: Fn(DomainEvent) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = AppResult<()>> + Send + 'static,
{
    FnHandler {
        name: name.into(),
        f: move |event| -> BoxFuture<'static, AppResult<()>> { Box::pin(f(event)) },
    }
}
