use crate::event::Event;

/// This trait is used to define an async event handler. For simple cases
/// the preferred handling method is closures.
#[async_trait::async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: Event);
}
