use crate::consumers::{ErrorHandler, RawDelivery};

/// Decides the fate of every drained delivery.
///
/// In destructive mode the delivery is acknowledged, which removes it from the
/// queue for good. Otherwise nothing is done: the delivery stays unacknowledged
/// and the broker requeues it once our channel closes.
#[derive(Debug, Clone, Copy)]
pub struct DispositionHandler {
    destructive: bool,
}

impl DispositionHandler {
    pub fn new(destructive: bool) -> Self {
        Self { destructive }
    }

    pub fn is_destructive(&self) -> bool {
        self.destructive
    }
}

#[async_trait::async_trait]
impl ErrorHandler for DispositionHandler {
    async fn on_error(&self, delivery: &RawDelivery) -> Result<(), anyhow::Error> {
        if !self.destructive {
            return Ok(());
        }
        // Only this delivery: `multiple` would also settle earlier unacked ones.
        delivery.ack(false).await
    }
}
