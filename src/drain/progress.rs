use tokio::sync::mpsc;

/// A single-slot "a message was processed" notification.
///
/// Notifications coalesce: while one is pending, further ones are dropped, so
/// the sender never waits on the receiver.
pub fn progress_channel() -> (ProgressSender, ProgressReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (ProgressSender(tx), ProgressReceiver(rx))
}

#[derive(Debug, Clone)]
pub struct ProgressSender(mpsc::Sender<()>);

impl ProgressSender {
    pub fn notify(&self) {
        // Full means a notification is already pending, closed means nobody
        // is watching anymore. Both are fine.
        let _ = self.0.try_send(());
    }
}

#[derive(Debug)]
pub struct ProgressReceiver(mpsc::Receiver<()>);

impl ProgressReceiver {
    /// Wait for the next notification.
    ///
    /// Returns `false` once every sender is gone and nothing is pending: no
    /// notification will ever arrive again.
    pub async fn recv(&mut self) -> bool {
        self.0.recv().await.is_some()
    }
}
