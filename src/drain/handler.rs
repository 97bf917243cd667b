use crate::consumers::{HandlerError, MessageHandler};
use crate::drain::ProgressSender;
use serde_json::Value;
use std::io::{Stdout, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, error};

/// Prints each drained message as one line of JSON.
///
/// Build it with [`DrainRun::message_handler`](super::DrainRun::message_handler)
/// so that its progress notifications reach the run's idle watcher.
pub struct DrainHandler<W = Stdout> {
    output: Mutex<W>,
    progress: ProgressSender,
    rendered: Arc<AtomicUsize>,
}

impl<W: Write + Send + 'static> DrainHandler<W> {
    pub(crate) fn new(output: W, progress: ProgressSender, rendered: Arc<AtomicUsize>) -> Self {
        Self {
            output: Mutex::new(output),
            progress,
            rendered,
        }
    }

    fn render(&self, json: &str) -> std::io::Result<()> {
        let mut output = self.output.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(output, "{json}")?;
        output.flush()
    }
}

#[async_trait::async_trait]
impl<W: Write + Send + 'static> MessageHandler<Value> for DrainHandler<W> {
    async fn on_receive(&self, key: &str, value: Value) -> Result<(), HandlerError> {
        let message = match value {
            Value::Object(message) => message,
            other => {
                return Err(HandlerError::Malformed(anyhow::anyhow!(
                    "Expected a JSON object, got `{other}`"
                )))
            }
        };

        match serde_json::to_string(&message) {
            Ok(json) => {
                if let Err(e) = self.render(&json) {
                    error!(error = ?e, %key, "Failed to print a drained message");
                }
            }
            Err(e) => error!(error = ?e, %key, "Failed to serialize a drained message"),
        }
        self.rendered.fetch_add(1, Ordering::Relaxed);
        self.progress.notify();
        debug!(%key, "Drained message");

        // Never `Ok`: the pipeline would ack the delivery on its own. The
        // `DispositionHandler` is the only place deciding whether a drained
        // message is deleted, so every delivery is routed there.
        Err(HandlerError::NeedsDisposition)
    }
}
