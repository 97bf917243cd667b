use crate::consumers::{ConsumerError, DeliverySource};
use crate::drain::{progress_channel, DispositionHandler, DrainHandler, ProgressReceiver, ProgressSender};
use futures_util::stream::FuturesUnordered;
use futures_util::{FutureExt, StreamExt};
use std::any::Any;
use std::future::Future;
use std::io::Write;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// How long the queue may stay quiet before a drain stops.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(1);

/// Why a drain stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The process received SIGINT, SIGTERM or SIGHUP.
    Signal,
    /// No message was processed during a whole idle period.
    IdleTimeout,
    /// The consumer stopped on its own, e.g. the broker cancelled it.
    ConsumerFinished,
    /// The token returned by [`DrainRun::shutdown_token`] was cancelled.
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainOutcome {
    pub reason: StopReason,
    /// How many messages were printed.
    pub rendered: usize,
}

#[derive(thiserror::Error, Debug)]
pub enum DrainError {
    #[error("Failed to listen for shutdown signals")]
    Signal(#[source] std::io::Error),
    #[error("Failed to settle a drained message")]
    Disposition(#[source] anyhow::Error),
    #[error("The consumer failed")]
    Consumer(#[source] ConsumerError),
    #[error("The drain panicked: {0}")]
    Panicked(String),
}

type WatcherResult = Result<Option<StopReason>, DrainError>;
type Watcher<'a> = Pin<Box<dyn Future<Output = WatcherResult> + Send + 'a>>;

/// A single drain, from the first delivery to the closed connection.
///
/// Three watchers race each other: the OS signal watcher, the idle watcher and
/// the consumer itself. Whichever finishes first cancels the shared token, the
/// other two observe it and return. The source is closed exactly once, after
/// all of them are done.
///
/// ```no_run
/// # async fn drain(settings: draino::amqp::configuration::RabbitMqSettings, topology: draino::consumers::Topology) -> Result<(), anyhow::Error> {
/// use draino::consumers::{ConsumerBuilder, JsonValueDeserializer, Pipeline};
/// use draino::drain::DrainRun;
///
/// let run = DrainRun::new(false);
/// let pipeline = Pipeline::new(
///     JsonValueDeserializer::<serde_json::Value>::new(),
///     run.message_handler(std::io::stdout()),
///     run.disposition_handler(),
/// )
/// .suppress_processing_errors(true);
/// let consumer = ConsumerBuilder::new(settings, topology).connect(pipeline).await?;
/// let outcome = run.run_until_signal(&consumer).await?;
/// println!("{} messages drained", outcome.rendered);
/// # Ok(())
/// # }
/// ```
pub struct DrainRun {
    destructive: bool,
    idle_timeout: Duration,
    shutdown: CancellationToken,
    progress_tx: ProgressSender,
    progress_rx: ProgressReceiver,
    rendered: Arc<AtomicUsize>,
}

impl DrainRun {
    pub fn new(destructive: bool) -> Self {
        let (progress_tx, progress_rx) = progress_channel();
        Self {
            destructive,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            shutdown: CancellationToken::new(),
            progress_tx,
            progress_rx,
            rendered: Default::default(),
        }
    }

    #[must_use]
    pub fn with_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }

    pub fn destructive(&self) -> bool {
        self.destructive
    }

    pub fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Cancelling the returned token stops the run with [`StopReason::Cancelled`].
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// A message handler printing to `output` and feeding this run's idle watcher.
    pub fn message_handler<W: Write + Send + 'static>(&self, output: W) -> DrainHandler<W> {
        DrainHandler::new(output, self.progress_tx.clone(), self.rendered.clone())
    }

    pub fn disposition_handler(&self) -> DispositionHandler {
        DispositionHandler::new(self.destructive)
    }

    /// Drain `source` until SIGINT, SIGTERM or SIGHUP, the idle timeout or the
    /// end of consumption.
    pub async fn run_until_signal<S>(self, source: &S) -> Result<DrainOutcome, DrainError>
    where
        S: DeliverySource + ?Sized,
    {
        let signal = shutdown_signal().map_err(DrainError::Signal)?;
        self.run_until_shutdown(source, signal).await
    }

    /// Like [`DrainRun::run_until_signal`], with `signal` standing in for the OS
    /// signals.
    #[tracing::instrument(
        name = "drain_run",
        skip_all,
        fields(destructive = self.destructive, idle_timeout = ?self.idle_timeout)
    )]
    pub async fn run_until_shutdown<S, F>(
        self,
        source: &S,
        signal: F,
    ) -> Result<DrainOutcome, DrainError>
    where
        S: DeliverySource + ?Sized,
        F: Future<Output = ()> + Send,
    {
        let Self {
            idle_timeout,
            shutdown,
            progress_tx,
            progress_rx,
            rendered,
            ..
        } = self;
        drop(progress_tx);

        let watchers = AssertUnwindSafe(race(
            source,
            signal,
            progress_rx,
            idle_timeout,
            shutdown.clone(),
        ))
        .catch_unwind()
        .await;

        // Whatever happened above, nothing is consuming anymore.
        shutdown.cancel();
        if let Err(e) = source.close().await {
            warn!(error = ?e, "Failed to close the consumer cleanly");
        }

        let reason = match watchers {
            Ok(result) => result?,
            Err(panic) => {
                let message = panic_message(panic);
                error!(%message, "The drain panicked");
                return Err(DrainError::Panicked(message));
            }
        };
        let rendered = rendered.load(Ordering::Relaxed);
        info!(?reason, rendered, "Drain finished");
        Ok(DrainOutcome { reason, rendered })
    }
}

async fn race<S, F>(
    source: &S,
    signal: F,
    progress: ProgressReceiver,
    idle_timeout: Duration,
    shutdown: CancellationToken,
) -> Result<StopReason, DrainError>
where
    S: DeliverySource + ?Sized,
    F: Future<Output = ()> + Send,
{
    let mut watchers: FuturesUnordered<Watcher<'_>> = FuturesUnordered::new();
    watchers.push(Box::pin(watch_signal(signal, shutdown.clone())));
    watchers.push(Box::pin(watch_idle(progress, idle_timeout, shutdown.clone())));
    watchers.push(Box::pin(watch_consumer(source, shutdown.clone())));

    let mut reason = None;
    let mut failure = None;
    while let Some(result) = watchers.next().await {
        match result {
            Ok(Some(stopped_by)) => {
                reason.get_or_insert(stopped_by);
            }
            Ok(None) => {}
            Err(e) => {
                shutdown.cancel();
                match failure {
                    None => failure = Some(e),
                    Some(_) => warn!(error = ?e, "Another failure while stopping the drain"),
                }
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(reason.unwrap_or(StopReason::Cancelled)),
    }
}

async fn watch_signal<F>(signal: F, shutdown: CancellationToken) -> WatcherResult
where
    F: Future<Output = ()> + Send,
{
    tokio::select! {
        biased;

        _ = shutdown.cancelled() => Ok(None),
        _ = signal => {
            info!("Shutdown signal received, stopping the drain");
            shutdown.cancel();
            Ok(Some(StopReason::Signal))
        }
    }
}

/// Fires once no message was processed for a whole `period`. Every progress
/// notification restarts the countdown.
async fn watch_idle(
    mut progress: ProgressReceiver,
    period: Duration,
    shutdown: CancellationToken,
) -> WatcherResult {
    let deadline = sleep(period);
    tokio::pin!(deadline);
    let mut senders_alive = true;
    loop {
        tokio::select! {
            biased;

            _ = shutdown.cancelled() => return Ok(None),
            notified = progress.recv(), if senders_alive => {
                if notified {
                    deadline.as_mut().reset(Instant::now() + period);
                } else {
                    senders_alive = false;
                }
            }
            _ = &mut deadline => {
                info!("No messages for {period:?}, stopping the drain");
                shutdown.cancel();
                return Ok(Some(StopReason::IdleTimeout));
            }
        }
    }
}

async fn watch_consumer<S>(source: &S, shutdown: CancellationToken) -> WatcherResult
where
    S: DeliverySource + ?Sized,
{
    let outcome = source.run(shutdown.clone()).await;
    let finished_first = !shutdown.is_cancelled();
    shutdown.cancel();
    match outcome {
        Ok(()) if finished_first => {
            info!("The consumer stopped on its own");
            Ok(Some(StopReason::ConsumerFinished))
        }
        Ok(()) => {
            debug!("The consumer stopped");
            Ok(None)
        }
        Err(ConsumerError::Disposition(e)) => Err(DrainError::Disposition(e)),
        Err(e) => Err(DrainError::Consumer(e)),
    }
}

/// Resolves on the first SIGINT, SIGTERM or SIGHUP (`ctrl+c` on Windows).
///
/// The handlers are registered before returning, so signals received between
/// this call and the first poll are not lost.
#[cfg(unix)]
pub fn shutdown_signal() -> std::io::Result<impl Future<Output = ()> + Send> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut hangup = signal(SignalKind::hangup())?;
    Ok(async move {
        tokio::select! {
            _ = interrupt.recv() => info!("Received SIGINT"),
            _ = terminate.recv() => info!("Received SIGTERM"),
            _ = hangup.recv() => info!("Received SIGHUP"),
        }
    })
}

/// Resolves on the first SIGINT, SIGTERM or SIGHUP (`ctrl+c` on Windows).
#[cfg(not(unix))]
pub fn shutdown_signal() -> std::io::Result<impl Future<Output = ()> + Send> {
    Ok(async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received ctrl+c"),
            Err(e) => {
                warn!(error = ?e, "Cannot listen for ctrl+c");
                std::future::pending::<()>().await
            }
        }
    })
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    match panic.downcast::<String>() {
        Ok(message) => *message,
        Err(panic) => match panic.downcast_ref::<&str>() {
            Some(message) => (*message).to_owned(),
            None => "unknown panic payload".to_owned(),
        },
    }
}
