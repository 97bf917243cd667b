use draino::amqp::BasicProperties;
use draino::consumers::{Acknowledge, ConsumerError, DeliverySource, Pipeline, RawDelivery};
use futures_util::{stream, StreamExt};
use serde_json::Value;
use std::io::Write;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Counts acknowledgments, optionally failing them all.
#[derive(Clone, Default)]
pub struct Acks {
    count: Arc<AtomicUsize>,
    fail: bool,
}

impl Acks {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn count(&self) -> usize {
        self.count.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl Acknowledge for Acks {
    async fn ack(&self, multiple: bool) -> Result<(), anyhow::Error> {
        assert!(!multiple, "deliveries must be acknowledged one by one");
        if self.fail {
            return Err(anyhow::anyhow!("the channel is closed"));
        }
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn delivery(tag: u64, payload: impl Into<Vec<u8>>, acks: &Acks) -> RawDelivery {
    let properties = BasicProperties::default().with_message_id(tag.to_string().into());
    RawDelivery::new(tag, properties, payload.into(), acks.clone())
}

pub fn json_delivery(tag: u64, value: &Value, acks: &Acks) -> RawDelivery {
    delivery(tag, serde_json::to_vec(value).unwrap(), acks)
}

/// Captures what the drain handler prints.
#[derive(Clone, Default)]
pub struct Output(Arc<Mutex<Vec<u8>>>);

impl Output {
    pub fn lines(&self) -> Vec<Value> {
        let buffer = self.0.lock().unwrap();
        std::str::from_utf8(&buffer)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }
}

impl Write for Output {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

type Scheduled = (Duration, Result<RawDelivery, anyhow::Error>);

/// Feeds a pipeline from a scripted, in-memory delivery stream.
///
/// Once the script is exhausted the stream stays open, like a quiet queue,
/// unless [`ScriptedSource::then_end`] was used.
pub struct ScriptedSource<V = Value> {
    pipeline: Pipeline<V>,
    script: Mutex<Vec<Scheduled>>,
    ends: bool,
    closes: AtomicUsize,
}

impl<V> ScriptedSource<V> {
    pub fn new(pipeline: Pipeline<V>) -> Self {
        Self {
            pipeline,
            script: Mutex::new(Vec::new()),
            ends: false,
            closes: AtomicUsize::new(0),
        }
    }

    /// Push `delivery` once `delay` has elapsed since the previous one.
    pub fn deliver_after(self, delay: Duration, delivery: RawDelivery) -> Self {
        self.script.lock().unwrap().push((delay, Ok(delivery)));
        self
    }

    pub fn fail_after(self, delay: Duration, error: anyhow::Error) -> Self {
        self.script.lock().unwrap().push((delay, Err(error)));
        self
    }

    pub fn then_end(mut self) -> Self {
        self.ends = true;
        self
    }

    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl<V: Send + 'static> DeliverySource for ScriptedSource<V> {
    async fn run(&self, shutdown: CancellationToken) -> Result<(), ConsumerError> {
        let script = std::mem::take(&mut *self.script.lock().unwrap());
        let scripted = stream::iter(script).then(|(delay, item)| async move {
            tokio::time::sleep(delay).await;
            item
        });
        if self.ends {
            self.pipeline.drive(scripted, &shutdown).await
        } else {
            self.pipeline
                .drive(scripted.chain(stream::pending()), &shutdown)
                .await
        }
    }

    async fn close(&self) -> Result<(), anyhow::Error> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
