use crate::helpers::{delivery, json_delivery, Acks, Output, ScriptedSource};
use draino::consumers::{ConsumerError, JsonValueDeserializer, MessageHandler, Pipeline};
use draino::drain::{DrainError, DrainRun, StopReason, DEFAULT_IDLE_TIMEOUT};
use fake::faker::name::en::Name;
use fake::Fake;
use serde_json::{json, Value};
use std::future::pending;
use std::time::Duration;
use tokio::time::{sleep, Instant};

fn drain_pipeline(run: &DrainRun, output: &Output) -> Pipeline<Value> {
    Pipeline::new(
        JsonValueDeserializer::<Value>::new(),
        run.message_handler(output.clone()),
        run.disposition_handler(),
    )
    .suppress_processing_errors(true)
}

fn messages(n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| json!({ "id": i, "name": Name().fake::<String>() }))
        .collect()
}

#[tokio::test(start_paused = true)]
async fn a_non_destructive_drain_prints_everything_and_acknowledges_nothing() {
    // Arrange
    let run = DrainRun::new(false);
    let output = Output::default();
    let acks = Acks::default();
    let messages = messages(3);
    let mut source = ScriptedSource::new(drain_pipeline(&run, &output));
    for (tag, message) in messages.iter().enumerate() {
        source = source.deliver_after(
            Duration::from_millis(400),
            json_delivery(tag as u64 + 1, message, &acks),
        );
    }
    let start = Instant::now();

    // Act
    let outcome = run.run_until_shutdown(&source, pending()).await.unwrap();

    // Assert
    assert_eq!(outcome.reason, StopReason::IdleTimeout);
    assert_eq!(outcome.rendered, 3);
    assert_eq!(output.lines(), messages);
    assert_eq!(acks.count(), 0);
    assert_eq!(source.closes(), 1);
    // The last message arrived at 1.2s.
    assert_eq!(
        start.elapsed(),
        Duration::from_millis(1200) + DEFAULT_IDLE_TIMEOUT
    );
}

#[tokio::test(start_paused = true)]
async fn a_destructive_drain_acknowledges_every_message_once() {
    // Arrange
    let run = DrainRun::new(true);
    let output = Output::default();
    let acks = Acks::default();
    let messages = messages(2);
    let source = ScriptedSource::new(drain_pipeline(&run, &output))
        .deliver_after(Duration::ZERO, json_delivery(1, &messages[0], &acks))
        .deliver_after(Duration::ZERO, json_delivery(2, &messages[1], &acks));

    // Act
    let outcome = run.run_until_shutdown(&source, pending()).await.unwrap();

    // Assert
    assert_eq!(outcome.reason, StopReason::IdleTimeout);
    assert_eq!(output.lines(), messages);
    assert_eq!(acks.count(), 2);
    assert_eq!(source.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn a_signal_stops_the_drain_after_the_in_flight_message() {
    // Arrange
    let run = DrainRun::new(true);
    let output = Output::default();
    let acks = Acks::default();
    let mut source = ScriptedSource::new(drain_pipeline(&run, &output));
    for (tag, message) in messages(20).iter().enumerate() {
        source = source.deliver_after(
            Duration::from_millis(100),
            json_delivery(tag as u64 + 1, message, &acks),
        );
    }

    // Act
    let outcome = run
        .run_until_shutdown(&source, sleep(Duration::from_millis(550)))
        .await
        .unwrap();

    // Assert
    assert_eq!(outcome.reason, StopReason::Signal);
    assert_eq!(outcome.rendered, 5);
    assert_eq!(output.lines().len(), 5);
    assert_eq!(acks.count(), 5);
    assert_eq!(source.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn malformed_messages_are_left_untouched() {
    // Arrange
    let run = DrainRun::new(true);
    let output = Output::default();
    let acks = Acks::default();
    let valid = json!({ "msg": "Hello, World!" });
    let source = ScriptedSource::new(drain_pipeline(&run, &output))
        .deliver_after(Duration::ZERO, delivery(1, "[1, 2, 3]", &acks))
        .deliver_after(Duration::ZERO, delivery(2, "not even json", &acks))
        .deliver_after(Duration::ZERO, json_delivery(3, &valid, &acks));

    // Act
    let outcome = run.run_until_shutdown(&source, pending()).await.unwrap();

    // Assert
    assert_eq!(outcome.reason, StopReason::IdleTimeout);
    assert_eq!(outcome.rendered, 1);
    assert_eq!(output.lines(), vec![valid]);
    assert_eq!(acks.count(), 1);
}

#[tokio::test(start_paused = true)]
async fn a_failing_acknowledgment_fails_the_drain() {
    // Arrange
    let run = DrainRun::new(true);
    let output = Output::default();
    let acks = Acks::failing();
    let messages = messages(3);
    let mut source = ScriptedSource::new(drain_pipeline(&run, &output));
    for (tag, message) in messages.iter().enumerate() {
        source = source.deliver_after(Duration::ZERO, json_delivery(tag as u64 + 1, message, &acks));
    }

    // Act
    let outcome = run.run_until_shutdown(&source, pending()).await;

    // Assert
    assert!(matches!(outcome, Err(DrainError::Disposition(_))));
    // The first message was printed before its acknowledgment failed.
    assert_eq!(output.lines(), messages[..1].to_vec());
    assert_eq!(source.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn a_broken_delivery_stream_fails_the_drain() {
    let run = DrainRun::new(false);
    let output = Output::default();
    let source = ScriptedSource::new(drain_pipeline(&run, &output))
        .fail_after(Duration::from_millis(10), anyhow::anyhow!("connection reset"));

    let outcome = run.run_until_shutdown(&source, pending()).await;

    assert!(matches!(
        outcome,
        Err(DrainError::Consumer(ConsumerError::Stream(_)))
    ));
    assert_eq!(source.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn the_drain_ends_with_the_delivery_stream() {
    let run = DrainRun::new(false);
    let output = Output::default();
    let acks = Acks::default();
    let source = ScriptedSource::new(drain_pipeline(&run, &output))
        .deliver_after(Duration::ZERO, json_delivery(1, &json!({}), &acks))
        .then_end();

    let outcome = run.run_until_shutdown(&source, pending()).await.unwrap();

    assert_eq!(outcome.reason, StopReason::ConsumerFinished);
    assert_eq!(outcome.rendered, 1);
    assert_eq!(source.closes(), 1);
}

#[tokio::test(start_paused = true)]
async fn the_processing_delay_slows_the_drain_down() {
    let run = DrainRun::new(false);
    let output = Output::default();
    let acks = Acks::default();
    let pipeline = drain_pipeline(&run, &output).processing_delay(Duration::from_millis(300));
    let mut source = ScriptedSource::new(pipeline);
    for (tag, message) in messages(4).iter().enumerate() {
        source = source.deliver_after(Duration::ZERO, json_delivery(tag as u64 + 1, message, &acks));
    }

    // Four messages take 1.2s: a 1s signal interrupts the fourth pause.
    let outcome = run
        .run_until_shutdown(&source, sleep(Duration::from_secs(1)))
        .await
        .unwrap();

    assert_eq!(outcome.reason, StopReason::Signal);
    assert_eq!(outcome.rendered, 4);
}

#[tokio::test(start_paused = true)]
async fn a_burst_of_progress_never_blocks_the_handler() {
    let run = DrainRun::new(false);
    let output = Output::default();
    let handler = run.message_handler(output.clone());
    let source = ScriptedSource::new(drain_pipeline(&run, &output));

    // Nobody reads the progress notifications yet.
    for i in 0..1_000 {
        let _ = handler.on_receive(&i.to_string(), json!({ "i": i })).await;
    }
    let start = Instant::now();
    let outcome = run.run_until_shutdown(&source, pending()).await.unwrap();

    assert_eq!(outcome.reason, StopReason::IdleTimeout);
    assert_eq!(outcome.rendered, 1_000);
    // The pending notification counts as the last message.
    assert_eq!(start.elapsed(), DEFAULT_IDLE_TIMEOUT);
}

#[tokio::test(start_paused = true)]
async fn the_drain_stops_one_idle_period_after_the_last_message() {
    let run = DrainRun::new(false);
    let output = Output::default();
    let acks = Acks::default();
    let source = ScriptedSource::new(drain_pipeline(&run, &output)).deliver_after(
        Duration::from_millis(100),
        json_delivery(1, &json!({ "msg": "Hello, World!" }), &acks),
    );
    let start = Instant::now();

    let outcome = run.run_until_shutdown(&source, pending()).await.unwrap();

    assert_eq!(outcome.reason, StopReason::IdleTimeout);
    assert_eq!(outcome.rendered, 1);
    assert_eq!(
        start.elapsed() - Duration::from_millis(100),
        DEFAULT_IDLE_TIMEOUT
    );
}
