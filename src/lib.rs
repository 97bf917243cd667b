//! `draino` drains RabbitMQ queues: every message is printed to stdout as a line
//! of JSON and, in destructive mode, deleted from the queue. It can also fill a
//! queue with test messages.
//!
//! [`DrainRun`](crate::drain::DrainRun) is the best starting point: it ties a
//! [`Consumer`](crate::consumers::Consumer) to the drain handlers and decides when
//! the drain is over.

pub mod config;
pub mod consumers;
pub mod drain;
pub mod fill;
pub mod logging;
pub mod publishers;

pub mod amqp;
pub mod pool;
