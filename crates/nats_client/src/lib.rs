//! Thin NATS client wrapper used by the gateway for broadcast delivery.

pub mod client;

pub use client::NatsClient;
