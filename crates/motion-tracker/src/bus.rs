// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Message bus abstraction.
//!
//! Trackers only see the [`MessageBus`] trait, so an AMQP client and the
//! in-process [`LocalBroker`] are interchangeable. Routing follows topic
//! exchange rules: keys are `.`-separated words, `*` in a binding matches
//! exactly one word and `#` matches zero or more words.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

/// Bus errors.
#[derive(Debug, Error)]
pub enum BusError {
    #[error("not connected")]
    NotConnected,

    #[error("exchange '{0}' is not declared")]
    UnknownExchange(String),

    #[error("bus closed")]
    Closed,

    #[error("broker error: {0}")]
    Broker(String),
}

/// A message delivered to a binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub exchange: String,
    pub routing_key: String,
    pub payload: Vec<u8>,
}

/// Stream of deliveries for one binding. Dropping it removes the binding.
#[derive(Debug)]
pub struct Subscription {
    exchange: String,
    binding_key: String,
    rx: mpsc::UnboundedReceiver<Delivery>,
}

impl Subscription {
    /// Wrap a receiver fed by a bus implementation.
    pub fn new(
        exchange: impl Into<String>,
        binding_key: impl Into<String>,
        rx: mpsc::UnboundedReceiver<Delivery>,
    ) -> Self {
        Self {
            exchange: exchange.into(),
            binding_key: binding_key.into(),
            rx,
        }
    }

    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    pub fn binding_key(&self) -> &str {
        &self.binding_key
    }

    /// Next delivery, `None` once the bus side is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        self.rx.recv().await
    }

    /// Next delivery if one is already queued.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        self.rx.try_recv().ok()
    }
}

/// Message bus client interface.
#[async_trait]
pub trait MessageBus: Send + Sync {
    /// Declare an exchange. Declaring an existing exchange is a no-op.
    async fn declare_exchange(&self, exchange: &str) -> Result<(), BusError>;

    /// Publish a payload to an exchange.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), BusError>;

    /// Bind a new queue to an exchange.
    async fn bind(&self, exchange: &str, binding_key: &str) -> Result<Subscription, BusError>;
}

struct Binding {
    key: String,
    tx: mpsc::UnboundedSender<Delivery>,
}

#[derive(Default)]
struct BrokerState {
    exchanges: HashMap<String, Vec<Binding>>,
}

/// In-process topic broker.
///
/// Cloning yields another handle to the same broker.
#[derive(Clone, Default)]
pub struct LocalBroker {
    state: Arc<Mutex<BrokerState>>,
    published: Arc<AtomicU64>,
}

impl LocalBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live bindings on an exchange.
    pub fn binding_count(&self, exchange: &str) -> usize {
        let mut state = self.state.lock();
        match state.exchanges.get_mut(exchange) {
            Some(bindings) => {
                bindings.retain(|b| !b.tx.is_closed());
                bindings.len()
            }
            None => 0,
        }
    }

    /// Total messages accepted by `publish`.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl MessageBus for LocalBroker {
    async fn declare_exchange(&self, exchange: &str) -> Result<(), BusError> {
        self.state
            .lock()
            .exchanges
            .entry(exchange.to_string())
            .or_default();
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: Vec<u8>,
    ) -> Result<(), BusError> {
        let mut state = self.state.lock();
        let bindings = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BusError::UnknownExchange(exchange.to_string()))?;

        // Receivers dropped since the last publish are unbound here.
        bindings.retain(|b| !b.tx.is_closed());
        for binding in bindings.iter() {
            if topic_matches(&binding.key, routing_key) {
                let _ = binding.tx.send(Delivery {
                    exchange: exchange.to_string(),
                    routing_key: routing_key.to_string(),
                    payload: payload.clone(),
                });
            }
        }

        self.published.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn bind(&self, exchange: &str, binding_key: &str) -> Result<Subscription, BusError> {
        let mut state = self.state.lock();
        let bindings = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| BusError::UnknownExchange(exchange.to_string()))?;

        let (tx, rx) = mpsc::unbounded_channel();
        bindings.push(Binding {
            key: binding_key.to_string(),
            tx,
        });
        Ok(Subscription::new(exchange, binding_key, rx))
    }
}

/// Topic exchange matching of a routing key against a binding key.
pub fn topic_matches(binding_key: &str, routing_key: &str) -> bool {
    let pattern: Vec<&str> = binding_key.split('.').collect();
    let words: Vec<&str> = if routing_key.is_empty() {
        Vec::new()
    } else {
        routing_key.split('.').collect()
    };
    topic_match_recursive(&pattern, &words)
}

fn topic_match_recursive(pattern: &[&str], words: &[&str]) -> bool {
    match pattern.split_first() {
        None => words.is_empty(),
        Some((&"#", rest)) => (0..=words.len()).any(|i| topic_match_recursive(rest, &words[i..])),
        Some((&"*", rest)) => !words.is_empty() && topic_match_recursive(rest, &words[1..]),
        Some((literal, rest)) => {
            words.first() == Some(literal) && topic_match_recursive(rest, &words[1..])
        }
    }
}
