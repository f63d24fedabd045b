//! Lifecycle event bus
//!
//! Many-to-many publish/subscribe for deploy lifecycle events. The publisher
//! awaits every subscriber before `trigger` returns, which is what lets a
//! front-end stall the engine between host enqueues to implement pausing.

use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use thiserror::Error;
use tracing::warn;

use rollout_exec::ResultMap;
use rollout_inventory::Host;

use crate::command::DeployResult;
use crate::error::AbortDeploy;

/// Everything the engine announces over the bus.
#[derive(Debug, Clone)]
pub enum Event {
    /// Last chance for subscribers to refuse the deploy
    DeployPrecheck,
    DeployBegin,
    /// Countdown tick of the inter-host sleep, once per second
    DeploySleep { host: Host, count: u64 },
    /// A host was handed to the rollout; subscribers may delay their return
    /// from this event to gate the next host
    DeployEnqueue { host: Host },
    DeployAbort { reason: String },
    DeployEnd,
    BuildBegin,
    /// Result of the `synchronize` command on the code-host
    BuildSync { sync_info: ResultMap },
    BuildEnd,
    HostBegin { host: Host },
    HostCommand { host: Host, command: Vec<String> },
    HostEnd { host: Host, results: Vec<DeployResult> },
    HostAbort {
        host: Host,
        error: String,
        should_be_alive: bool,
    },
}

impl Event {
    /// Dotted event name, for logs
    pub fn name(&self) -> &'static str {
        match self {
            Event::DeployPrecheck => "deploy.precheck",
            Event::DeployBegin => "deploy.begin",
            Event::DeploySleep { .. } => "deploy.sleep",
            Event::DeployEnqueue { .. } => "deploy.enqueue",
            Event::DeployAbort { .. } => "deploy.abort",
            Event::DeployEnd => "deploy.end",
            Event::BuildBegin => "build.begin",
            Event::BuildSync { .. } => "build.sync",
            Event::BuildEnd => "build.end",
            Event::HostBegin { .. } => "host.begin",
            Event::HostCommand { .. } => "host.command",
            Event::HostEnd { .. } => "host.end",
            Event::HostAbort { .. } => "host.abort",
        }
    }
}

/// How a subscriber can fail.
#[derive(Error, Debug)]
pub enum SubscriberError {
    /// Stop the whole deploy cleanly. Surfaced to the publisher after the
    /// remaining subscribers for the event have run.
    #[error("{0}")]
    Abort(String),

    /// Anything else; logged and swallowed so one bad sink cannot take the
    /// deploy down with it.
    #[error("{0}")]
    Failed(String),
}

/// A registered observer of lifecycle events.
#[async_trait]
pub trait Subscriber: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), SubscriberError>;
}

/// The bus itself. Registration is additive; there is no deregistration.
#[derive(Default)]
pub struct EventBus {
    subscribers: RwLock<Vec<Arc<dyn Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a subscriber. It will see every event triggered from now on, after
    /// all previously registered subscribers.
    pub fn register(&self, subscriber: Arc<dyn Subscriber>) {
        self.subscribers
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(subscriber);
    }

    /// Deliver `event` to every subscriber in registration order, awaiting
    /// each in turn. Completes only once all of them have settled.
    pub async fn trigger(&self, event: Event) -> Result<(), AbortDeploy> {
        let subscribers = self
            .subscribers
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        let mut abort: Option<AbortDeploy> = None;
        for subscriber in subscribers {
            match subscriber.handle_event(&event).await {
                Ok(()) => {}
                Err(SubscriberError::Abort(reason)) => {
                    if abort.is_none() {
                        abort = Some(AbortDeploy::new(reason));
                    }
                }
                Err(SubscriberError::Failed(error)) => {
                    warn!(event = event.name(), error = %error, "event subscriber failed");
                }
            }
        }

        match abort {
            Some(abort) => Err(abort),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct Recorder {
        order: Arc<std::sync::Mutex<Vec<String>>>,
        tag: String,
    }

    #[async_trait]
    impl Subscriber for Recorder {
        async fn handle_event(&self, event: &Event) -> Result<(), SubscriberError> {
            self.order
                .lock()
                .unwrap()
                .push(format!("{}:{}", self.tag, event.name()));
            Ok(())
        }
    }

    struct Failing;

    #[async_trait]
    impl Subscriber for Failing {
        async fn handle_event(&self, _event: &Event) -> Result<(), SubscriberError> {
            Err(SubscriberError::Failed("boom".to_string()))
        }
    }

    struct Aborting;

    #[async_trait]
    impl Subscriber for Aborting {
        async fn handle_event(&self, _event: &Event) -> Result<(), SubscriberError> {
            Err(SubscriberError::Abort("nope".to_string()))
        }
    }

    struct Counter(Arc<AtomicUsize>);

    #[async_trait]
    impl Subscriber for Counter {
        async fn handle_event(&self, _event: &Event) -> Result<(), SubscriberError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[tokio::test]
    async fn empty_bus_triggers_fine() {
        let bus = EventBus::new();
        bus.trigger(Event::DeployBegin).await.unwrap();
    }

    #[tokio::test]
    async fn subscribers_run_in_registration_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let bus = EventBus::new();
        bus.register(Arc::new(Recorder {
            order: Arc::clone(&order),
            tag: "first".to_string(),
        }));
        bus.register(Arc::new(Recorder {
            order: Arc::clone(&order),
            tag: "second".to_string(),
        }));

        bus.trigger(Event::DeployBegin).await.unwrap();

        assert_eq!(
            *order.lock().unwrap(),
            vec!["first:deploy.begin", "second:deploy.begin"]
        );
    }

    #[tokio::test]
    async fn failures_are_swallowed_and_siblings_still_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let bus = EventBus::new();
        bus.register(Arc::new(Failing));
        bus.register(Arc::new(Counter(Arc::clone(&count))));

        bus.trigger(Event::DeployBegin).await.unwrap();

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn abort_is_surfaced_after_siblings_run() {
        let count = Arc::new(AtomicUsize::new(0));
        let bus = EventBus::new();
        bus.register(Arc::new(Aborting));
        bus.register(Arc::new(Counter(Arc::clone(&count))));

        let abort = bus.trigger(Event::DeployPrecheck).await.unwrap_err();

        assert_eq!(abort.reason, "nope");
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
