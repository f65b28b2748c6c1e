//! Single-producer / single-consumer bridge from a pipeline run to the
//! outward response stream.
//!
//! The consumer polls with a short timeout so it notices a producer that
//! ended without a terminal event. Dropping the consumer fires the run's
//! cancellation token; whether the run honours it is up to the producer.

use std::time::Duration;

use futures::Stream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, warn};

use speech_coach_core::protocol::AnalysisEvent;

/// Create a bounded event channel for one run.
pub fn event_channel(capacity: usize, poll_interval: Duration) -> (EventSender, EventStream) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let cancel = CancellationToken::new();
    let sender = EventSender {
        tx,
        cancel: cancel.clone(),
        terminated: false,
        consumer_gone: false,
    };
    let stream = EventStream {
        rx,
        producer: None,
        poll_interval,
        done: false,
        _disconnect: cancel.drop_guard(),
    };
    (sender, stream)
}

/// Producer half. Accepts at most one terminal event; anything after it is dropped.
pub struct EventSender {
    tx: mpsc::Sender<AnalysisEvent>,
    cancel: CancellationToken,
    terminated: bool,
    consumer_gone: bool,
}

impl EventSender {
    /// Deliver an event. Returns `false` if it was dropped, either because a
    /// terminal event was already sent or because the consumer is gone.
    pub async fn send(&mut self, event: AnalysisEvent) -> bool {
        if self.terminated {
            debug!(?event, "Dropping event after terminal event");
            return false;
        }
        self.terminated = event.is_terminal();
        if self.consumer_gone {
            return false;
        }
        if self.tx.send(event).await.is_err() {
            debug!("Event consumer disconnected");
            self.consumer_gone = true;
            return false;
        }
        true
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Token fired when the consumer is dropped.
    pub fn disconnect_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// Consumer half.
pub struct EventStream {
    rx: mpsc::Receiver<AnalysisEvent>,
    producer: Option<JoinHandle<()>>,
    poll_interval: Duration,
    done: bool,
    _disconnect: DropGuard,
}

impl EventStream {
    /// Register the producer task so its exit can be detected between events.
    /// The task is detached, not aborted, when the stream is dropped.
    pub fn attach(&mut self, producer: JoinHandle<()>) {
        self.producer = Some(producer);
    }

    /// Next event, or `None` after the terminal event or once the producer has
    /// ended with nothing pending. A producer that ends without a terminal
    /// event yields one synthesized `error` event with no step.
    pub async fn next_event(&mut self) -> Option<AnalysisEvent> {
        if self.done {
            return None;
        }
        loop {
            match tokio::time::timeout(self.poll_interval, self.rx.recv()).await {
                Ok(Some(event)) => return Some(self.observe(event)),
                Ok(None) => return self.producer_lost(),
                Err(_) => {
                    let finished = self.producer.as_ref().is_some_and(|p| p.is_finished());
                    if finished {
                        return match self.rx.try_recv() {
                            Ok(event) => Some(self.observe(event)),
                            Err(_) => self.producer_lost(),
                        };
                    }
                }
            }
        }
    }

    fn observe(&mut self, event: AnalysisEvent) -> AnalysisEvent {
        if event.is_terminal() {
            self.done = true;
        }
        event
    }

    fn producer_lost(&mut self) -> Option<AnalysisEvent> {
        self.done = true;
        warn!("Pipeline ended without a terminal event");
        Some(AnalysisEvent::Error {
            message: "analysis pipeline ended unexpectedly".into(),
            step: None,
        })
    }

    /// Adapt into a `Stream` for response bodies.
    pub fn into_stream(self) -> impl Stream<Item = AnalysisEvent> + Send + 'static {
        futures::stream::unfold(self, |mut stream| async move {
            let event = stream.next_event().await?;
            Some((event, stream))
        })
    }

    /// Drain every event until the stream ends.
    pub async fn collect(mut self) -> Vec<AnalysisEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.next_event().await {
            events.push(event);
        }
        events
    }
}
