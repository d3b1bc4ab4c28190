//! Stream relay.
//!
//! A producer task drives a backend stream and pushes events onto a bounded
//! channel; the consumer iterates the [`StreamHandle`]. The consumer always
//! sees an optional single `start`, zero or more `content` events, then exactly
//! one terminal `stop` or `error`. The relay does not know about wire
//! encodings.

use bridge_core::{
    BackendAdapter, BridgeError, CanonicalRequest, ErrorKind, EventStream, RequestId, StreamEvent,
    StreamEventKind, TokenUsage,
};
use futures::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, warn};

/// Default channel capacity between producer and consumer
pub const RELAY_CAPACITY: usize = 64;

/// Relay tuning
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayOptions {
    /// Bounded channel capacity
    pub capacity: usize,
    /// Overall deadline for the stream, measured from relay start
    pub deadline: Option<Duration>,
}

impl Default for RelayOptions {
    fn default() -> Self {
        Self {
            capacity: RELAY_CAPACITY,
            deadline: None,
        }
    }
}

impl RelayOptions {
    /// Set the overall deadline
    #[must_use]
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// How a relayed stream ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelaySummary {
    /// Terminal event delivered, or `None` if the consumer went away first
    pub terminal: Option<StreamEventKind>,
    /// Content events forwarded
    pub chunks: usize,
    /// Usage reported with the `stop` event
    pub usage: Option<TokenUsage>,
    /// Kind of the error that ended the stream
    pub error_kind: Option<ErrorKind>,
    /// Time from relay start to the end of forwarding
    pub elapsed: Duration,
}

impl RelaySummary {
    /// Whether the stream ended with `stop`
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.terminal == Some(StreamEventKind::Stop)
    }

    /// Whether the consumer dropped the stream before its end
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.terminal.is_none()
    }
}

/// Consumer side of a relayed stream
#[derive(Debug)]
pub struct StreamHandle {
    request_id: RequestId,
    events: ReceiverStream<StreamEvent>,
}

impl StreamHandle {
    fn new(request_id: RequestId, rx: mpsc::Receiver<StreamEvent>) -> Self {
        Self {
            request_id,
            events: ReceiverStream::new(rx),
        }
    }

    /// Correlation id of the streamed call
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }
}

impl Stream for StreamHandle {
    type Item = StreamEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

#[derive(Debug, Clone, Copy)]
struct Deadline {
    at: Instant,
    limit: Duration,
}

/// Open a stream on `adapter` and relay it.
///
/// A failure to open becomes a single `error` event. `on_finish` runs on the
/// producer task once forwarding ends.
pub fn relay<F>(
    adapter: Arc<dyn BackendAdapter>,
    request: CanonicalRequest,
    options: RelayOptions,
    on_finish: F,
) -> StreamHandle
where
    F: FnOnce(RelaySummary) + Send + 'static,
{
    let request_id = request.id().clone();
    let (tx, rx) = mpsc::channel(options.capacity.max(1));

    tokio::spawn(async move {
        let started = Instant::now();
        let deadline = options
            .deadline
            .map(|limit| Deadline { at: started + limit, limit });

        let opened = match deadline {
            Some(d) => tokio::time::timeout_at(d.at, adapter.execute_stream(&request))
                .await
                .unwrap_or_else(|_| Err(BridgeError::timeout(d.limit))),
            None => adapter.execute_stream(&request).await,
        };
        let events: EventStream = match opened {
            Ok(events) => events,
            Err(error) => Box::pin(futures::stream::once(async move {
                Err::<StreamEvent, BridgeError>(error)
            })),
        };

        on_finish(forward(events, &tx, deadline, started).await);
    });

    StreamHandle::new(request_id, rx)
}

/// Relay an already opened stream
pub fn relay_events<F>(
    events: EventStream,
    request_id: RequestId,
    options: RelayOptions,
    on_finish: F,
) -> StreamHandle
where
    F: FnOnce(RelaySummary) + Send + 'static,
{
    let (tx, rx) = mpsc::channel(options.capacity.max(1));

    tokio::spawn(async move {
        let started = Instant::now();
        let deadline = options
            .deadline
            .map(|limit| Deadline { at: started + limit, limit });
        on_finish(forward(events, &tx, deadline, started).await);
    });

    StreamHandle::new(request_id, rx)
}

async fn forward(
    mut events: EventStream,
    tx: &mpsc::Sender<StreamEvent>,
    deadline: Option<Deadline>,
    started: Instant,
) -> RelaySummary {
    let mut summary = RelaySummary {
        terminal: None,
        chunks: 0,
        usage: None,
        error_kind: None,
        elapsed: Duration::ZERO,
    };
    let mut opened = false;
    let expiry = tokio::time::sleep_until(deadline.map_or(started, |d| d.at));
    tokio::pin!(expiry);

    loop {
        let next = tokio::select! {
            biased;
            () = tx.closed() => {
                debug!("Stream consumer dropped, cancelling producer");
                break;
            }
            () = &mut expiry, if deadline.is_some() => {
                Some(Err(BridgeError::timeout(deadline.map_or(Duration::ZERO, |d| d.limit))))
            }
            item = events.next() => item,
        };

        let event = match next {
            None => StreamEvent::stop(None),
            Some(Ok(event)) => event,
            Some(Err(error)) => {
                warn!(error = %error, "Stream failed");
                summary.error_kind = Some(error.kind());
                StreamEvent::error(error.to_string())
            }
        };

        match event.kind {
            StreamEventKind::Start if opened => continue,
            StreamEventKind::Content if event.text.is_empty() => continue,
            StreamEventKind::Content => summary.chunks += 1,
            StreamEventKind::Stop => summary.usage = event.usage,
            StreamEventKind::Error if summary.error_kind.is_none() => {
                summary.error_kind = Some(ErrorKind::TransientUpstream);
            }
            _ => {}
        }
        opened = true;

        let kind = event.kind;
        if tx.send(event).await.is_err() {
            debug!("Stream consumer dropped, cancelling producer");
            break;
        }
        if kind.is_terminal() {
            summary.terminal = Some(kind);
            break;
        }
    }

    summary.elapsed = started.elapsed();
    summary
}
