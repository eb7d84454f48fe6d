//! The worker contract and the participant wrapper around it
//!
//! A worker answers one prompt at a time, either as a single [`Message`] or as a
//! finite stream of text chunks closed by the message. [`Participant`] adds the
//! run-level identity (key and capability) and the one-call-at-a-time gate.

use async_trait::async_trait;
use ensemble_core::{Message, ParticipantInfo, WorkerError};
use futures::stream::BoxStream;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

pub type WorkerResult<T> = std::result::Result<T, WorkerError>;

/// Item of a streamed response
#[derive(Debug, Clone, PartialEq)]
pub enum StreamItem {
    Chunk(String),
    /// Final item; nothing follows it
    Done(Message),
}

/// Streamed response. Finite and not restartable.
pub type ResponseStream<'a> = BoxStream<'a, WorkerResult<StreamItem>>;

/// An opaque specialist capable of answering prompts
///
/// Implementations should return [`WorkerError::Cancelled`] promptly once
/// `cancel` fires. Callers race every call against the token anyway, so a
/// worker that ignores it is abandoned rather than waited for.
#[async_trait]
pub trait Worker: Send + Sync {
    async fn respond(&self, prompt: &str, cancel: &CancellationToken) -> WorkerResult<Message>;

    /// Streamed variant. The default yields the whole response as one chunk.
    fn respond_streaming<'a>(
        &'a self,
        prompt: &'a str,
        cancel: &'a CancellationToken,
    ) -> ResponseStream<'a> {
        Box::pin(async_stream::stream! {
            match self.respond(prompt, cancel).await {
                Ok(message) => {
                    if !message.text.is_empty() {
                        yield Ok(StreamItem::Chunk(message.text.clone()));
                    }
                    yield Ok(StreamItem::Done(message));
                }
                Err(e) => yield Err(e),
            }
        })
    }
}

/// What happens when a participant is called while another call is in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum CallPolicy {
    /// Wait for the in-flight call to finish
    #[default]
    Queue,
    /// Fail immediately with [`WorkerError::Busy`]
    Reject,
}

/// Held for the duration of one call
pub type CallGuard = OwnedMutexGuard<()>;

/// A worker registered under a unique key for a run
#[derive(Clone)]
pub struct Participant {
    info: ParticipantInfo,
    worker: Arc<dyn Worker>,
    gate: Arc<Mutex<()>>,
    call_policy: CallPolicy,
}

impl Participant {
    pub fn new(
        key: impl Into<String>,
        description: impl Into<String>,
        worker: Arc<dyn Worker>,
    ) -> Self {
        Self {
            info: ParticipantInfo::new(key, description),
            worker,
            gate: Arc::new(Mutex::new(())),
            call_policy: CallPolicy::default(),
        }
    }

    pub fn from_worker<W: Worker + 'static>(
        key: impl Into<String>,
        description: impl Into<String>,
        worker: W,
    ) -> Self {
        Self::new(key, description, Arc::new(worker))
    }

    pub fn with_call_policy(mut self, policy: CallPolicy) -> Self {
        self.call_policy = policy;
        self
    }

    pub fn key(&self) -> &str {
        &self.info.key
    }

    pub fn description(&self) -> &str {
        &self.info.description
    }

    pub fn info(&self) -> &ParticipantInfo {
        &self.info
    }

    pub fn worker(&self) -> &Arc<dyn Worker> {
        &self.worker
    }

    /// Claim the participant for one call
    ///
    /// Queued callers give up with `Cancelled` when the token fires.
    pub async fn acquire(&self, cancel: &CancellationToken) -> WorkerResult<CallGuard> {
        match self.call_policy {
            CallPolicy::Reject => self
                .gate
                .clone()
                .try_lock_owned()
                .map_err(|_| WorkerError::Busy),
            CallPolicy::Queue => {
                tokio::select! {
                    _ = cancel.cancelled() => Err(WorkerError::Cancelled),
                    guard = self.gate.clone().lock_owned() => Ok(guard),
                }
            }
        }
    }
}

impl std::fmt::Debug for Participant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Participant")
            .field("key", &self.info.key)
            .field("call_policy", &self.call_policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;

    struct Fixed(&'static str);

    #[async_trait]
    impl Worker for Fixed {
        async fn respond(
            &self,
            _prompt: &str,
            _cancel: &CancellationToken,
        ) -> WorkerResult<Message> {
            Ok(Message::new("fixed", self.0))
        }
    }

    #[tokio::test]
    async fn test_default_stream_is_one_chunk_then_done() {
        let worker = Fixed("hello team");
        let cancel = CancellationToken::new();
        let items: Vec<_> = worker.respond_streaming("hi", &cancel).collect().await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0], Ok(StreamItem::Chunk("hello team".into())));
        assert!(matches!(&items[1], Ok(StreamItem::Done(m)) if m.text == "hello team"));
    }

    #[tokio::test]
    async fn test_default_stream_skips_empty_chunk() {
        let worker = Fixed("");
        let cancel = CancellationToken::new();
        let items: Vec<_> = worker.respond_streaming("hi", &cancel).collect().await;
        assert_eq!(items.len(), 1);
        assert!(matches!(&items[0], Ok(StreamItem::Done(_))));
    }

    #[tokio::test]
    async fn test_reject_policy_reports_busy() {
        let participant = Participant::from_worker("qa", "tests", Fixed("ok"))
            .with_call_policy(CallPolicy::Reject);
        let cancel = CancellationToken::new();

        let _held = participant.acquire(&cancel).await.unwrap();
        let second = participant.acquire(&cancel).await;
        assert_eq!(second.err(), Some(WorkerError::Busy));
    }

    #[tokio::test]
    async fn test_queued_caller_gives_up_on_cancel() {
        let participant = Participant::from_worker("qa", "tests", Fixed("ok"));
        let cancel = CancellationToken::new();

        let _held = participant.acquire(&cancel).await.unwrap();
        cancel.cancel();
        let queued = participant.acquire(&cancel).await;
        assert_eq!(queued.err(), Some(WorkerError::Cancelled));
    }

    #[tokio::test]
    async fn test_queue_policy_waits_for_release() {
        let participant = Participant::from_worker("qa", "tests", Fixed("ok"));
        let cancel = CancellationToken::new();

        let held = participant.acquire(&cancel).await.unwrap();
        drop(held);
        assert!(participant.acquire(&cancel).await.is_ok());
    }
}
