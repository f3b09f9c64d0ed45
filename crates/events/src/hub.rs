//! In-process progress hub backed by a `tokio::sync::broadcast` channel.
//!
//! [`ProgressHub`] is cheap to clone and shared across the worker and the
//! API. Publishing goes through scoped [`Publisher`] handles so the hub can
//! account for every live producer; a publisher releases itself when it is
//! dropped, on every exit path of the task that owns it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use storyreel_core::stage::StageType;
use storyreel_core::types::DbId;
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use crate::channel::ChannelKey;
use crate::message::{MessageKind, ProgressMessage};

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

struct HubInner {
    sender: broadcast::Sender<ProgressMessage>,
    active_publishers: AtomicUsize,
}

// ---------------------------------------------------------------------------
// ProgressHub
// ---------------------------------------------------------------------------

/// Fan-out hub for [`ProgressMessage`]s of every project.
///
/// Subscribers filter by [`ChannelKey`]. When the buffer is full, the
/// oldest un-consumed messages are dropped and slow subscribers skip ahead.
#[derive(Clone)]
pub struct ProgressHub {
    inner: Arc<HubInner>,
}

impl ProgressHub {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(HubInner {
                sender,
                active_publishers: AtomicUsize::new(0),
            }),
        }
    }

    /// Publish a message to all current subscribers.
    ///
    /// If there are no active subscribers the message is silently dropped.
    pub fn publish(&self, msg: ProgressMessage) {
        // Ignore the SendError -- it only means there are zero receivers.
        let _ = self.inner.sender.send(msg);
    }

    pub fn subscribe(&self, key: ChannelKey) -> Subscription {
        Subscription {
            key,
            receiver: self.inner.sender.subscribe(),
            finished: false,
        }
    }

    /// Subscribe to one stage of a project.
    pub fn subscribe_stage(&self, project_id: DbId, stage: StageType) -> Subscription {
        self.subscribe(ChannelKey::stage(project_id, stage))
    }

    /// Subscribe to every stage of a project (wildcard).
    pub fn subscribe_project(&self, project_id: DbId) -> Subscription {
        self.subscribe(ChannelKey::project(project_id))
    }

    /// Open a publishing handle scoped to one stage, or to the whole
    /// pipeline when `stage` is `None`.
    pub fn publisher(&self, project_id: DbId, stage: Option<StageType>) -> Publisher {
        self.inner.active_publishers.fetch_add(1, Ordering::SeqCst);
        tracing::debug!(project_id, stage = ?stage, "Progress publisher opened");
        Publisher {
            inner: Arc::clone(&self.inner),
            project_id,
            stage,
        }
    }

    /// Number of publishers not yet released.
    pub fn active_publishers(&self) -> usize {
        self.inner.active_publishers.load(Ordering::SeqCst)
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

/// Scoped publishing handle. Released on drop.
pub struct Publisher {
    inner: Arc<HubInner>,
    project_id: DbId,
    stage: Option<StageType>,
}

impl Publisher {
    /// Publish on this publisher's own scope.
    pub fn send(&self, kind: MessageKind) {
        let msg = match self.stage {
            Some(stage) => ProgressMessage::for_stage(self.project_id, stage, kind),
            None => ProgressMessage::for_pipeline(self.project_id, kind),
        };
        let _ = self.inner.sender.send(msg);
    }

    /// Publish a message attributed to a specific stage of the project.
    pub fn send_for_stage(&self, stage: StageType, kind: MessageKind) {
        let _ = self
            .inner
            .sender
            .send(ProgressMessage::for_stage(self.project_id, stage, kind));
    }

    pub fn project_id(&self) -> DbId {
        self.project_id
    }

    pub fn stage(&self) -> Option<StageType> {
        self.stage
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.inner.active_publishers.fetch_sub(1, Ordering::SeqCst);
        tracing::debug!(
            project_id = self.project_id,
            stage = ?self.stage,
            "Progress publisher released"
        );
    }
}

// ---------------------------------------------------------------------------
// Subscription
// ---------------------------------------------------------------------------

/// A receiver filtered to one channel that applies its termination rule.
pub struct Subscription {
    key: ChannelKey,
    receiver: broadcast::Receiver<ProgressMessage>,
    finished: bool,
}

impl Subscription {
    pub fn key(&self) -> ChannelKey {
        self.key
    }

    /// Whether the terminal message has been delivered or the hub closed.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Wait for the next message on this channel.
    ///
    /// Returns the terminal message itself, then `None` forever after. A
    /// lagged subscriber logs the number of skipped messages and keeps
    /// listening.
    pub async fn next(&mut self) -> Option<ProgressMessage> {
        if self.finished {
            return None;
        }
        loop {
            match self.receiver.recv().await {
                Ok(msg) => {
                    if !self.key.matches(&msg) {
                        continue;
                    }
                    if self.key.is_terminal(&msg) {
                        self.finished = true;
                    }
                    return Some(msg);
                }
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(
                        channel = %self.key,
                        skipped,
                        "Progress subscriber lagged, skipped messages"
                    );
                }
                Err(RecvError::Closed) => {
                    self.finished = true;
                    return None;
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn stage_done() -> MessageKind {
        MessageKind::Done {
            full_text: Some("text".into()),
            metadata: None,
        }
    }

    fn stage_error() -> MessageKind {
        MessageKind::Error {
            error: "boom".into(),
            retry_count: 1,
        }
    }

    #[tokio::test]
    async fn stage_subscription_ends_after_done() {
        let hub = ProgressHub::default();
        let mut sub = hub.subscribe_stage(1, StageType::Rewrite);
        let publisher = hub.publisher(1, Some(StageType::Rewrite));

        publisher.send(MessageKind::Token {
            content: "a".into(),
            full_text: "a".into(),
        });
        publisher.send(stage_done());
        publisher.send(MessageKind::Info {
            message: "after".into(),
        });

        assert_eq!(sub.next().await.unwrap().kind.type_name(), "token");
        assert_eq!(sub.next().await.unwrap().kind.type_name(), "done");
        assert!(sub.is_finished());
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn stage_subscription_ends_after_error() {
        let hub = ProgressHub::default();
        let mut sub = hub.subscribe_stage(1, StageType::Storyboard);
        hub.publisher(1, Some(StageType::Storyboard)).send(stage_error());

        let msg = sub.next().await.unwrap();
        assert_eq!(
            msg.kind,
            MessageKind::Error {
                error: "boom".into(),
                retry_count: 1
            }
        );
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn wildcard_survives_ten_stage_terminals() {
        let hub = ProgressHub::default();
        let mut sub = hub.subscribe_project(3);
        let stages = [StageType::Rewrite, StageType::Storyboard];

        for i in 0..10 {
            let publisher = hub.publisher(3, Some(stages[i % 2]));
            if i % 3 == 0 {
                publisher.send(stage_error());
            } else {
                publisher.send(stage_done());
            }
        }
        hub.publisher(3, None).send(MessageKind::PipelineDone {
            metadata: json!({"total_stages": 5}),
        });

        for _ in 0..10 {
            let msg = sub.next().await.unwrap();
            assert!(msg.kind.is_stage_terminal());
            assert!(!sub.is_finished());
        }
        let last = sub.next().await.unwrap();
        assert_eq!(last.kind.type_name(), "pipeline_done");
        assert!(sub.is_finished());
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn wildcard_ends_on_pipeline_error() {
        let hub = ProgressHub::default();
        let mut sub = hub.subscribe_project(3);
        hub.publisher(3, None).send(MessageKind::PipelineError {
            error: "stage failed".into(),
            failed_stage: Some("rewrite".into()),
        });
        assert_eq!(sub.next().await.unwrap().kind.type_name(), "pipeline_error");
        assert!(sub.next().await.is_none());
    }

    #[tokio::test]
    async fn other_projects_are_filtered_out() {
        let hub = ProgressHub::default();
        let mut sub = hub.subscribe_project(1);
        hub.publisher(2, Some(StageType::Rewrite)).send(stage_done());
        hub.publisher(1, None).send(MessageKind::PipelineDone { metadata: json!({}) });

        let msg = sub.next().await.unwrap();
        assert_eq!(msg.project_id, 1);
        assert_eq!(msg.kind.type_name(), "pipeline_done");
    }

    #[tokio::test]
    async fn publisher_release_is_counted() {
        let hub = ProgressHub::default();
        assert_eq!(hub.active_publishers(), 0);
        {
            let _a = hub.publisher(1, None);
            let _b = hub.publisher(1, Some(StageType::Rewrite));
            assert_eq!(hub.active_publishers(), 2);
        }
        assert_eq!(hub.active_publishers(), 0);
    }

    #[tokio::test]
    async fn lagged_subscriber_keeps_listening() {
        let hub = ProgressHub::new(4);
        let mut sub = hub.subscribe_project(1);
        let publisher = hub.publisher(1, Some(StageType::Rewrite));
        for i in 0..10 {
            publisher.send(MessageKind::Info {
                message: format!("m{i}"),
            });
        }
        hub.publish(ProgressMessage::for_pipeline(
            1,
            MessageKind::PipelineDone { metadata: json!({}) },
        ));

        let mut last = None;
        while let Some(msg) = sub.next().await {
            last = Some(msg);
        }
        assert_eq!(last.unwrap().kind.type_name(), "pipeline_done");
    }

    #[tokio::test]
    async fn closed_hub_ends_subscription() {
        let hub = ProgressHub::default();
        let mut sub = hub.subscribe_stage(1, StageType::Rewrite);
        drop(hub);
        assert!(sub.next().await.is_none());
        assert!(sub.is_finished());
    }

    #[test]
    fn publish_with_no_subscribers_does_not_panic() {
        let hub = ProgressHub::default();
        hub.publisher(1, None).send(MessageKind::Info {
            message: "orphan".into(),
        });
    }
}
