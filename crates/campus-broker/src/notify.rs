//! ---
//! campus_section: "01-core-functionality"
//! campus_subsection: "module"
//! campus_type: "source"
//! campus_scope: "code"
//! campus_description: "Request routing and worker dispatch."
//! campus_version: "v0.1.0"
//! campus_owner: "platform"
//! ---
use campus_msg::AllocationRequest;
use tokio::sync::broadcast;
use tracing::warn;

const DEFAULT_CAPACITY: usize = 256;

/// Topic a program's notices are published on.
pub fn topic_for(program: &str) -> String {
    format!("program/{program}")
}

/// One processed request, as seen by program subscribers.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramNotice {
    pub topic: String,
    pub request_id: String,
    pub request: AllocationRequest,
}

/// Fan-out of processed requests. Publishing never blocks and never fails the
/// request, whether or not anyone listens.
#[derive(Debug, Clone)]
pub struct ProgramNotifier {
    sender: broadcast::Sender<ProgramNotice>,
}

impl Default for ProgramNotifier {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl ProgramNotifier {
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, request_id: &str, request: &AllocationRequest) {
        let notice = ProgramNotice {
            topic: topic_for(&request.program),
            request_id: request_id.to_owned(),
            request: request.clone(),
        };
        // No receivers is the normal case when no program client is attached.
        let _ = self.sender.send(notice);
    }

    /// Notices for one program only.
    pub fn subscribe(&self, program: &str) -> ProgramSubscription {
        ProgramSubscription {
            topic: topic_for(program),
            receiver: self.sender.subscribe(),
        }
    }
}

/// Receiver filtered to a single topic.
#[derive(Debug)]
pub struct ProgramSubscription {
    topic: String,
    receiver: broadcast::Receiver<ProgramNotice>,
}

impl ProgramSubscription {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next notice on this topic, or `None` once the notifier is gone.
    /// Notices lost to lag are logged and skipped.
    pub async fn next(&mut self) -> Option<ProgramNotice> {
        loop {
            match self.receiver.recv().await {
                Ok(notice) if notice.topic == self.topic => return Some(notice),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(topic = %self.topic, missed, "program subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use campus_msg::ResourceCounts;

    #[tokio::test]
    async fn subscribers_only_see_their_program() {
        let notifier = ProgramNotifier::default();
        let mut biology = notifier.subscribe("biology");

        let other = AllocationRequest::new("science", "physics", ResourceCounts::new(1, 0, 0));
        let mine = AllocationRequest::new("science", "biology", ResourceCounts::new(0, 1, 0));
        notifier.publish("r-1", &other);
        notifier.publish("r-2", &mine);

        let notice = biology.next().await.unwrap();
        assert_eq!(notice.topic, "program/biology");
        assert_eq!(notice.request_id, "r-2");
        assert_eq!(notice.request, mine);
    }

    #[tokio::test]
    async fn publishing_without_subscribers_is_harmless() {
        let notifier = ProgramNotifier::with_capacity(1);
        let request = AllocationRequest::new("a", "b", ResourceCounts::default());
        for id in ["1", "2", "3"] {
            notifier.publish(id, &request);
        }
        let subscription = notifier.subscribe("b");
        drop(notifier);
        let mut subscription = subscription;
        assert!(subscription.next().await.is_none());
    }
}
