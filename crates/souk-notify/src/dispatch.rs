//! Channel selection and delivery for a single notification.
//!
//! A user may have several registered endpoints across devices; exactly one
//! successful delivery is made per call so the user never sees the same
//! pop-up on three screens. Dead endpoints are pruned as providers report
//! them.

use std::sync::Arc;

use tracing::{debug, error, warn};

use souk_db::Database;
use souk_db::models::PushTargetRow;

use crate::providers::{DirectPushProvider, PushNote, PushOutcome, SubscriptionPushProvider};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Channel {
    DirectPush,
    SubscriptionPush,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryResult {
    pub sent: bool,
    pub channel: Channel,
}

#[derive(Clone)]
pub struct Notifier {
    inner: Arc<NotifierInner>,
}

struct NotifierInner {
    db: Arc<Database>,
    direct: Arc<dyn DirectPushProvider>,
    subscription: Arc<dyn SubscriptionPushProvider>,
}

impl Notifier {
    pub fn new(
        db: Arc<Database>,
        direct: Arc<dyn DirectPushProvider>,
        subscription: Arc<dyn SubscriptionPushProvider>,
    ) -> Self {
        Self {
            inner: Arc::new(NotifierInner {
                db,
                direct,
                subscription,
            }),
        }
    }

    /// Deliver at most one notification to `user_id`, preferring the
    /// direct-token channel of each target and falling back to its browser
    /// subscription. Stops at the first success. Permanently invalid
    /// endpoints are deleted before moving on; transient provider errors are
    /// logged and skipped. Never fails the caller: an undeliverable
    /// notification is reported as `sent: false`.
    pub async fn notify(&self, user_id: i64, title: &str, body: &str, url: &str) -> DeliveryResult {
        let note = PushNote {
            title: title.to_string(),
            body: body.to_string(),
            url: url.to_string(),
        };

        let targets = self.load_targets(user_id).await;
        if targets.is_empty() {
            warn!("No push targets registered for user {}", user_id);
            return DeliveryResult {
                sent: false,
                channel: Channel::None,
            };
        }

        for target in targets {
            if let Some(token) = target.token.as_deref() {
                match self.inner.direct.send(token, &note).await {
                    PushOutcome::Delivered => {
                        debug!("Direct push delivered to user {}", user_id);
                        return DeliveryResult {
                            sent: true,
                            channel: Channel::DirectPush,
                        };
                    }
                    PushOutcome::PermanentlyInvalid => {
                        warn!(
                            "Direct push token expired for user {}, dropping target {}",
                            user_id, target.id
                        );
                        self.drop_target(target.id).await;
                        continue;
                    }
                    PushOutcome::Transient(reason) => {
                        warn!("Direct push to user {} failed: {}", user_id, reason);
                    }
                }
            }

            if let Some(subscription) = target.subscription.as_deref() {
                match self.inner.subscription.send(subscription, &note).await {
                    PushOutcome::Delivered => {
                        debug!("Subscription push delivered to user {}", user_id);
                        return DeliveryResult {
                            sent: true,
                            channel: Channel::SubscriptionPush,
                        };
                    }
                    PushOutcome::PermanentlyInvalid => {
                        warn!(
                            "Push subscription gone for user {}, dropping target {}",
                            user_id, target.id
                        );
                        self.drop_target(target.id).await;
                    }
                    PushOutcome::Transient(reason) => {
                        warn!("Subscription push to user {} failed: {}", user_id, reason);
                    }
                }
            }
        }

        DeliveryResult {
            sent: false,
            channel: Channel::None,
        }
    }

    async fn load_targets(&self, user_id: i64) -> Vec<PushTargetRow> {
        let db = self.inner.db.clone();
        let loaded =
            tokio::task::spawn_blocking(move || db.push_targets_for(user_id)).await;

        match loaded {
            Ok(Ok(targets)) => targets,
            Ok(Err(e)) => {
                error!("Loading push targets for user {} failed: {}", user_id, e);
                vec![]
            }
            Err(e) => {
                error!("spawn_blocking join error: {}", e);
                vec![]
            }
        }
    }

    /// Deleting an already-deleted target is fine; concurrent notify calls
    /// for the same user may both see the same dead endpoint.
    async fn drop_target(&self, target_id: i64) {
        let db = self.inner.db.clone();
        let deleted =
            tokio::task::spawn_blocking(move || db.delete_push_target(target_id)).await;

        match deleted {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!("Deleting push target {} failed: {}", target_id, e),
            Err(e) => error!("spawn_blocking join error: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::future::BoxFuture;

    use super::*;

    #[derive(Default)]
    struct ScriptedPush {
        outcomes: Mutex<VecDeque<PushOutcome>>,
        calls: AtomicUsize,
    }

    impl ScriptedPush {
        fn scripted(outcomes: Vec<PushOutcome>) -> Arc<Self> {
            Arc::new(Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn next_outcome(&self) -> PushOutcome {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(PushOutcome::Transient("exhausted script".into()))
        }
    }

    impl DirectPushProvider for ScriptedPush {
        fn send<'a>(&'a self, _token: &'a str, _note: &'a PushNote) -> BoxFuture<'a, PushOutcome> {
            Box::pin(async move { self.next_outcome() })
        }
    }

    impl SubscriptionPushProvider for ScriptedPush {
        fn send<'a>(
            &'a self,
            _subscription: &'a str,
            _note: &'a PushNote,
        ) -> BoxFuture<'a, PushOutcome> {
            Box::pin(async move { self.next_outcome() })
        }
    }

    fn notifier(
        db: Arc<Database>,
        direct: Arc<ScriptedPush>,
        subscription: Arc<ScriptedPush>,
    ) -> Notifier {
        Notifier::new(db, direct, subscription)
    }

    #[tokio::test]
    async fn no_targets_means_nothing_sent() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let direct = ScriptedPush::scripted(vec![]);
        let subscription = ScriptedPush::scripted(vec![]);
        let n = notifier(db, direct.clone(), subscription.clone());

        let result = n.notify(7, "New Message", "hi", "https://app/chat/3").await;

        assert_eq!(
            result,
            DeliveryResult {
                sent: false,
                channel: Channel::None
            }
        );
        assert_eq!(direct.calls(), 0);
        assert_eq!(subscription.calls(), 0);
    }

    #[tokio::test]
    async fn stops_at_first_success() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.add_push_target(7, Some("tok-phone"), None).unwrap();
        db.add_push_target(7, Some("tok-laptop"), None).unwrap();

        let direct = ScriptedPush::scripted(vec![PushOutcome::Delivered]);
        let subscription = ScriptedPush::scripted(vec![]);
        let n = notifier(db, direct.clone(), subscription.clone());

        let result = n.notify(7, "New Message", "hi", "https://app/chat/3").await;

        assert!(result.sent);
        assert_eq!(result.channel, Channel::DirectPush);
        // Second device never contacted
        assert_eq!(direct.calls(), 1);
        assert_eq!(subscription.calls(), 0);
    }

    #[tokio::test]
    async fn falls_back_to_subscription_on_transient_error() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.add_push_target(7, Some("tok"), None).unwrap();
        db.add_push_target(7, None, Some("{\"endpoint\":\"x\"}")).unwrap();

        let direct = ScriptedPush::scripted(vec![PushOutcome::Transient("503".into())]);
        let subscription = ScriptedPush::scripted(vec![PushOutcome::Delivered]);
        let n = notifier(db.clone(), direct.clone(), subscription.clone());

        let result = n.notify(7, "New Message", "hi", "https://app/chat/3").await;

        assert!(result.sent);
        assert_eq!(result.channel, Channel::SubscriptionPush);
        // Transient failure must not delete the target
        assert_eq!(db.push_targets_for(7).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn expired_target_is_deleted_and_next_tried() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.add_push_target(7, Some("tok-dead"), None).unwrap();
        db.add_push_target(7, Some("tok-live"), None).unwrap();

        let direct = ScriptedPush::scripted(vec![
            PushOutcome::PermanentlyInvalid,
            PushOutcome::Delivered,
        ]);
        let subscription = ScriptedPush::scripted(vec![]);
        let n = notifier(db.clone(), direct.clone(), subscription.clone());

        let result = n.notify(7, "New Message", "hi", "https://app/chat/3").await;

        assert!(result.sent);
        let remaining = db.push_targets_for(7).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].token.as_deref(), Some("tok-live"));
    }

    #[tokio::test]
    async fn all_candidates_failing_is_not_an_error() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.add_push_target(7, Some("tok"), None).unwrap();

        let direct = ScriptedPush::scripted(vec![PushOutcome::Transient("timeout".into())]);
        let subscription = ScriptedPush::scripted(vec![]);
        let n = notifier(db.clone(), direct.clone(), subscription.clone());

        let result = n.notify(7, "New Message", "hi", "https://app/chat/3").await;

        assert!(!result.sent);
        assert_eq!(result.channel, Channel::None);
        // Target survives a transient failure
        assert_eq!(db.push_targets_for(7).unwrap().len(), 1);
    }
}
