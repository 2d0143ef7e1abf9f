//! Timed reminder pipeline for unread messages.
//!
//! Every stored message starts a deferred timeline for its receiver:
//! after `push_delay` the read flag is re-read and, if still unread, a push
//! goes out; after a further `email_delay` the flag is re-read again and an
//! email follows. Each check reads the ledger fresh, so marking the message
//! read at any point makes the remaining steps observe it and stand down;
//! no cancellation signal is needed.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use souk_db::Database;
use souk_db::models::MessageRow;

use crate::dispatch::Notifier;
use crate::providers::{EmailSender, UserDirectory};

const EMAIL_ATTEMPTS: u32 = 3;

const PUSH_REMINDER_TITLE: &str = "You have an unread message";
const EMAIL_REMINDER_SUBJECT: &str = "You Have an Unread Message";

/// Where a reminder timeline ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EscalationOutcome {
    /// Read before the first check; nothing was sent.
    Read,
    /// Push went out, then the message was read before the email check.
    PushEscalated,
    /// Both reminder steps fired.
    EmailEscalated,
    /// The message vanished from the ledger before a check.
    Expired,
}

#[derive(Clone)]
pub struct EscalationConfig {
    /// Delay before the push reminder check (T1).
    pub push_delay: Duration,
    /// Further delay before the email check, measured from the push check (T2).
    pub email_delay: Duration,
    /// Fixed backoff between email attempts.
    pub email_retry_backoff: Duration,
    /// Base URL the reminder links into, e.g. "https://souk.example".
    pub app_base_url: String,
}

impl Default for EscalationConfig {
    fn default() -> Self {
        Self {
            push_delay: Duration::from_secs(300),
            email_delay: Duration::from_secs(300),
            email_retry_backoff: Duration::from_secs(2),
            app_base_url: "http://localhost:3000".to_string(),
        }
    }
}

#[derive(Clone)]
pub struct Escalator {
    inner: Arc<EscalatorInner>,
}

struct EscalatorInner {
    db: Arc<Database>,
    notifier: Notifier,
    email: Arc<dyn EmailSender>,
    directory: Arc<dyn UserDirectory>,
    config: EscalationConfig,
}

impl Escalator {
    pub fn new(
        db: Arc<Database>,
        notifier: Notifier,
        email: Arc<dyn EmailSender>,
        directory: Arc<dyn UserDirectory>,
        config: EscalationConfig,
    ) -> Self {
        Self {
            inner: Arc::new(EscalatorInner {
                db,
                notifier,
                email,
                directory,
                config,
            }),
        }
    }

    /// Start the reminder timeline for a freshly stored message. The task
    /// outlives the connection that received the message; disconnects never
    /// cancel it. The returned handle is for tests and diagnostics; callers
    /// are free to drop it.
    pub fn schedule(&self, message: &MessageRow) -> JoinHandle<EscalationOutcome> {
        let inner = self.inner.clone();
        let message_id = message.id;
        let sender_id = message.sender_id;
        let receiver_id = message.receiver_id;
        let content = message.content.clone();

        tokio::spawn(async move {
            tokio::time::sleep(inner.config.push_delay).await;

            match read_state(&inner.db, message_id).await {
                ReadState::Read => {
                    debug!("Message {} read before push reminder, standing down", message_id);
                    return EscalationOutcome::Read;
                }
                ReadState::Missing => return EscalationOutcome::Expired,
                ReadState::Unread => {}
            }

            let url = format!("{}/chat/{}", inner.config.app_base_url, sender_id);
            let result = inner
                .notifier
                .notify(receiver_id, PUSH_REMINDER_TITLE, &content, &url)
                .await;
            if !result.sent {
                // Not fatal; the email step still runs on its own clock.
                warn!("Push reminder for message {} undelivered", message_id);
            }

            tokio::time::sleep(inner.config.email_delay).await;

            match read_state(&inner.db, message_id).await {
                ReadState::Read => {
                    debug!("Message {} read before email reminder, standing down", message_id);
                    return EscalationOutcome::PushEscalated;
                }
                ReadState::Missing => return EscalationOutcome::Expired,
                ReadState::Unread => {}
            }

            send_reminder_email(&inner, message_id, receiver_id, &content).await;
            EscalationOutcome::EmailEscalated
        })
    }
}

enum ReadState {
    Read,
    Unread,
    Missing,
}

/// Fresh probe of the ledger. A storage failure is treated as unread: the
/// reminder goes out on best-effort state rather than being dropped.
async fn read_state(db: &Arc<Database>, message_id: i64) -> ReadState {
    let db = db.clone();
    let probed = tokio::task::spawn_blocking(move || db.message_read(message_id)).await;

    match probed {
        Ok(Ok(Some(true))) => ReadState::Read,
        Ok(Ok(Some(false))) => ReadState::Unread,
        Ok(Ok(None)) => ReadState::Missing,
        Ok(Err(e)) => {
            warn!("Read-state probe for message {} failed: {}", message_id, e);
            ReadState::Unread
        }
        Err(e) => {
            warn!("spawn_blocking join error: {}", e);
            ReadState::Unread
        }
    }
}

async fn send_reminder_email(
    inner: &EscalatorInner,
    message_id: i64,
    receiver_id: i64,
    content: &str,
) {
    let Some(address) = inner.directory.email_of(receiver_id).await else {
        warn!(
            "No email address for user {}, skipping email reminder for message {}",
            receiver_id, message_id
        );
        return;
    };

    for attempt in 1..=EMAIL_ATTEMPTS {
        match inner.email.send(&address, EMAIL_REMINDER_SUBJECT, content).await {
            Ok(()) => {
                info!("Email reminder for message {} sent to user {}", message_id, receiver_id);
                return;
            }
            Err(e) => {
                warn!(
                    "Email reminder for message {} failed (attempt {} of {}): {}",
                    message_id, attempt, EMAIL_ATTEMPTS, e
                );
                if attempt < EMAIL_ATTEMPTS {
                    tokio::time::sleep(inner.config.email_retry_backoff).await;
                }
            }
        }
    }
    // All attempts exhausted; give up silently.
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::future::BoxFuture;

    use crate::providers::{DirectPushProvider, PushNote, PushOutcome, SubscriptionPushProvider};

    use super::*;

    struct CountingPush {
        calls: AtomicUsize,
    }

    impl CountingPush {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl DirectPushProvider for CountingPush {
        fn send<'a>(&'a self, _token: &'a str, _note: &'a PushNote) -> BoxFuture<'a, PushOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { PushOutcome::Delivered })
        }
    }

    impl SubscriptionPushProvider for CountingPush {
        fn send<'a>(
            &'a self,
            _subscription: &'a str,
            _note: &'a PushNote,
        ) -> BoxFuture<'a, PushOutcome> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { PushOutcome::Delivered })
        }
    }

    struct RecordingEmail {
        failures_left: Mutex<u32>,
        attempts: AtomicUsize,
        sent: AtomicUsize,
    }

    impl RecordingEmail {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures_left: Mutex::new(failures),
                attempts: AtomicUsize::new(0),
                sent: AtomicUsize::new(0),
            })
        }
    }

    impl EmailSender for RecordingEmail {
        fn send<'a>(
            &'a self,
            _address: &'a str,
            _subject: &'a str,
            _body: &'a str,
        ) -> BoxFuture<'a, anyhow::Result<()>> {
            Box::pin(async move {
                self.attempts.fetch_add(1, Ordering::SeqCst);
                let mut failures = self.failures_left.lock().unwrap();
                if *failures > 0 {
                    *failures -= 1;
                    anyhow::bail!("smtp relay unavailable")
                }
                self.sent.fetch_add(1, Ordering::SeqCst);
                Ok(())
            })
        }
    }

    struct StaticDirectory;

    impl UserDirectory for StaticDirectory {
        fn email_of(&self, user_id: i64) -> BoxFuture<'_, Option<String>> {
            Box::pin(async move { Some(format!("user{}@example.com", user_id)) })
        }
    }

    struct Fixture {
        db: Arc<Database>,
        push: Arc<CountingPush>,
        email: Arc<RecordingEmail>,
        escalator: Escalator,
    }

    fn fixture(email_failures: u32) -> Fixture {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.add_push_target(7, Some("tok"), None).unwrap();

        let push = CountingPush::new();
        let email = RecordingEmail::new(email_failures);
        let notifier = Notifier::new(db.clone(), push.clone(), push.clone());

        let config = EscalationConfig {
            push_delay: Duration::from_millis(40),
            email_delay: Duration::from_millis(40),
            email_retry_backoff: Duration::from_millis(5),
            app_base_url: "https://souk.test".to_string(),
        };

        let escalator = Escalator::new(
            db.clone(),
            notifier,
            email.clone(),
            Arc::new(StaticDirectory),
            config,
        );

        Fixture {
            db,
            push,
            email,
            escalator,
        }
    }

    #[tokio::test]
    async fn read_before_first_check_sends_nothing() {
        let f = fixture(0);
        let msg = f.db.append_message(3, 7, "hi").unwrap();

        let handle = f.escalator.schedule(&msg);
        f.db.mark_read(&[msg.id]).unwrap();

        assert_eq!(handle.await.unwrap(), EscalationOutcome::Read);
        assert_eq!(f.push.calls(), 0);
        assert_eq!(f.email.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn read_between_checks_sends_exactly_one_push() {
        let f = fixture(0);
        let msg = f.db.append_message(3, 7, "hi").unwrap();

        let handle = f.escalator.schedule(&msg);

        // Wait for the push step to fire, then read the message before the
        // email check comes around.
        while f.push.calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        f.db.mark_read(&[msg.id]).unwrap();

        assert_eq!(handle.await.unwrap(), EscalationOutcome::PushEscalated);
        assert_eq!(f.push.calls(), 1);
        assert_eq!(f.email.attempts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn unread_past_both_checks_escalates_to_email() {
        let f = fixture(0);
        let msg = f.db.append_message(3, 7, "hi").unwrap();

        let handle = f.escalator.schedule(&msg);

        assert_eq!(handle.await.unwrap(), EscalationOutcome::EmailEscalated);
        assert_eq!(f.push.calls(), 1);
        assert_eq!(f.email.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn email_delivery_is_retried_with_backoff() {
        let f = fixture(2);
        let msg = f.db.append_message(3, 7, "hi").unwrap();

        let handle = f.escalator.schedule(&msg);

        assert_eq!(handle.await.unwrap(), EscalationOutcome::EmailEscalated);
        assert_eq!(f.email.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(f.email.sent.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn email_gives_up_silently_after_all_attempts() {
        let f = fixture(10);
        let msg = f.db.append_message(3, 7, "hi").unwrap();

        let handle = f.escalator.schedule(&msg);

        // The timeline still terminates in EmailEscalated: delivery failure
        // is logged, never propagated.
        assert_eq!(handle.await.unwrap(), EscalationOutcome::EmailEscalated);
        assert_eq!(f.email.attempts.load(Ordering::SeqCst), 3);
        assert_eq!(f.email.sent.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn vanished_message_expires_the_timeline() {
        let f = fixture(0);
        let ghost = MessageRow {
            id: 9999,
            sender_id: 3,
            receiver_id: 7,
            content: "never stored".to_string(),
            created_at: String::new(),
            read: false,
        };

        let handle = f.escalator.schedule(&ghost);

        assert_eq!(handle.await.unwrap(), EscalationOutcome::Expired);
        assert_eq!(f.push.calls(), 0);
    }

    #[tokio::test]
    async fn push_failure_does_not_block_email_step() {
        let f = fixture(0);
        // No push targets for user 9: the push step reports not-sent.
        let msg = f.db.append_message(3, 9, "hi").unwrap();

        let handle = f.escalator.schedule(&msg);

        assert_eq!(handle.await.unwrap(), EscalationOutcome::EmailEscalated);
        assert_eq!(f.push.calls(), 0);
        assert_eq!(f.email.sent.load(Ordering::SeqCst), 1);
    }
}
