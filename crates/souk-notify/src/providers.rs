//! Contracts for the outbound delivery collaborators, plus their HTTP
//! implementations. The providers themselves (push gateway, web-push relay,
//! mail API, accounts service) are external systems; everything here is a
//! thin client over their endpoints.
//!
//! The traits use boxed futures so they stay object-safe; components hold
//! `Arc<dyn ...>` handles injected at construction, never ambient singletons.

use futures_util::future::BoxFuture;
use serde_json::json;
use tracing::warn;

/// Outcome of a single push delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    /// The endpoint is gone for good (expired token, unsubscribed browser).
    /// The caller must drop the target.
    PermanentlyInvalid,
    /// Provider hiccup; the target stays registered.
    Transient(String),
}

/// Notification content handed to push providers.
#[derive(Debug, Clone)]
pub struct PushNote {
    pub title: String,
    pub body: String,
    pub url: String,
}

/// Direct-token channel (mobile/desktop push).
pub trait DirectPushProvider: Send + Sync {
    fn send<'a>(&'a self, token: &'a str, note: &'a PushNote) -> BoxFuture<'a, PushOutcome>;
}

/// Browser-subscription channel (web push).
pub trait SubscriptionPushProvider: Send + Sync {
    fn send<'a>(&'a self, subscription: &'a str, note: &'a PushNote) -> BoxFuture<'a, PushOutcome>;
}

/// Outbound email transport. Callers retry; implementations make exactly one
/// attempt per call.
pub trait EmailSender: Send + Sync {
    fn send<'a>(
        &'a self,
        address: &'a str,
        subject: &'a str,
        body: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<()>>;
}

/// Lookup into the marketplace's accounts service.
pub trait UserDirectory: Send + Sync {
    fn email_of(&self, user_id: i64) -> BoxFuture<'_, Option<String>>;
}

// -- HTTP implementations --

pub struct HttpDirectPush {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
}

impl HttpDirectPush {
    pub fn new(client: reqwest::Client, api_url: String, api_key: String) -> Self {
        Self {
            client,
            api_url,
            api_key,
        }
    }
}

impl DirectPushProvider for HttpDirectPush {
    fn send<'a>(&'a self, token: &'a str, note: &'a PushNote) -> BoxFuture<'a, PushOutcome> {
        Box::pin(async move {
            let payload = json!({
                "to": token,
                "notification": {
                    "title": note.title,
                    "body": note.body,
                },
                "data": {
                    "url": note.url,
                    "click_action": note.url,
                },
            });

            let response = self
                .client
                .post(&self.api_url)
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => PushOutcome::Delivered,
                // The push gateway reports dead registrations as 404/410.
                Ok(resp)
                    if resp.status() == reqwest::StatusCode::NOT_FOUND
                        || resp.status() == reqwest::StatusCode::GONE =>
                {
                    PushOutcome::PermanentlyInvalid
                }
                Ok(resp) => PushOutcome::Transient(format!("push gateway returned {}", resp.status())),
                Err(e) => PushOutcome::Transient(e.to_string()),
            }
        })
    }
}

pub struct HttpSubscriptionPush {
    client: reqwest::Client,
    api_url: String,
    vapid_key: String,
}

impl HttpSubscriptionPush {
    pub fn new(client: reqwest::Client, api_url: String, vapid_key: String) -> Self {
        Self {
            client,
            api_url,
            vapid_key,
        }
    }
}

impl SubscriptionPushProvider for HttpSubscriptionPush {
    fn send<'a>(&'a self, subscription: &'a str, note: &'a PushNote) -> BoxFuture<'a, PushOutcome> {
        Box::pin(async move {
            // Subscriptions are stored as the JSON blob the browser handed us.
            // One that no longer parses can never be delivered to.
            let subscription: serde_json::Value = match serde_json::from_str(subscription) {
                Ok(v) => v,
                Err(e) => {
                    warn!("Discarding unparseable push subscription: {}", e);
                    return PushOutcome::PermanentlyInvalid;
                }
            };

            let payload = json!({
                "subscription": subscription,
                "vapid_key": self.vapid_key,
                "payload": {
                    "title": note.title,
                    "body": note.body,
                    "url": note.url,
                },
            });

            let response = self
                .client
                .post(&self.api_url)
                .json(&payload)
                .send()
                .await;

            match response {
                Ok(resp) if resp.status().is_success() => PushOutcome::Delivered,
                Ok(resp)
                    if resp.status() == reqwest::StatusCode::NOT_FOUND
                        || resp.status() == reqwest::StatusCode::GONE =>
                {
                    PushOutcome::PermanentlyInvalid
                }
                Ok(resp) => PushOutcome::Transient(format!("web-push relay returned {}", resp.status())),
                Err(e) => PushOutcome::Transient(e.to_string()),
            }
        })
    }
}

pub struct HttpEmailSender {
    client: reqwest::Client,
    api_url: String,
    api_key: String,
    from: String,
}

impl HttpEmailSender {
    pub fn new(client: reqwest::Client, api_url: String, api_key: String, from: String) -> Self {
        Self {
            client,
            api_url,
            api_key,
            from,
        }
    }
}

impl EmailSender for HttpEmailSender {
    fn send<'a>(
        &'a self,
        address: &'a str,
        subject: &'a str,
        body: &'a str,
    ) -> BoxFuture<'a, anyhow::Result<()>> {
        Box::pin(async move {
            let payload = json!({
                "from": self.from,
                "to": address,
                "subject": subject,
                "text": body,
            });

            let resp = self
                .client
                .post(&self.api_url)
                .bearer_auth(&self.api_key)
                .json(&payload)
                .send()
                .await?;

            if resp.status().is_success() {
                Ok(())
            } else {
                anyhow::bail!("mail API returned {}", resp.status())
            }
        })
    }
}

pub struct HttpUserDirectory {
    client: reqwest::Client,
    base_url: String,
}

impl HttpUserDirectory {
    pub fn new(client: reqwest::Client, base_url: String) -> Self {
        Self { client, base_url }
    }
}

impl UserDirectory for HttpUserDirectory {
    fn email_of(&self, user_id: i64) -> BoxFuture<'_, Option<String>> {
        Box::pin(async move {
            let url = format!("{}/users/{}", self.base_url, user_id);

            let resp = match self.client.get(&url).send().await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!("Accounts lookup for user {} failed: {}", user_id, e);
                    return None;
                }
            };

            if !resp.status().is_success() {
                warn!("Accounts lookup for user {} returned {}", user_id, resp.status());
                return None;
            }

            #[derive(serde::Deserialize)]
            struct UserEmail {
                email: String,
            }

            match resp.json::<UserEmail>().await {
                Ok(user) => Some(user.email),
                Err(e) => {
                    warn!("Accounts payload for user {} unreadable: {}", user_id, e);
                    None
                }
            }
        })
    }
}
