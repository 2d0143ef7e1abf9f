use std::sync::Arc;

use souk_db::Database;
use souk_notify::dispatch::Notifier;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub notifier: Notifier,
    /// Base URL notification links point into, e.g. "https://souk.example".
    pub app_base_url: String,
}
