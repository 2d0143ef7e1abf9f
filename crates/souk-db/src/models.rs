/// Database row types. These map directly to SQLite rows.
/// Distinct from souk-types API models to keep the DB layer independent.

#[derive(Debug)]
pub struct MessageRow {
    pub id: i64,
    pub sender_id: i64,
    pub receiver_id: i64,
    pub content: String,
    pub created_at: String,
    pub read: bool,
}

pub struct PreviewRow {
    pub sender_id: i64,
    pub receiver_id: i64,
    pub latest_message: String,
    pub time: String,
    pub unread: i64,
    pub actual_sender_id: i64,
    pub actual_receiver_id: i64,
}

pub struct PushTargetRow {
    pub id: i64,
    pub user_id: i64,
    pub token: Option<String>,
    pub subscription: Option<String>,
    pub created_at: String,
}
