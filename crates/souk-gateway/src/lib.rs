pub mod connection;
pub mod moderation;
pub mod rooms;
