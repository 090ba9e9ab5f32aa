pub mod auth;
pub mod chats;
