//! Moderated student community: screened posts and comments, support chat
//! rooms, notifications, and live views kept current by a change feed.

pub mod chat;
pub mod classifier;
pub mod comments;
pub mod config;
pub mod db;
pub mod errors;
pub mod models;
pub mod moderation;
pub mod notifications;
pub mod posts;
pub mod routes;
pub mod session;
pub mod state;
pub mod store;
pub mod sync;
