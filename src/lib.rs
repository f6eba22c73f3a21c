//! Ticket intake: pulls support emails, classifies them and drafts replies.

pub mod api;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod services;
pub mod source;
pub mod store;
