//! Alert Processor and Dispatcher Set.
//!
//! A channel-fed batching loop forms the grouping buffer; per-channel
//! senders become the chat-webhook/email/generic-webhook dispatchers.
//! Severity ordering follows an `Info < Warning < Critical` scale.

pub mod dispatch;
pub mod process;
