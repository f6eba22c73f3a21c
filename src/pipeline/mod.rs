//! Ticket processing pipeline.
//!
//! 1. [`puller::Puller`] pulls new interactions on a timer and appends them
//!    to the durable queue
//! 2. [`drainer::Drainer`] peeks bounded batches and runs them concurrently
//! 3. [`worker::Worker`] resolves the sender, classifies, drafts a reply and
//!    writes the result artifact
//!
//! Finished IDs are recorded in the ledger before they leave the queue.

pub mod artifact;
pub mod drainer;
pub mod puller;
pub mod rules;
pub mod types;
pub mod worker;
