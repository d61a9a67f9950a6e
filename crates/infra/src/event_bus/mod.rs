//! Event bus adapters.
//!
//! The synchronous in-process bus lives in `archcat-events`; this module adds the
//! queued (asynchronous) delivery mode.

pub mod queued;

pub use queued::QueuedEventBus;
