//! Runtime utilities for the BigPanda poller.
#![allow(clippy::uninlined_format_args)]

/// Process shutdown signals
pub mod shutdown;
