//! Device services
//!
//! Long-running logic kept apart from the HTTP surface: the connectivity
//! state machine driven by the scheduler and the per-connection frame loop.

pub mod connectivity;
pub mod stream;
