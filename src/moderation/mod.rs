//! Moderation decision routing toward the remote service.

pub mod router;

pub use router::{ActionRouter, ActionRouterHandle, AutomationReason, Decision};
