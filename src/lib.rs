//! # palisade
//!
//! palisade is an automated moderation agent for the AT Protocol / Bluesky
//! ecosystem. It watches a live stream of user activity for patterns of
//! abuse — repeated images, videos, records, and links, and redirection
//! chains toward suspicious destinations — and emits moderation actions
//! (reports, labels, acknowledgments, tags, comments) against the network's
//! moderation service.
//!
//! ## Architecture Overview
//!
//! The pipeline is built from a handful of components:
//!
//! ### Client and Session
//! - The client facade composes the session manager and the XRPC transport
//! - Sessions refresh proactively ahead of token expiry and reconnect from
//!   scratch when the server rejects the refresh token
//! - All requests share one retry policy for transient read-EOF faults
//!
//! ### Embed Checking
//! - A bounded queue feeds a fixed worker pool with per-post embed lists
//! - Frequency counters per category alert at geometric milestones
//! - External links are chased through their redirect chains, hop by hop,
//!   against the whitelist and the rule matcher
//!
//! ### Action Routing
//! - Matcher decisions and account reports flow through a second bounded
//!   queue into typed moderation API calls
//! - Dry-run mode short-circuits every emission into a log line
//!
//! ### Account Activity
//! - Recently-active accounts accumulate per-category event counts in a
//!   fixed-capacity LFU cache with an eviction flush hook
//!
//! Control flow: ingestion produces embed-info lists → embed checker queue →
//! per-embed handling → (counters + redirect follower + matcher) → action
//! router queue → client facade → remote service.
//!
//! ## Configuration
//!
//! The service is configured from a YAML file; see `config::Settings`. Both
//! queues apply backpressure, so a stalled remote service slows ingestion
//! instead of dropping work.
//!
//! ## Error Handling
//!
//! All error strings use the format: `error-palisade-<domain>-<number>
//! <message>: <details>`

/// Recently-active account state with LFU-bounded retention.
pub mod activity;

/// AT Protocol client: XRPC transport, session lifecycle, and the typed
/// moderation operations.
pub mod atproto;

/// Configuration structures and YAML loading for all service components.
pub mod config;

pub mod errors;

/// Embed checking: frequency counters, URI admission, and the redirect
/// follower.
pub mod embed;

/// The rule-matcher seam and the built-in substring matcher.
pub mod matcher;

/// Metrics collection for service observability.
pub mod metrics;

/// Moderation decision routing toward the remote service.
pub mod moderation;

/// Bounded work-queue abstraction backing the pipeline stages.
pub mod queue_adapter;
