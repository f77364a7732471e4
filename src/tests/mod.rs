//! Consolidated test modules.
//!
//! End-to-end tests that drive the handler through complete sign-in flows.
