//! Application layer for websockify.
//!
//! Holds the session lifecycle rules that the relay obeys regardless of the
//! transports underneath: one close-once guard per session, shared by both
//! pumps, with cancellation that can also come from outside.

pub mod session;

pub use session::SessionGuard;
