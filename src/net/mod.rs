//! Outbound networking: SSRF-safe HTTP and challenge verification.

pub mod safe;
pub mod turnstile;

pub use safe::{ensure_public_host, is_forbidden_ip, safe_client, NetError, SafeResolver};
pub use turnstile::{TurnstileError, TurnstileVerifier};
