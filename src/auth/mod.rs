//! Signed playback-URL verification.

mod signature;

pub use signature::{SignatureError, SignaturePayload, SignatureService};
