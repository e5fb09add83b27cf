//! Signed tokens exchanged between host and add-on.
//!
//! Tokens are JWS compact serializations signed with HMAC-SHA256 under the
//! tenant's shared secret. [`decode_unverified`] exists only to discover which
//! tenant a token claims to speak for; every trust decision goes through
//! [`decode_verified`].

mod claims;
mod codec;

pub use claims::{Audience, Claims};
pub use codec::{decode_unverified, decode_verified, encode};

/// Current Unix time in seconds.
#[must_use]
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
