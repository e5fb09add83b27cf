//! HS256 JWS compact serialization.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode_header, errors::ErrorKind,
};

use super::Claims;
use crate::error::{AuthError, Result};

/// Signs `claims` with `secret` and returns the compact token.
///
/// # Errors
///
/// Returns [`AuthError::Config`] if the claims cannot be serialized.
///
/// # Examples
///
/// ```
/// use connect_auth::token::{Claims, decode_verified, encode};
///
/// # fn example() -> connect_auth::error::Result<()> {
/// let claims = Claims::new("my-addon", 1_700_000_000, 1_700_000_180).with_audience("jira:1");
/// let token = encode(&claims, "shared-secret")?;
/// assert_eq!(token.split('.').count(), 3);
/// assert_eq!(decode_verified(&token, "shared-secret")?, claims);
/// # Ok(())
/// # }
/// ```
pub fn encode(claims: &Claims, secret: &str) -> Result<String> {
    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .map_err(|e| AuthError::Config(format!("cannot sign token: {e}")))
}

/// Parses the claims without checking the signature.
///
/// Used only to find out which tenant's secret verifies the token.
///
/// # Errors
///
/// Returns [`AuthError::MalformedToken`] on structural problems.
pub fn decode_unverified(token: &str) -> Result<Claims> {
    let mut validation = validation();
    validation.insecure_disable_signature_validation();
    jsonwebtoken::decode::<Claims>(token, &DecodingKey::from_secret(&[]), &validation)
        .map(|data| data.claims)
        .map_err(token_error)
}

/// Verifies the signature with `secret` and parses the claims.
///
/// Expiry is not checked here; callers compare `exp` with their own clock.
///
/// # Errors
///
/// - [`AuthError::MalformedToken`] on structural problems or a missing `exp`
/// - [`AuthError::UnsupportedAlgorithm`] if the header is not HS256
/// - [`AuthError::InvalidSignature`] if the signature does not match
pub fn decode_verified(token: &str, secret: &str) -> Result<Claims> {
    let header = decode_header(token).map_err(|e| match header_algorithm(token) {
        Some(alg) => AuthError::UnsupportedAlgorithm(alg),
        None => token_error(e),
    })?;
    if header.alg != Algorithm::HS256 {
        return Err(AuthError::UnsupportedAlgorithm(format!("{:?}", header.alg)));
    }

    let key = DecodingKey::from_secret(secret.as_bytes());
    jsonwebtoken::decode::<Claims>(token, &key, &validation())
        .map(|data| data.claims)
        .map_err(token_error)
}

/// HS256 only, `exp` present, no time or audience checks.
fn validation() -> Validation {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.validate_exp = false;
    validation.validate_aud = false;
    validation
}

/// The raw `alg` of a header `jsonwebtoken` refuses to parse, such as `none`.
fn header_algorithm(token: &str) -> Option<String> {
    let header = URL_SAFE_NO_PAD.decode(token.split('.').next()?).ok()?;
    let header: serde_json::Value = serde_json::from_slice(&header).ok()?;
    header.get("alg")?.as_str().map(str::to_owned)
}

fn token_error(err: jsonwebtoken::errors::Error) -> AuthError {
    match err.kind() {
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::InvalidAlgorithm => AuthError::UnsupportedAlgorithm("not HS256".to_owned()),
        _ => AuthError::MalformedToken(err.to_string()),
    }
}
