//! JWT authentication for the session gateway.
//!
//! Connections authenticate with an access token minted by the account
//! system. Each access token carries a user ID (`sub`) and a session ID
//! (`sid`) so one user can hold several live sockets; room membership is an
//! event, not a claim, because users roam between rooms over a single
//! connection. Refresh tokens let clients obtain new access tokens without
//! re-authenticating, if still valid.
//!
//! ## Example Usage
//! ```
//! use parlor::auth::JwtAuth;
//!
//! let auth = JwtAuth::new("super-secret-key");
//! let access = auth.sign_access("user42".into(), "sess-1".into(), 3600).unwrap();
//! let claims = auth.verify_access(&access).unwrap();
//! assert_eq!(claims.sub, "user42");
//! assert_eq!(claims.sid, "sess-1");
//! ```
use anyhow::{Context, Result};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

/// Payload of an access token presented at the WebSocket upgrade.
///
/// ## Fields
/// - `sub`: Subject — the unique identifier of the user.
/// - `sid`: Session — distinguishes this socket from the user's others.
/// - `exp`: Expiration — UNIX timestamp when the token should expire.
/// - `iss`: Issuer — optional identifier of the token issuer.
/// - `aud`: Audience — optional identifier of the intended recipient.
#[derive(Debug, Serialize, Deserialize)]
pub struct AccessClaims {
  pub sub: String,
  pub sid: String,
  pub exp: usize,
  pub iss: Option<String>,
  pub aud: Option<String>,
}

/// Payload of a refresh token used to obtain new access tokens.
#[derive(Debug, Serialize, Deserialize)]
pub struct RefreshClaims {
  pub sub: String,
  pub exp: usize,
}

/// Configuration options for JWT validation.
///
/// ## Fields
/// - `leeway`: Allowed clock skew in seconds.
/// - `issuer`: Optional expected issuer string.
/// - `audience`: Optional expected audience string.
#[derive(Clone, Default)]
pub struct JwtAuthOptions {
  pub leeway: u64,
  pub issuer: Option<String>,
  pub audience: Option<String>,
}

/// JWT authentication handler for signing and verifying tokens.
#[derive(Clone)]
pub struct JwtAuth {
  secret: String,
  options: JwtAuthOptions,
}

impl JwtAuth {
  /// Creates a new instance of `JwtAuth`.
  ///
  /// ## Parameters
  /// - `secret`: The signing key used to encode and decode JWTs.
  pub fn new(secret: &str) -> Self {
    Self {
      secret: secret.into(),
      options: JwtAuthOptions::default(),
    }
  }

  /// Creates a new instance of `JwtAuth` with configurable options.
  pub fn with_options(secret: &str, options: JwtAuthOptions) -> Self {
    Self {
      secret: secret.into(),
      options,
    }
  }

  /// Signs an access token for a user session with a custom expiry.
  ///
  /// ## Parameters
  /// - `user_id`: ID of the user seeking authentication.
  /// - `session_id`: ID distinguishing this connection.
  /// - `ttl_secs`: Time-to-live in seconds for the token.
  ///
  /// ## Returns
  /// - `Result<String>`: Encoded JWT token or an error.
  pub fn sign_access(&self, user_id: String, session_id: String, ttl_secs: usize) -> Result<String> {
    let now = chrono::Utc::now().timestamp();
    let exp = now.saturating_add(ttl_secs as i64) as usize;

    let claims = AccessClaims {
      sub: user_id,
      sid: session_id,
      exp,
      iss: self.options.issuer.clone(),
      aud: self.options.audience.clone(),
    };
    encode(
      &Header::default(),
      &claims,
      &EncodingKey::from_secret(self.secret.as_ref()),
    )
    .context("Failed to encode access token.")
  }

  /// Signs a refresh token for a user with a longer expiry.
  pub fn sign_refresh(&self, user_id: String, ttl_secs: usize) -> Result<String> {
    let exp = chrono::Utc::now().timestamp() as usize + ttl_secs;
    let claims = RefreshClaims { sub: user_id, exp };
    encode(
      &Header::default(),
      &claims,
      &EncodingKey::from_secret(self.secret.as_ref()),
    )
    .context("Failed to encode refresh token.")
  }

  /// Verifies an access token and returns its claims if valid.
  ///
  /// ## Parameters
  /// - `token`: Encoded JWT access token.
  ///
  /// ## Returns
  /// - `Result<AccessClaims>`: Parsed claims if valid.
  pub fn verify_access(&self, token: &str) -> Result<AccessClaims> {
    let mut validation = Validation::default();
    validation.leeway = self.options.leeway;
    if let Some(ref iss) = self.options.issuer {
      validation.set_issuer(&[iss]);
    }
    if let Some(ref aud) = self.options.audience {
      validation.set_audience(&[aud]);
    }
    let data = decode::<AccessClaims>(
      token,
      &DecodingKey::from_secret(self.secret.as_ref()),
      &validation,
    )
    .context("Failed to decode access token")?;
    Ok(data.claims)
  }

  /// Verifies a refresh token and returns its claims if valid.
  pub fn verify_refresh(&self, token: &str) -> Result<RefreshClaims> {
    let mut validation = Validation::default();
    validation.leeway = self.options.leeway;
    let data = decode::<RefreshClaims>(
      token,
      &DecodingKey::from_secret(self.secret.as_ref()),
      &validation,
    )
    .context("Failed to decode refresh token")?;
    Ok(data.claims)
  }
}

/// ######################################## TESTS ########################################
