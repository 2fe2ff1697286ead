//! Identity and session provider seam.

use async_trait::async_trait;
use parking_lot::RwLock;
use thiserror::Error;

/// Failure to resolve the current session.
#[derive(Debug, Error)]
pub enum IdentityError {
    /// The session store could not be queried.
    #[error("session unavailable: {0}")]
    Unavailable(String),

    /// A session exists but is no longer usable.
    #[error("session expired")]
    Expired,
}

/// Supplies bearer tokens to the HTTP pipeline and the user identity to
/// the connection manager.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Resolve the bearer token for the current session, if any.
    async fn token(&self) -> Result<Option<String>, IdentityError>;

    /// Identity of the signed-in user, if any.
    fn current_user_id(&self) -> Option<String>;
}

/// In-memory identity that can be updated at runtime.
#[derive(Debug, Default)]
pub struct StaticIdentity {
    token: RwLock<Option<String>>,
    user_id: RwLock<Option<String>>,
}

impl StaticIdentity {
    /// Create an anonymous identity.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bearer token.
    #[must_use]
    pub fn with_token(self, token: impl Into<String>) -> Self {
        *self.token.write() = Some(token.into());
        self
    }

    /// Set the user identity.
    #[must_use]
    pub fn with_user_id(self, user_id: impl Into<String>) -> Self {
        *self.user_id.write() = Some(user_id.into());
        self
    }

    /// Build from `RESILINK_TOKEN` and `RESILINK_USER_ID` using `lookup`.
    #[must_use]
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            token: RwLock::new(lookup("RESILINK_TOKEN").filter(|t| !t.is_empty())),
            user_id: RwLock::new(lookup("RESILINK_USER_ID").filter(|u| !u.is_empty())),
        }
    }

    /// Replace the bearer token.
    pub fn set_token(&self, token: Option<String>) {
        *self.token.write() = token;
    }

    /// Replace the user identity.
    pub fn set_user_id(&self, user_id: Option<String>) {
        *self.user_id.write() = user_id;
    }
}

#[async_trait]
impl IdentityProvider for StaticIdentity {
    async fn token(&self) -> Result<Option<String>, IdentityError> {
        Ok(self.token.read().clone())
    }

    fn current_user_id(&self) -> Option<String> {
        self.user_id.read().clone()
    }
}
