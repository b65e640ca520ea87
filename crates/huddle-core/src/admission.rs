//! Admission: turning a session artifact into a trusted display identity.
//!
//! Login itself happens elsewhere. By the time a connection is upgraded, the
//! login flow has left a session artifact behind (the `auth` cookie: base64
//! of a JSON object). A [`SessionVerifier`] reads it into a [`UserProfile`],
//! and [`Admission`] combines that with the avatar chain.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::avatar::AvatarChain;
use crate::member::DisplayIdentity;

/// Admission errors. A connection that hits one is never registered.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdmissionError {
    /// No session artifact was presented.
    #[error("Not authenticated")]
    Unauthenticated,

    /// The session artifact could not be read.
    #[error("Invalid session: {0}")]
    InvalidSession(String),
}

/// What the login provider knows about a user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserProfile {
    /// Opaque, stable user id.
    #[serde(rename = "userid")]
    pub user_id: String,
    /// Display name.
    pub name: String,
    /// Picture URL from the provider, if any.
    pub avatar_url: String,
    /// Email address, if any.
    pub email: String,
}

impl UserProfile {
    /// Encode as a session cookie value.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_cookie_value(&self) -> Result<String, serde_json::Error> {
        Ok(STANDARD.encode(serde_json::to_vec(self)?))
    }
}

/// Reads a session artifact into a user profile.
pub trait SessionVerifier: Send + Sync {
    /// Verify a session artifact.
    ///
    /// # Errors
    ///
    /// Returns [`AdmissionError::InvalidSession`] if the artifact is unusable.
    fn verify(&self, session: &str) -> Result<UserProfile, AdmissionError>;
}

/// The cookie format written by the login flow: base64 of a JSON object with
/// `userid`, `name`, `avatar_url` and `email`.
#[derive(Debug, Clone, Copy, Default)]
pub struct CookieSession;

impl SessionVerifier for CookieSession {
    fn verify(&self, session: &str) -> Result<UserProfile, AdmissionError> {
        let raw = STANDARD
            .decode(session.trim())
            .map_err(|e| AdmissionError::InvalidSession(e.to_string()))?;
        let profile: UserProfile = serde_json::from_slice(&raw)
            .map_err(|e| AdmissionError::InvalidSession(e.to_string()))?;

        if profile.user_id.is_empty() {
            return Err(AdmissionError::InvalidSession("missing userid".into()));
        }
        if profile.name.trim().is_empty() {
            return Err(AdmissionError::InvalidSession("missing name".into()));
        }

        Ok(profile)
    }
}

/// Resolves display identities for incoming connections.
#[derive(Clone)]
pub struct Admission {
    verifier: Arc<dyn SessionVerifier>,
    avatars: AvatarChain,
}

impl Admission {
    /// Create an admission step from a verifier and an avatar chain.
    #[must_use]
    pub fn new(verifier: Arc<dyn SessionVerifier>, avatars: AvatarChain) -> Self {
        Self { verifier, avatars }
    }

    /// The avatar chain in use.
    #[must_use]
    pub fn avatars(&self) -> &AvatarChain {
        &self.avatars
    }

    /// Resolve the display identity for a session.
    ///
    /// An avatar that cannot be found leaves the avatar URL empty.
    ///
    /// # Errors
    ///
    /// Returns an error if the session is missing or invalid.
    pub fn admit(&self, session: Option<&str>) -> Result<DisplayIdentity, AdmissionError> {
        let session = session
            .filter(|s| !s.trim().is_empty())
            .ok_or(AdmissionError::Unauthenticated)?;
        let profile = self.verifier.verify(session)?;
        let avatar_url = self.avatars.resolve_or_empty(&profile);

        debug!(user = %profile.user_id, has_avatar = !avatar_url.is_empty(), "Identity resolved");

        Ok(DisplayIdentity::new(profile.name, avatar_url, profile.user_id))
    }
}

impl std::fmt::Debug for Admission {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Admission")
            .field("avatars", &self.avatars)
            .finish_non_exhaustive()
    }
}
