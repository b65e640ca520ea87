//! Avatar URL resolution.
//!
//! Resolvers implement [`Avatar`]. An [`AvatarChain`] tries several in order
//! and returns the first URL found.

use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::trace;

use crate::admission::UserProfile;

/// Default Gravatar endpoint.
pub const GRAVATAR_BASE: &str = "//www.gravatar.com/avatar/";

/// Avatar resolution errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AvatarError {
    /// The resolver has no avatar for this user.
    #[error("Unable to get avatar URL")]
    NotFound,
}

/// A strategy for finding a user's profile picture.
pub trait Avatar: Send + Sync {
    /// Get the avatar URL for a user.
    ///
    /// # Errors
    ///
    /// Returns [`AvatarError::NotFound`] if this strategy has no avatar.
    fn avatar_url(&self, profile: &UserProfile) -> Result<String, AvatarError>;

    /// Resolver name, as used in configuration.
    fn name(&self) -> &'static str;
}

/// Uses the picture supplied by the login provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct AuthAvatar;

impl Avatar for AuthAvatar {
    fn avatar_url(&self, profile: &UserProfile) -> Result<String, AvatarError> {
        if profile.avatar_url.is_empty() {
            return Err(AvatarError::NotFound);
        }
        Ok(profile.avatar_url.clone())
    }

    fn name(&self) -> &'static str {
        "auth"
    }
}

/// Builds a Gravatar URL from the user id, which is the email hash.
#[derive(Debug, Clone)]
pub struct GravatarAvatar {
    base_url: String,
}

impl GravatarAvatar {
    /// Create a resolver for the given Gravatar endpoint.
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        if !base_url.ends_with('/') {
            base_url.push('/');
        }
        Self { base_url }
    }
}

impl Default for GravatarAvatar {
    fn default() -> Self {
        Self::new(GRAVATAR_BASE)
    }
}

impl Avatar for GravatarAvatar {
    fn avatar_url(&self, profile: &UserProfile) -> Result<String, AvatarError> {
        if profile.user_id.is_empty() {
            return Err(AvatarError::NotFound);
        }
        Ok(format!("{}{}", self.base_url, profile.user_id))
    }

    fn name(&self) -> &'static str {
        "gravatar"
    }
}

/// Looks for an uploaded picture named `<user id>.<ext>` in a directory.
#[derive(Debug, Clone)]
pub struct FileSystemAvatar {
    directory: PathBuf,
    url_prefix: String,
}

impl FileSystemAvatar {
    /// Create a resolver over `directory`, publishing files under `url_prefix`.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>, url_prefix: impl Into<String>) -> Self {
        Self {
            directory: directory.into(),
            url_prefix: url_prefix.into(),
        }
    }
}

impl Avatar for FileSystemAvatar {
    fn avatar_url(&self, profile: &UserProfile) -> Result<String, AvatarError> {
        if profile.user_id.is_empty() {
            return Err(AvatarError::NotFound);
        }

        let entries = std::fs::read_dir(&self.directory).map_err(|_| AvatarError::NotFound)?;
        for entry in entries.flatten() {
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if path.file_stem().and_then(|s| s.to_str()) != Some(profile.user_id.as_str()) {
                continue;
            }
            if let Some(file_name) = path.file_name().and_then(|s| s.to_str()) {
                return Ok(format!("{}{}", self.url_prefix, file_name));
            }
        }

        Err(AvatarError::NotFound)
    }

    fn name(&self) -> &'static str {
        "file_system"
    }
}

/// Tries each resolver in order; the first URL wins.
#[derive(Clone, Default)]
pub struct AvatarChain {
    resolvers: Vec<Arc<dyn Avatar>>,
}

impl AvatarChain {
    /// Create a chain from resolvers in priority order.
    #[must_use]
    pub fn new(resolvers: Vec<Arc<dyn Avatar>>) -> Self {
        Self { resolvers }
    }

    /// Append a resolver with the lowest priority.
    pub fn push(&mut self, resolver: Arc<dyn Avatar>) {
        self.resolvers.push(resolver);
    }

    /// Resolver names in priority order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.resolvers.iter().map(|r| r.name()).collect()
    }

    /// Resolve, treating "not found" as no avatar.
    #[must_use]
    pub fn resolve_or_empty(&self, profile: &UserProfile) -> String {
        self.avatar_url(profile).unwrap_or_default()
    }
}

impl std::fmt::Debug for AvatarChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AvatarChain")
            .field("resolvers", &self.names())
            .finish()
    }
}

impl Avatar for AvatarChain {
    fn avatar_url(&self, profile: &UserProfile) -> Result<String, AvatarError> {
        for resolver in &self.resolvers {
            match resolver.avatar_url(profile) {
                Ok(url) => {
                    trace!(resolver = resolver.name(), user = %profile.user_id, "Avatar resolved");
                    return Ok(url);
                }
                Err(AvatarError::NotFound) => continue,
            }
        }
        Err(AvatarError::NotFound)
    }

    fn name(&self) -> &'static str {
        "chain"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile(user_id: &str, avatar_url: &str) -> UserProfile {
        UserProfile {
            user_id: user_id.to_string(),
            name: "Alice".to_string(),
            avatar_url: avatar_url.to_string(),
            email: String::new(),
        }
    }

    #[test]
    fn test_auth_avatar() {
        assert_eq!(
            AuthAvatar.avatar_url(&profile("abc", "")),
            Err(AvatarError::NotFound)
        );

        let url = "http://url-to-avatar/";
        assert_eq!(AuthAvatar.avatar_url(&profile("abc", url)).unwrap(), url);
    }

    #[test]
    fn test_gravatar_avatar() {
        let gravatar = GravatarAvatar::default();
        let url = gravatar
            .avatar_url(&profile("0bc83cb571cd1c50ba6f3e8a78ef1346", ""))
            .unwrap();
        assert_eq!(url, "//www.gravatar.com/avatar/0bc83cb571cd1c50ba6f3e8a78ef1346");

        assert_eq!(
            gravatar.avatar_url(&profile("", "")),
            Err(AvatarError::NotFound)
        );
        assert_eq!(
            GravatarAvatar::new("https://g.example/avatar")
                .avatar_url(&profile("abc", ""))
                .unwrap(),
            "https://g.example/avatar/abc"
        );
    }

    #[test]
    fn test_file_system_avatar() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("abc.png"), b"png").unwrap();
        std::fs::write(dir.path().join("other.jpg"), b"jpg").unwrap();

        let avatars = FileSystemAvatar::new(dir.path(), "/avatars/");
        assert_eq!(
            avatars.avatar_url(&profile("abc", "")).unwrap(),
            "/avatars/abc.png"
        );
        assert_eq!(
            avatars.avatar_url(&profile("missing", "")),
            Err(AvatarError::NotFound)
        );
    }

    #[test]
    fn test_file_system_avatar_missing_directory() {
        let avatars = FileSystemAvatar::new("/nonexistent/huddle-avatars", "/avatars/");
        assert_eq!(
            avatars.avatar_url(&profile("abc", "")),
            Err(AvatarError::NotFound)
        );
    }

    #[test]
    fn test_chain_first_success_wins() {
        let chain = AvatarChain::new(vec![
            Arc::new(AuthAvatar),
            Arc::new(GravatarAvatar::default()),
        ]);
        assert_eq!(chain.names(), vec!["auth", "gravatar"]);

        assert_eq!(
            chain.avatar_url(&profile("abc", "http://provider/pic")).unwrap(),
            "http://provider/pic"
        );
        assert_eq!(
            chain.avatar_url(&profile("abc", "")).unwrap(),
            "//www.gravatar.com/avatar/abc"
        );
    }

    #[test]
    fn test_chain_exhausted() {
        let chain = AvatarChain::new(vec![Arc::new(AuthAvatar)]);
        assert_eq!(
            chain.avatar_url(&profile("abc", "")),
            Err(AvatarError::NotFound)
        );
        assert_eq!(chain.resolve_or_empty(&profile("abc", "")), "");
        assert_eq!(AvatarChain::default().resolve_or_empty(&profile("abc", "x")), "");
    }
}
