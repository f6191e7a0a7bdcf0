//! The authenticated user as known to the client.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Identity provider that authenticated a user.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum AuthProvider {
    /// Email and password.
    Password,
    /// Google social sign-in.
    Google,
    /// GitHub social sign-in.
    Github,
    /// Any other provider, keyed by its provider id.
    Other(String),
}

impl AuthProvider {
    /// Provider id as reported by the identity provider.
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Password => "password",
            Self::Google => "google.com",
            Self::Github => "github.com",
            Self::Other(id) => id,
        }
    }
}

impl From<String> for AuthProvider {
    fn from(id: String) -> Self {
        match id.as_str() {
            "password" => Self::Password,
            "google.com" => Self::Google,
            "github.com" => Self::Github,
            _ => Self::Other(id),
        }
    }
}

impl From<AuthProvider> for String {
    fn from(provider: AuthProvider) -> Self {
        provider.as_str().to_string()
    }
}

impl fmt::Display for AuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Social providers offered through popup sign-in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SocialProvider {
    Google,
    Github,
}

impl From<SocialProvider> for AuthProvider {
    fn from(provider: SocialProvider) -> Self {
        match provider {
            SocialProvider::Google => Self::Google,
            SocialProvider::Github => Self::Github,
        }
    }
}

/// Stable attributes of the signed-in user.
///
/// Owned by the auth state holder; everyone else works on clones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Provider-assigned user id.
    pub uid: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// Avatar reference.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo_url: Option<String>,
    pub provider: AuthProvider,
}

impl Identity {
    /// Create an identity with only a uid and provider.
    #[must_use]
    pub fn new(uid: impl Into<String>, provider: AuthProvider) -> Self {
        Self {
            uid: uid.into(),
            email: None,
            display_name: None,
            photo_url: None,
            provider,
        }
    }

    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_photo_url(mut self, url: impl Into<String>) -> Self {
        self.photo_url = Some(url.into());
        self
    }

    /// Name to greet the user with, falling back to the email local part.
    #[must_use]
    pub fn greeting_name(&self) -> &str {
        if let Some(name) = self.display_name.as_deref().filter(|n| !n.is_empty()) {
            return name;
        }
        self.email
            .as_deref()
            .and_then(|e| e.split('@').next())
            .filter(|local| !local.is_empty())
            .unwrap_or(&self.uid)
    }
}
