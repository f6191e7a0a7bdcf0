//! Provider and session error types.

use std::fmt;

use thiserror::Error;

/// Title shown for failed auth actions.
pub const FAILURE_TITLE: &str = "Oops!";
/// Title shown for successful auth actions.
pub const SUCCESS_TITLE: &str = "Success";
/// Message used for any provider error we do not recognise.
pub const GENERIC_FAILURE: &str = "Something went wrong. Please try again.";

/// Typed identity-provider failure.
///
/// Provider codes are mapped into this enum once, at the token source
/// boundary. Nothing downstream matches on provider strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderErrorKind {
    PopupClosed,
    PopupBlocked,
    /// A second popup was requested while one was already open.
    CancelledPopupRequest,
    AccountExistsWithDifferentCredential,
    InvalidCredential,
    EmailAlreadyInUse,
    WeakPassword,
    UserNotFound,
    TooManyRequests,
    Network,
    /// The sign-in method cannot run in this environment.
    Unsupported,
    Other,
}

impl ProviderErrorKind {
    /// Map an identity-provider error code into a kind.
    ///
    /// Accepts both SDK style codes (`auth/popup-closed-by-user`) and REST
    /// style codes (`EMAIL_EXISTS`, `WEAK_PASSWORD : Password should be...`).
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        let code = code.trim();
        let code = code.strip_prefix("auth/").unwrap_or(code);
        // REST codes may carry a trailing human readable reason.
        let code = code.split([':', ' ']).next().unwrap_or(code);

        match code {
            "popup-closed-by-user" | "user-cancelled" => Self::PopupClosed,
            "popup-blocked" => Self::PopupBlocked,
            "cancelled-popup-request" => Self::CancelledPopupRequest,
            "account-exists-with-different-credential" | "FEDERATED_USER_ID_ALREADY_LINKED" => {
                Self::AccountExistsWithDifferentCredential
            }
            "invalid-credential" | "wrong-password" | "invalid-email" | "INVALID_PASSWORD"
            | "INVALID_LOGIN_CREDENTIALS" | "INVALID_EMAIL" | "INVALID_IDP_RESPONSE" => {
                Self::InvalidCredential
            }
            "email-already-in-use" | "EMAIL_EXISTS" => Self::EmailAlreadyInUse,
            "weak-password" | "WEAK_PASSWORD" => Self::WeakPassword,
            "user-not-found" | "EMAIL_NOT_FOUND" => Self::UserNotFound,
            "too-many-requests" | "TOO_MANY_ATTEMPTS_TRY_LATER" => Self::TooManyRequests,
            "network-request-failed" => Self::Network,
            "operation-not-supported-in-this-environment" | "OPERATION_NOT_ALLOWED" => {
                Self::Unsupported
            }
            _ => Self::Other,
        }
    }

    /// Whether the failure came from popup-based sign-in.
    #[must_use]
    pub const fn is_popup(self) -> bool {
        matches!(
            self,
            Self::PopupClosed | Self::PopupBlocked | Self::CancelledPopupRequest
        )
    }

    /// Human readable message for this failure.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::PopupClosed => "The sign-in popup was closed before finishing. Please try again.",
            Self::PopupBlocked => {
                "The sign-in popup was blocked. Please allow popups for this site and try again."
            }
            Self::CancelledPopupRequest => "Another sign-in popup is already open.",
            Self::AccountExistsWithDifferentCredential => {
                "An account already exists with this email using a different sign-in method."
            }
            Self::InvalidCredential => "Invalid email or password.",
            Self::EmailAlreadyInUse => "This email is already registered.",
            Self::WeakPassword => "Password should be at least 6 characters.",
            Self::UserNotFound => "No account was found for this email.",
            Self::TooManyRequests => "Too many attempts. Please wait a moment and try again.",
            Self::Network => "Network error. Check your connection and try again.",
            Self::Unsupported => "This sign-in method is not available here.",
            Self::Other => GENERIC_FAILURE,
        }
    }

    /// Notice to display for this failure.
    #[must_use]
    pub fn notice(self) -> AuthNotice {
        AuthNotice::failure(self.message())
    }
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identity-provider error.
#[derive(Debug, Clone, Error)]
#[error("identity provider error ({kind}): {detail}")]
pub struct ProviderError {
    pub kind: ProviderErrorKind,
    /// Raw provider detail, for logs only.
    pub detail: String,
}

impl ProviderError {
    #[must_use]
    pub fn new(kind: ProviderErrorKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }

    /// Build an error from a provider code, keeping the code as detail.
    #[must_use]
    pub fn from_code(code: &str) -> Self {
        Self::new(ProviderErrorKind::from_code(code), code)
    }

    #[must_use]
    pub fn notice(&self) -> AuthNotice {
        self.kind.notice()
    }
}

/// Title/message pair shown to the user after an auth action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthNotice {
    pub title: &'static str,
    pub message: String,
}

impl AuthNotice {
    #[must_use]
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            title: FAILURE_TITLE,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            title: SUCCESS_TITLE,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn is_failure(&self) -> bool {
        self.title == FAILURE_TITLE
    }
}

/// Session bridge error.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Session endpoint rejected request: HTTP {0}")]
    Rejected(u16),
    #[error("Session transport error: {0}")]
    Transport(String),
    #[error("No bearer token available for the current user")]
    NoToken,
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sdk_codes() {
        assert_eq!(
            ProviderErrorKind::from_code("auth/popup-closed-by-user"),
            ProviderErrorKind::PopupClosed
        );
        assert_eq!(
            ProviderErrorKind::from_code("auth/popup-blocked"),
            ProviderErrorKind::PopupBlocked
        );
        assert_eq!(
            ProviderErrorKind::from_code("auth/cancelled-popup-request"),
            ProviderErrorKind::CancelledPopupRequest
        );
        assert_eq!(
            ProviderErrorKind::from_code("auth/account-exists-with-different-credential"),
            ProviderErrorKind::AccountExistsWithDifferentCredential
        );
        assert_eq!(
            ProviderErrorKind::from_code("auth/email-already-in-use"),
            ProviderErrorKind::EmailAlreadyInUse
        );
    }

    #[test]
    fn test_rest_codes_with_reason() {
        let code = "WEAK_PASSWORD : Password should be at least 6 characters";
        assert_eq!(
            ProviderErrorKind::from_code(code),
            ProviderErrorKind::WeakPassword
        );
        assert_eq!(
            ProviderErrorKind::from_code("INVALID_LOGIN_CREDENTIALS"),
            ProviderErrorKind::InvalidCredential
        );
        assert_eq!(
            ProviderErrorKind::from_code("EMAIL_EXISTS"),
            ProviderErrorKind::EmailAlreadyInUse
        );
    }

    #[test]
    fn test_unknown_collapses_to_generic() {
        let kind = ProviderErrorKind::from_code("auth/internal-error");
        assert_eq!(kind, ProviderErrorKind::Other);
        let notice = kind.notice();
        assert_eq!(notice.title, "Oops!");
        assert_eq!(notice.message, GENERIC_FAILURE);
        assert!(notice.is_failure());
    }

    #[test]
    fn test_popup_kinds() {
        assert!(ProviderErrorKind::PopupBlocked.is_popup());
        assert!(!ProviderErrorKind::WeakPassword.is_popup());
    }

    #[test]
    fn test_success_notice() {
        let notice = AuthNotice::success("Account created.");
        assert_eq!(notice.title, "Success");
        assert!(!notice.is_failure());
    }
}
