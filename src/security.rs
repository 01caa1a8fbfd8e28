// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Identity resolution and the certificate validation seam.
//!
//! The client never validates certificates itself; it delegates to an
//! injected [`CertificateValidator`]. Identity selection follows one rule:
//! configured credentials win, otherwise anonymous access is used if and only
//! if the endpoint advertises it.

use std::fmt;

use crate::error::SecurityError;
use crate::types::TokenPolicy;

// =============================================================================
// Identity
// =============================================================================

/// The user identity presented when activating a session.
#[derive(Clone, PartialEq, Eq)]
pub enum Identity {
    /// Anonymous access.
    Anonymous,

    /// Username/password token.
    UserName {
        /// The username.
        username: String,
        /// The password.
        password: String,
    },
}

impl Identity {
    /// Returns `true` if this is the anonymous identity.
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "Anonymous"),
            Self::UserName { username, .. } => f
                .debug_struct("UserName")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Anonymous => write!(f, "anonymous"),
            Self::UserName { username, .. } => write!(f, "user '{username}'"),
        }
    }
}

/// Resolves the identity to present to the server.
///
/// Both credentials non-empty selects a username token regardless of what the
/// endpoint advertises (the server will reject it if unsupported). Otherwise
/// anonymous access is selected only when the endpoint advertises an
/// anonymous token policy; a server requiring authentication with no
/// configured credentials is [`SecurityError::NoUsableIdentity`].
pub fn resolve_identity(
    username: &str,
    password: &str,
    advertised: &[TokenPolicy],
) -> Result<Identity, SecurityError> {
    if !username.is_empty() && !password.is_empty() {
        return Ok(Identity::UserName {
            username: username.to_string(),
            password: password.to_string(),
        });
    }

    if advertised.contains(&TokenPolicy::Anonymous) {
        Ok(Identity::Anonymous)
    } else {
        Err(SecurityError::NoUsableIdentity)
    }
}

// =============================================================================
// CertificateValidator
// =============================================================================

/// Why a server certificate was not accepted.
#[derive(Debug, Clone)]
pub struct CertificateRejection {
    /// Human-readable rejection reason.
    pub reason: String,
}

impl CertificateRejection {
    /// Creates a rejection with the given reason.
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }
}

/// Capability seam for server certificate validation.
///
/// Implementations decide whether to trust a DER-encoded certificate.
/// `auto_accept` carries the operator's configured override; honoring it is
/// up to the implementation.
pub trait CertificateValidator: Send + Sync {
    /// Validates the certificate, or accepts it under the override.
    fn validate_or_accept(
        &self,
        certificate: &[u8],
        auto_accept: bool,
    ) -> Result<(), CertificateRejection>;
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_select_username_token() {
        let identity = resolve_identity("operator", "secret", &[TokenPolicy::Anonymous]).unwrap();
        assert_eq!(
            identity,
            Identity::UserName {
                username: "operator".into(),
                password: "secret".into(),
            }
        );

        // Credentials win even when the endpoint only lists username tokens.
        let identity = resolve_identity("operator", "secret", &[TokenPolicy::UserName]).unwrap();
        assert!(!identity.is_anonymous());
    }

    #[test]
    fn test_anonymous_requires_advertised_policy() {
        let identity =
            resolve_identity("", "", &[TokenPolicy::Anonymous, TokenPolicy::UserName]).unwrap();
        assert!(identity.is_anonymous());
    }

    #[test]
    fn test_no_usable_identity() {
        // No credentials and no anonymous policy.
        let err = resolve_identity("", "", &[TokenPolicy::UserName]).unwrap_err();
        assert!(matches!(err, SecurityError::NoUsableIdentity));

        // A lone username without a password does not count as credentials.
        let err = resolve_identity("operator", "", &[TokenPolicy::UserName]).unwrap_err();
        assert!(matches!(err, SecurityError::NoUsableIdentity));
    }

    #[test]
    fn test_identity_debug_redacts_password() {
        let identity = Identity::UserName {
            username: "operator".into(),
            password: "hunter2".into(),
        };
        let text = format!("{identity:?}");
        assert!(!text.contains("hunter2"));
    }
}
