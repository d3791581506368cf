//! Identity value types.

use serde::{Deserialize, Serialize};

/// An authenticated user, as reported by the identity provider.
///
/// Only `id` matters to synchronization: it partitions remote storage and
/// triggers mode transitions. The other fields are carried for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    /// Stable user id.
    pub id: String,
    /// Display name.
    pub display_name: Option<String>,
    /// Email address.
    pub email: Option<String>,
    /// Avatar URL.
    pub photo_url: Option<String>,
}

impl Identity {
    /// Creates an identity with only an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
            email: None,
            photo_url: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }

    /// Sets the email address.
    #[must_use]
    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// Authentication state as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdentityState {
    /// Current identity, if any.
    pub identity: Option<Identity>,
    /// Whether a sign-in or sign-out is in flight.
    pub is_loading: bool,
    /// Whether `identity` is authenticated.
    pub is_authenticated: bool,
}

impl IdentityState {
    /// State with no identity, not loading.
    pub fn signed_out() -> Self {
        Self::default()
    }

    /// State while the provider has not reported yet.
    pub fn loading() -> Self {
        Self {
            identity: None,
            is_loading: true,
            is_authenticated: false,
        }
    }

    /// Authenticated state for `identity`.
    pub fn signed_in(identity: Identity) -> Self {
        Self {
            identity: Some(identity),
            is_loading: false,
            is_authenticated: true,
        }
    }

    /// Id of the authenticated identity.
    pub fn identity_id(&self) -> Option<&str> {
        if self.is_authenticated {
            self.identity.as_ref().map(|i| i.id.as_str())
        } else {
            None
        }
    }

    /// Returns true if cloud operations are allowed: authenticated and not loading.
    pub fn can_sync(&self) -> bool {
        self.is_authenticated && !self.is_loading && self.identity.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn can_sync_requires_idle_authentication() {
        assert!(!IdentityState::signed_out().can_sync());
        assert!(!IdentityState::loading().can_sync());

        let mut state = IdentityState::signed_in(Identity::new("u1"));
        assert!(state.can_sync());
        assert_eq!(state.identity_id(), Some("u1"));

        state.is_loading = true;
        assert!(!state.can_sync());
    }

    #[test]
    fn identity_id_hidden_when_unauthenticated() {
        let state = IdentityState {
            identity: Some(Identity::new("u1")),
            is_loading: false,
            is_authenticated: false,
        };
        assert_eq!(state.identity_id(), None);
    }
}
