//! Identity provider port.

use crate::error::{IdentityError, IdentityResult};
use crate::observer::{ObserverHandle, ObserverList};
use async_trait::async_trait;
use packsync_model::{Identity, IdentityState};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Callback invoked with every identity state change.
pub type IdentityCallback = Box<dyn Fn(&IdentityState) + Send + Sync>;

/// Source of the current authenticated identity.
///
/// This trait abstracts the authentication backend, allowing for different
/// implementations (OAuth popup, redirect flow, mock for testing, etc.).
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Starts a sign-in.
    ///
    /// Returns `Ok(None)` when the flow completes later (a redirect) or was
    /// abandoned; the result then arrives through the identity callback.
    async fn sign_in(&self) -> IdentityResult<Option<Identity>>;

    /// Signs the current identity out.
    async fn sign_out(&self) -> IdentityResult<()>;

    /// Returns the current identity state.
    fn current(&self) -> IdentityState;

    /// Registers a callback for identity changes. The callback is invoked
    /// immediately with the current state, then on every change.
    fn on_identity_changed(&self, callback: IdentityCallback) -> ObserverHandle;
}

/// What the next `sign_in` call does.
#[derive(Debug, Clone)]
enum SignInScript {
    Succeed(Identity),
    Defer,
    Fail(String),
}

/// An identity provider driven entirely by the caller, for tests and demos.
#[derive(Debug)]
pub struct InMemoryIdentityProvider {
    state: RwLock<IdentityState>,
    observers: ObserverList<IdentityState>,
    next_sign_in: Mutex<SignInScript>,
    fail_sign_out: AtomicBool,
    sign_in_calls: AtomicUsize,
}

impl InMemoryIdentityProvider {
    fn with_state(state: IdentityState) -> Self {
        Self {
            state: RwLock::new(state),
            observers: ObserverList::new(),
            next_sign_in: Mutex::new(SignInScript::Fail("sign-in cancelled".into())),
            fail_sign_out: AtomicBool::new(false),
            sign_in_calls: AtomicUsize::new(0),
        }
    }

    /// Creates a provider with nobody signed in.
    pub fn signed_out() -> Self {
        Self::with_state(IdentityState::signed_out())
    }

    /// Creates a provider with `identity` already signed in.
    pub fn signed_in(identity: Identity) -> Self {
        let provider = Self::with_state(IdentityState::signed_in(identity.clone()));
        provider.script_sign_in(identity);
        provider
    }

    /// Makes subsequent `sign_in` calls succeed with `identity`.
    pub fn script_sign_in(&self, identity: Identity) {
        *self.next_sign_in.lock() = SignInScript::Succeed(identity);
    }

    /// Makes subsequent `sign_in` calls complete without an identity.
    pub fn defer_sign_in(&self) {
        *self.next_sign_in.lock() = SignInScript::Defer;
    }

    /// Makes subsequent `sign_in` calls fail with `message`.
    pub fn fail_sign_in(&self, message: impl Into<String>) {
        *self.next_sign_in.lock() = SignInScript::Fail(message.into());
    }

    /// Makes `sign_out` fail.
    pub fn set_fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of `sign_in` calls so far.
    pub fn sign_in_calls(&self) -> usize {
        self.sign_in_calls.load(Ordering::SeqCst)
    }

    /// Pushes a state change as if it came from the backend
    /// (token expiry, sign-out in another tab).
    pub fn emit(&self, state: IdentityState) {
        *self.state.write() = state.clone();
        self.observers.notify(&state);
    }

    /// Replaces the signed-in identity without a sign-out in between.
    pub fn switch_user(&self, identity: Identity) {
        self.emit(IdentityState::signed_in(identity));
    }

    /// Returns the number of registered callbacks.
    pub fn listener_count(&self) -> usize {
        self.observers.len()
    }
}

#[async_trait]
impl IdentityProvider for InMemoryIdentityProvider {
    async fn sign_in(&self) -> IdentityResult<Option<Identity>> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);

        let previous = self.current();
        self.emit(IdentityState {
            is_loading: true,
            ..previous.clone()
        });

        let script = self.next_sign_in.lock().clone();
        match script {
            SignInScript::Succeed(identity) => {
                self.emit(IdentityState::signed_in(identity.clone()));
                Ok(Some(identity))
            }
            SignInScript::Defer => {
                self.emit(IdentityState {
                    is_loading: false,
                    ..previous
                });
                Ok(None)
            }
            SignInScript::Fail(message) => {
                self.emit(IdentityState {
                    is_loading: false,
                    ..previous
                });
                Err(IdentityError::Provider(message))
            }
        }
    }

    async fn sign_out(&self) -> IdentityResult<()> {
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(IdentityError::Provider("sign-out failed".into()));
        }
        self.emit(IdentityState::signed_out());
        Ok(())
    }

    fn current(&self) -> IdentityState {
        self.state.read().clone()
    }

    fn on_identity_changed(&self, callback: IdentityCallback) -> ObserverHandle {
        let current = self.current();
        callback(&current);
        self.observers.register(callback)
    }
}
