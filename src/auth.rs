//! `AuthCoordinator`: credential cache, auto-login trigger, and the
//! login-in-progress guard.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Mutex,
};

/// A cached login credential.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub scheme: String,
    pub secret: String,
}

/// Tracks the credential cache, the auto-login flag, and the
/// login-in-progress guard.
pub struct AuthCoordinator {
    credentials: Mutex<Option<Credentials>>,
    auto_login: AtomicBool,
    login_in_progress: AtomicBool,
}

impl AuthCoordinator {
    #[must_use]
    pub fn new() -> Self {
        Self {
            credentials: Mutex::new(None),
            auto_login: AtomicBool::new(false),
            login_in_progress: AtomicBool::new(false),
        }
    }

    /// Stores `(scheme=token, secret=token)` and enables auto-login.
    pub fn set_auto_login_with_token(&self, token: impl Into<String>) {
        let token = token.into();
        self.set_credentials(Credentials {
            scheme: "token".into(),
            secret: token,
        });
    }

    /// Caches arbitrary scheme/secret credentials and enables auto-login.
    pub fn set_credentials(&self, credentials: Credentials) {
        *self.credentials.lock().unwrap_or_else(|p| p.into_inner()) = Some(credentials);
        self.auto_login.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn credentials(&self) -> Option<Credentials> {
        self.credentials
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    #[must_use]
    pub fn auto_login_enabled(&self) -> bool {
        self.auto_login.load(Ordering::SeqCst)
    }

    #[must_use]
    pub fn login_in_progress(&self) -> bool {
        self.login_in_progress.load(Ordering::SeqCst)
    }

    /// Whether a fresh connection should chain a login after hello:
    /// auto-login is on, credentials are cached, and no login is already
    /// in progress.
    #[must_use]
    pub fn should_chain_login(&self) -> bool {
        self.auto_login_enabled() && self.credentials().is_some() && !self.login_in_progress()
    }

    /// Attempts to acquire the login-in-progress guard. Returns `false` if
    /// a login is already underway.
    #[must_use]
    pub fn try_begin_login(&self) -> bool {
        self.login_in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }

    /// Releases the login-in-progress guard once the login request
    /// settles, success or failure.
    pub fn end_login(&self) {
        self.login_in_progress.store(false, Ordering::SeqCst);
    }

    /// Drops cached credentials and disables auto-login. Used on auth
    /// failures in `[400, 500)` and on `logout()`.
    pub fn clear(&self) {
        *self.credentials.lock().unwrap_or_else(|p| p.into_inner()) = None;
        self.auto_login.store(false, Ordering::SeqCst);
    }
}

impl Default for AuthCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_login_enables_auto_login_and_chains() {
        let auth = AuthCoordinator::new();
        assert!(!auth.should_chain_login());
        auth.set_auto_login_with_token("T");
        assert!(auth.auto_login_enabled());
        assert!(auth.should_chain_login());
        assert_eq!(auth.credentials().unwrap().scheme, "token");
    }

    #[test]
    fn login_in_progress_blocks_chaining_and_reacquiring() {
        let auth = AuthCoordinator::new();
        auth.set_auto_login_with_token("T");
        assert!(auth.try_begin_login());
        assert!(!auth.try_begin_login());
        assert!(!auth.should_chain_login());
        auth.end_login();
        assert!(auth.should_chain_login());
        assert!(auth.try_begin_login());
    }

    #[test]
    fn clear_drops_credentials_and_disables_auto_login() {
        let auth = AuthCoordinator::new();
        auth.set_auto_login_with_token("T");
        auth.clear();
        assert!(!auth.auto_login_enabled());
        assert!(auth.credentials().is_none());
        assert!(!auth.should_chain_login());
    }
}
