use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use parking_lot::{Mutex, RwLock};

use crate::api::{CurrentUser, TokenProvider};
use crate::data::AccountService;
use crate::storage;

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("not signed in")]
    NotSignedIn,
    #[error("verification code was already sent; wait {0:?} before resending")]
    CooldownActive(Duration),
    #[error("password must be at least 8 characters with a letter and a digit")]
    WeakPassword,
    #[error("confirmation text does not match the account username")]
    ConfirmationMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerificationFlow {
    PasswordChange,
    AccountDeletion,
}

#[derive(Clone)]
pub struct Session {
    pub token: String,
    pub user: CurrentUser,
}

/// Owns the signed-in session: token, cached current user, and the
/// request/verify/commit flows for password change and account deletion.
/// Verification codes can be re-sent only after a cooldown lapses; the
/// resend is always user-initiated, never automatic.
pub struct Manager {
    store: Arc<storage::Store>,
    service: Arc<dyn AccountService>,
    active: RwLock<Option<Session>>,
    cooldowns: Mutex<HashMap<VerificationFlow, Instant>>,
    resend_cooldown: Duration,
}

impl Manager {
    pub fn new(
        store: Arc<storage::Store>,
        service: Arc<dyn AccountService>,
        resend_cooldown: Duration,
    ) -> Self {
        Self {
            store,
            service,
            active: RwLock::new(None),
            cooldowns: Mutex::new(HashMap::new()),
            resend_cooldown,
        }
    }

    /// Restores the persisted session, if any.
    pub fn load_existing(&self) -> Result<()> {
        if let Some(stored) = self.store.load_session()? {
            *self.active.write() = Some(Session {
                token: stored.token,
                user: stored.user,
            });
        }
        Ok(())
    }

    pub fn active(&self) -> Option<Session> {
        self.active.read().clone()
    }

    pub fn is_authenticated(&self) -> bool {
        self.active.read().is_some()
    }

    pub fn login(&self, username: &str, password: &str) -> Result<Session> {
        let response = self.service.login(username, password).context("sign in")?;
        self.store.save_session(&response.token, &response.user)?;
        let session = Session {
            token: response.token,
            user: response.user,
        };
        *self.active.write() = Some(session.clone());
        Ok(session)
    }

    pub fn logout(&self) -> Result<()> {
        if self.is_authenticated() {
            self.service.logout().context("sign out")?;
        }
        self.store.clear_session()?;
        *self.active.write() = None;
        self.cooldowns.lock().clear();
        Ok(())
    }

    /// Re-fetches the current user and refreshes the local cache.
    pub fn refresh_current_user(&self) -> Result<CurrentUser> {
        self.require_session()?;
        let user = self.service.current_user().context("refresh profile")?;
        self.store.save_current_user(&user)?;
        if let Some(session) = self.active.write().as_mut() {
            session.user = user.clone();
        }
        Ok(user)
    }

    pub fn cooldown_remaining(&self, flow: VerificationFlow) -> Option<Duration> {
        let cooldowns = self.cooldowns.lock();
        let expires = cooldowns.get(&flow)?;
        let now = Instant::now();
        if now < *expires {
            Some(*expires - now)
        } else {
            None
        }
    }

    pub fn begin_password_change(&self) -> Result<()> {
        self.require_session()?;
        self.send_code(VerificationFlow::PasswordChange)
    }

    pub fn resend_password_change_code(&self) -> Result<()> {
        self.require_session()?;
        self.send_code(VerificationFlow::PasswordChange)
    }

    pub fn verify_password_change(&self, code: &str) -> Result<()> {
        self.require_session()?;
        self.service
            .verify_password_change(code)
            .context("verify password change code")
    }

    pub fn commit_password_change(&self, new_password: &str) -> Result<()> {
        self.require_session()?;
        if !password_is_strong(new_password) {
            return Err(SessionError::WeakPassword.into());
        }
        self.service
            .commit_password_change(new_password)
            .context("commit password change")?;
        self.cooldowns
            .lock()
            .remove(&VerificationFlow::PasswordChange);
        Ok(())
    }

    pub fn begin_deletion(&self) -> Result<()> {
        self.require_session()?;
        self.send_code(VerificationFlow::AccountDeletion)
    }

    pub fn resend_deletion_code(&self) -> Result<()> {
        self.require_session()?;
        self.send_code(VerificationFlow::AccountDeletion)
    }

    pub fn verify_deletion(&self, code: &str) -> Result<()> {
        self.require_session()?;
        self.service
            .verify_deletion(code)
            .context("verify deletion code")
    }

    /// Deleting the account is terminal: the user re-types their username
    /// to confirm, and on success the local session is wiped.
    pub fn commit_deletion(&self, confirmation: &str) -> Result<()> {
        let session = self.require_session()?;
        if confirmation != session.user.username {
            return Err(SessionError::ConfirmationMismatch.into());
        }
        self.service.commit_deletion().context("delete account")?;
        self.store.clear_session()?;
        *self.active.write() = None;
        self.cooldowns.lock().clear();
        Ok(())
    }

    fn send_code(&self, flow: VerificationFlow) -> Result<()> {
        if let Some(remaining) = self.cooldown_remaining(flow) {
            return Err(SessionError::CooldownActive(remaining).into());
        }
        match flow {
            VerificationFlow::PasswordChange => self
                .service
                .request_password_change()
                .context("request password change code")?,
            VerificationFlow::AccountDeletion => self
                .service
                .request_deletion()
                .context("request deletion code")?,
        }
        self.cooldowns
            .lock()
            .insert(flow, Instant::now() + self.resend_cooldown);
        Ok(())
    }

    fn require_session(&self) -> Result<Session> {
        self.active
            .read()
            .clone()
            .ok_or_else(|| SessionError::NotSignedIn.into())
    }
}

impl TokenProvider for Manager {
    fn token(&self) -> Option<String> {
        self.active.read().as_ref().map(|session| session.token.clone())
    }
}

fn password_is_strong(password: &str) -> bool {
    password.chars().count() >= 8
        && password.chars().any(|c| c.is_alphabetic())
        && password.chars().any(|c| c.is_ascii_digit())
}
