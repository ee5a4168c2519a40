//! Server-side authentication procedure.
//!
//! [`Transaction::auth_begin`] walks the Authorization and
//! Proxy-Authorization values of the received request one at a time. For
//! each the owner gets `credentials_found` and answers with
//! [`Transaction::auth_proceed`]: check it against a password, skip it, or
//! end the procedure. `auth_completed` reports the outcome; a failed
//! procedure is usually followed by [`Transaction::respond_unauthenticated`].

use tracing::debug;

use crate::auth::{AuthAction, Challenge, Credentials};
use crate::error::{Error, Result};
use crate::message::Response;
use crate::transaction::{AuthProgress, Transaction};

impl Transaction {
    /// Starts authenticating the received request
    pub fn auth_begin(&self) -> Result<()> {
        let _guard = self.lock.lock();
        let state = self.check_live()?;
        let core = self.core()?;
        if core.authenticator.is_none() {
            return Err(Error::Unsupported("no authenticator configured".to_string()));
        }
        if !state.awaits_final_response() {
            return Err(Error::illegal_state(state, "auth_begin"));
        }
        let headers = self
            .request()
            .map(|request| request.headers.authorization)
            .unwrap_or_default();
        debug!(id = %self.id(), credentials = headers.len(), "authentication started");
        self.inner.lock().auth = Some(AuthProgress { headers, cursor: 0 });
        self.auth_next()
    }

    /// Continues the procedure started by [`Transaction::auth_begin`]
    pub fn auth_proceed(&self, action: AuthAction) -> Result<()> {
        let _guard = self.lock.lock();
        let state = self.check_live()?;
        let Some(current) = self.current_credentials() else {
            return Err(Error::illegal_state(state, "auth_proceed"));
        };

        match action {
            AuthAction::Success => self.auth_finish(true),
            AuthAction::Failure => self.auth_finish(false),
            AuthAction::Skip => {
                self.auth_advance();
                self.auth_next()
            }
            AuthAction::UsePassword(password) => {
                let core = self.core()?;
                let Some(authenticator) = core.authenticator.clone() else {
                    return Err(Error::Unsupported("no authenticator configured".to_string()));
                };
                let method = self.method();
                let verified = current.map(|credentials| {
                    authenticator.is_supported(&credentials)
                        && self
                            .lock
                            .upcall(|| authenticator.verify(&credentials, &method, &password))
                });
                self.ensure_alive()?;
                if verified == Some(true) {
                    self.auth_finish(true)
                } else {
                    self.auth_advance();
                    self.auth_next()
                }
            }
        }
    }

    /// Answers with a 401 or 407 carrying `challenge`
    pub fn respond_unauthenticated(&self, status: u16, mut challenge: Challenge) -> Result<()> {
        if status != 401 && status != 407 {
            return Err(Error::InvalidArgument(format!(
                "{} is not an authentication challenge",
                status
            )));
        }
        let _guard = self.lock.lock();
        let state = self.check_live()?;
        let request = self
            .request()
            .ok_or_else(|| Error::illegal_state(state, "respond_unauthenticated"))?;
        challenge.is_proxy = status == 407;
        let mut response = Response::for_request(&request, status);
        response.headers.challenges.push(challenge);
        self.send_response(response)
    }

    /// `None` outside a procedure, `Some(None)` once the headers ran out
    fn current_credentials(&self) -> Option<Option<Credentials>> {
        let inner = self.inner.lock();
        let progress = inner.auth.as_ref()?;
        Some(progress.headers.get(progress.cursor).cloned())
    }

    fn auth_advance(&self) {
        if let Some(progress) = self.inner.lock().auth.as_mut() {
            progress.cursor += 1;
        }
    }

    fn auth_next(&self) -> Result<()> {
        let Some(Some(credentials)) = self.current_credentials() else {
            return self.auth_finish(false);
        };
        let core = self.core()?;
        let supported = core
            .authenticator
            .as_ref()
            .is_some_and(|authenticator| authenticator.is_supported(&credentials));
        self.notify_credentials_found(&credentials, supported)
    }

    fn auth_finish(&self, success: bool) -> Result<()> {
        if self.inner.lock().auth.take().is_none() {
            return Ok(());
        }
        debug!(id = %self.id(), success, "authentication completed");
        self.notify_auth_completed(success)
    }
}
