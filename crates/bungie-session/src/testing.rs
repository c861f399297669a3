//! Scripted token provider for tests

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use bungie_auth::{
    AuthorizationError, Error, Grant, Result, SYSTEM_DISABLED, TokenProvider, TokenResponse,
};

#[derive(Debug, Clone, Copy)]
pub enum Script {
    Succeed,
    Reject,
    Outage,
    Transport,
}

/// Counts calls and answers every grant according to its script. Successful
/// responses number their tokens (`at_1`, `rt_1`, ...) by call count.
pub struct MockProvider {
    script: Script,
    delay: Option<Duration>,
    calls: AtomicUsize,
    grants: Mutex<Vec<(&'static str, String)>>,
}

impl MockProvider {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            delay: None,
            calls: AtomicUsize::new(0),
            grants: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding() -> Self {
        Self::new(Script::Succeed)
    }

    pub fn rejecting() -> Self {
        Self::new(Script::Reject)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// `(grant_type, value)` of every call so far.
    pub fn grants(&self) -> Vec<(&'static str, String)> {
        self.grants.lock().unwrap().clone()
    }
}

impl TokenProvider for MockProvider {
    fn exchange_token<'a>(
        &'a self,
        grant: Grant<'a>,
    ) -> Pin<Box<dyn Future<Output = Result<TokenResponse>> + Send + 'a>> {
        Box::pin(async move {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            let value = match grant {
                Grant::AuthorizationCode(v) | Grant::RefreshToken(v) => v.to_owned(),
            };
            self.grants.lock().unwrap().push((grant.grant_type(), value));
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            match self.script {
                Script::Succeed => Ok(TokenResponse {
                    access_token: format!("at_{n}"),
                    token_type: "Bearer".into(),
                    expires_in: 3600,
                    refresh_token: format!("rt_{n}"),
                    refresh_expires_in: Some(7_776_000),
                    membership_id: "42".into(),
                }),
                Script::Reject => Err(Error::Authorization(AuthorizationError::new(
                    "invalid_grant",
                    "AuthorizationRecordRevoked",
                ))),
                Script::Outage => Err(Error::Authorization(AuthorizationError::new(
                    "server_error",
                    SYSTEM_DISABLED,
                ))),
                Script::Transport => Err(Error::Transport("connection reset".into())),
            }
        })
    }
}
