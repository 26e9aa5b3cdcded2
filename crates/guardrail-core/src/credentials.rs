//! Short-lived, account-scoped credentials and the broker that issues them.

use crate::account::AccountTarget;
use crate::control_plane::ControlPlane;
use crate::error::{GuardrailError, Result};
use crate::retry::{bounded, RetryPolicy};
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use zeroize::{Zeroize, ZeroizeOnDrop};

// ---------------------------------------------------------------------------
// ScopedCredential
// ---------------------------------------------------------------------------

/// Temporary credentials for exactly one account.
///
/// Secret fields are zeroed when the value is dropped. The type is not
/// `Clone`: whoever holds it owns the only copy, and dropping it ends its
/// useful life.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct ScopedCredential {
    #[zeroize(skip)]
    account_id: String,
    access_key: String,
    secret_key: String,
    session_token: String,
    #[zeroize(skip)]
    expires_at: DateTime<Utc>,
}

impl ScopedCredential {
    pub fn new(
        account_id: impl Into<String>,
        access_key: impl Into<String>,
        secret_key: impl Into<String>,
        session_token: impl Into<String>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            account_id: account_id.into(),
            access_key: access_key.into(),
            secret_key: secret_key.into(),
            session_token: session_token.into(),
            expires_at,
        }
    }

    /// The account this credential was issued for.
    pub fn account_id(&self) -> &str {
        &self.account_id
    }

    pub fn access_key(&self) -> &str {
        &self.access_key
    }

    pub fn secret_key(&self) -> &str {
        &self.secret_key
    }

    pub fn session_token(&self) -> &str {
        &self.session_token
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_for(&self, account_id: &str) -> bool {
        self.account_id == account_id
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Fail unless this credential may be used against `account_id`.
    pub fn ensure_for(&self, account_id: &str) -> Result<()> {
        if self.is_for(account_id) {
            Ok(())
        } else {
            Err(GuardrailError::CredentialMismatch {
                issued_for: self.account_id.clone(),
                requested: account_id.to_string(),
            })
        }
    }
}

impl fmt::Debug for ScopedCredential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedCredential")
            .field("account_id", &self.account_id)
            .field("access_key", &"<redacted>")
            .field("secret_key", &"<redacted>")
            .field("session_token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// CredentialBroker
// ---------------------------------------------------------------------------

/// Exchanges an account id + role name for a [`ScopedCredential`].
pub struct CredentialBroker {
    control_plane: Arc<dyn ControlPlane>,
    call_timeout: Duration,
}

impl CredentialBroker {
    pub fn new(control_plane: Arc<dyn ControlPlane>, call_timeout: Duration) -> Self {
        Self {
            control_plane,
            call_timeout,
        }
    }

    /// Assume `role_name` in `account_id` for `ttl`.
    ///
    /// The returned credential is guaranteed to be issued for `account_id`
    /// and to expire strictly after the moment it is returned.
    pub async fn acquire(
        &self,
        account_id: &str,
        role_name: &str,
        ttl: Duration,
    ) -> Result<ScopedCredential> {
        let credential = bounded(
            self.call_timeout,
            "assume-role",
            self.control_plane.assume_role(account_id, role_name, ttl),
        )
        .await?;

        credential.ensure_for(account_id)?;
        if credential.is_expired_at(Utc::now()) {
            return Err(GuardrailError::Transient(format!(
                "credential for account {account_id} expired at {} before use",
                credential.expires_at()
            )));
        }

        tracing::info!(
            account_id,
            role = role_name,
            expires_at = %credential.expires_at(),
            "acquired scoped credential"
        );
        Ok(credential)
    }

    /// [`acquire`](Self::acquire) for a target, retrying transient failures.
    /// Returns the final result and the number of attempts made.
    pub async fn acquire_with_retry(
        &self,
        target: &AccountTarget,
        ttl: Duration,
        policy: &RetryPolicy,
    ) -> (Result<ScopedCredential>, u32) {
        let account_id = target.account_id.as_str();
        let role_name = target.assume_role_name.as_str();
        policy
            .run("assume-role", move || {
                self.acquire(account_id, role_name, ttl)
            })
            .await
    }
}
