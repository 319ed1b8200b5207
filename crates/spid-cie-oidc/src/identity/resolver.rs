//! Links a verified identity to a local account.
//!
//! Accounts are matched by provider subject and by fiscal code. Ambiguous or
//! contradictory matches are refused instead of guessed.

use std::sync::Arc;

use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use super::directory::{IdentityUpdate, NewUser, UserDirectory, UserRecord};
use super::mapper::{NormalizedIdentity, is_valid_email};
use crate::OidcResult;
use crate::config::UsersConfig;
use crate::error::OidcError;

/// Matches fetched per lookup key; more than one is already a conflict.
const LOOKUP_LIMIT: usize = 3;

/// Hex characters of the subject hash used in generated usernames.
const USERNAME_HASH_LEN: usize = 12;

/// Resolves or provisions the local account for an identity.
#[derive(Clone)]
pub struct IdentityResolver {
    directory: Arc<dyn UserDirectory>,
    config: UsersConfig,
}

impl IdentityResolver {
    #[must_use]
    pub fn new(directory: Arc<dyn UserDirectory>, config: UsersConfig) -> Self {
        Self { directory, config }
    }

    /// Returns the account for `identity`, creating it when allowed, and
    /// refreshes its identity attributes.
    ///
    /// # Errors
    ///
    /// - `IdentityConflict` on ambiguous or contradictory matches
    /// - `UserNotFound` if nothing matches and provisioning is off
    /// - `InvalidEmail`, `UserProvisioningFailed` while provisioning
    /// - `Directory` if a lookup or the attribute update fails
    pub async fn resolve_or_provision(
        &self,
        identity: &NormalizedIdentity,
        last_acr: &str,
        correlation_id: &str,
    ) -> OidcResult<UserRecord> {
        let provider = identity.provider;

        let by_sub = self
            .directory
            .find_by_provider_sub(provider, &identity.sub, LOOKUP_LIMIT)
            .await
            .map_err(|e| OidcError::Directory(e.to_string()))?;
        let by_fiscal = self
            .directory
            .find_by_fiscal_code(&identity.fiscal_code, LOOKUP_LIMIT)
            .await
            .map_err(|e| OidcError::Directory(e.to_string()))?;

        if by_sub.len() > 1 {
            tracing::error!(correlation_id, %provider, "OIDC identity conflict on provider sub");
            return Err(OidcError::IdentityConflict("provider_sub".to_string()));
        }
        if by_fiscal.len() > 1 {
            tracing::error!(correlation_id, %provider, "OIDC identity conflict on fiscal code");
            return Err(OidcError::IdentityConflict("fiscal_code".to_string()));
        }

        let user = match (by_sub.into_iter().next(), by_fiscal.into_iter().next()) {
            (Some(from_sub), Some(from_fiscal)) if from_sub.id != from_fiscal.id => {
                tracing::error!(
                    correlation_id,
                    %provider,
                    sub_user_id = from_sub.id,
                    fiscal_user_id = from_fiscal.id,
                    "OIDC identity conflict sub vs fiscal"
                );
                return Err(OidcError::IdentityConflict("sub_vs_fiscal".to_string()));
            }
            (Some(user), _) | (None, Some(user)) => user,
            (None, None) => {
                if !self.config.auto_provisioning {
                    tracing::error!(
                        correlation_id,
                        %provider,
                        "OIDC user not found and auto provisioning disabled"
                    );
                    return Err(OidcError::UserNotFound);
                }
                self.provision(identity, correlation_id).await?
            }
        };

        self.directory
            .update_identity(
                user.id,
                IdentityUpdate {
                    provider,
                    sub: identity.sub.clone(),
                    fiscal_code: identity.fiscal_code.to_uppercase(),
                    mobile: identity.mobile.clone(),
                    last_login_ts: OffsetDateTime::now_utc().unix_timestamp(),
                    last_acr: last_acr.trim().to_string(),
                },
            )
            .await
            .map_err(|e| OidcError::Directory(e.to_string()))?;

        Ok(user)
    }

    async fn provision(
        &self,
        identity: &NormalizedIdentity,
        correlation_id: &str,
    ) -> OidcResult<UserRecord> {
        let provider = identity.provider;
        let base = username_base(identity);
        let mut username = base.clone();
        let mut suffix = 1u32;
        while self
            .directory
            .username_exists(&username)
            .await
            .map_err(|e| OidcError::Directory(e.to_string()))?
        {
            username = format!("{base}_{suffix}");
            suffix += 1;
        }

        if !is_valid_email(&identity.email) {
            return Err(OidcError::InvalidEmail);
        }

        let user = self
            .directory
            .create_user(NewUser {
                username,
                email: identity.email.clone(),
                first_name: identity.given_name.clone(),
                last_name: identity.family_name.clone(),
                display_name: identity.display_name(),
                role: self.config.default_role.clone(),
            })
            .await
            .map_err(|e| {
                tracing::error!(correlation_id, %provider, error = %e, "OIDC user provisioning failed");
                OidcError::UserProvisioningFailed(e.to_string())
            })?;

        tracing::info!(correlation_id, %provider, user_id = user.id, "OIDC user auto-provisioned");
        Ok(user)
    }
}

/// `{provider}_{first 12 hex chars of sha256(sub)}`.
fn username_base(identity: &NormalizedIdentity) -> String {
    let digest = hex::encode(Sha256::digest(identity.sub.as_bytes()));
    format!("{}_{}", identity.provider, &digest[..USERNAME_HASH_LEN])
}
