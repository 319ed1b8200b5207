//! Local account storage seen by the identity resolver.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::provider::ProviderKind;

pub const ATTR_PROVIDER: &str = "spidcie_provider";
pub const ATTR_SUB_SPID: &str = "spidcie_sub_spid";
pub const ATTR_SUB_CIE: &str = "spidcie_sub_cie";
pub const ATTR_FISCAL_CODE: &str = "spidcie_fiscal_code";
pub const ATTR_MOBILE: &str = "spidcie_mobile";
pub const ATTR_LAST_LOGIN_TS: &str = "spidcie_last_login_ts";
pub const ATTR_LAST_ACR: &str = "spidcie_last_acr";

/// Attribute holding the subject issued by `provider`.
#[must_use]
pub fn provider_sub_attribute(provider: ProviderKind) -> &'static str {
    match provider {
        ProviderKind::Spid => ATTR_SUB_SPID,
        ProviderKind::Cie => ATTR_SUB_CIE,
    }
}

/// A local account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: u64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub role: String,
    pub attributes: HashMap<String, String>,
}

/// Account to create on first login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub role: String,
}

/// Identity attributes refreshed after every successful login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityUpdate {
    pub provider: ProviderKind,
    pub sub: String,
    pub fiscal_code: String,
    pub mobile: String,
    pub last_login_ts: i64,
    pub last_acr: String,
}

impl IdentityUpdate {
    /// The update as attribute key/value pairs.
    #[must_use]
    pub fn attributes(&self) -> Vec<(&'static str, String)> {
        vec![
            (ATTR_PROVIDER, self.provider.to_string()),
            (provider_sub_attribute(self.provider), self.sub.clone()),
            (ATTR_FISCAL_CODE, self.fiscal_code.to_uppercase()),
            (ATTR_MOBILE, self.mobile.clone()),
            (ATTR_LAST_LOGIN_TS, self.last_login_ts.to_string()),
            (ATTR_LAST_ACR, self.last_acr.clone()),
        ]
    }
}

/// Errors raised by a user directory.
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Username already taken: {0}")]
    UsernameTaken(String),

    #[error("User {0} not found")]
    NotFound(u64),

    #[error("Directory backend error: {0}")]
    Backend(String),
}

/// Account lookup and provisioning backend.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Accounts whose provider-specific subject equals `sub`, at most `limit`.
    async fn find_by_provider_sub(
        &self,
        provider: ProviderKind,
        sub: &str,
        limit: usize,
    ) -> Result<Vec<UserRecord>, DirectoryError>;

    /// Accounts with the given (uppercase) fiscal code, at most `limit`.
    async fn find_by_fiscal_code(
        &self,
        fiscal_code: &str,
        limit: usize,
    ) -> Result<Vec<UserRecord>, DirectoryError>;

    async fn username_exists(&self, username: &str) -> Result<bool, DirectoryError>;

    async fn create_user(&self, user: NewUser) -> Result<UserRecord, DirectoryError>;

    async fn update_identity(
        &self,
        user_id: u64,
        update: IdentityUpdate,
    ) -> Result<(), DirectoryError>;
}

/// In-process [`UserDirectory`] for tests and the development server.
#[derive(Debug, Default)]
pub struct InMemoryUserDirectory {
    users: DashMap<u64, UserRecord>,
    next_id: AtomicU64,
}

impl InMemoryUserDirectory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an existing account with preset attributes.
    pub fn insert(
        &self,
        username: &str,
        email: &str,
        attributes: impl IntoIterator<Item = (&'static str, String)>,
    ) -> UserRecord {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = UserRecord {
            id,
            username: username.to_string(),
            email: email.to_string(),
            first_name: String::new(),
            last_name: String::new(),
            display_name: username.to_string(),
            role: "subscriber".to_string(),
            attributes: attributes
                .into_iter()
                .map(|(k, v)| (k.to_string(), v))
                .collect(),
        };
        self.users.insert(id, record.clone());
        record
    }

    #[must_use]
    pub fn get(&self, user_id: u64) -> Option<UserRecord> {
        self.users.get(&user_id).map(|u| u.clone())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    fn find_by_attribute(&self, attribute: &str, value: &str, limit: usize) -> Vec<UserRecord> {
        if value.is_empty() {
            return Vec::new();
        }
        let mut found: Vec<UserRecord> = self
            .users
            .iter()
            .filter(|u| u.attributes.get(attribute).map(String::as_str) == Some(value))
            .map(|u| u.clone())
            .collect();
        found.sort_by_key(|u| u.id);
        found.truncate(limit);
        found
    }
}

#[async_trait]
impl UserDirectory for InMemoryUserDirectory {
    async fn find_by_provider_sub(
        &self,
        provider: ProviderKind,
        sub: &str,
        limit: usize,
    ) -> Result<Vec<UserRecord>, DirectoryError> {
        Ok(self.find_by_attribute(provider_sub_attribute(provider), sub, limit))
    }

    async fn find_by_fiscal_code(
        &self,
        fiscal_code: &str,
        limit: usize,
    ) -> Result<Vec<UserRecord>, DirectoryError> {
        Ok(self.find_by_attribute(ATTR_FISCAL_CODE, fiscal_code, limit))
    }

    async fn username_exists(&self, username: &str) -> Result<bool, DirectoryError> {
        Ok(self.users.iter().any(|u| u.username == username))
    }

    async fn create_user(&self, user: NewUser) -> Result<UserRecord, DirectoryError> {
        if self.username_exists(&user.username).await? {
            return Err(DirectoryError::UsernameTaken(user.username));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = UserRecord {
            id,
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            display_name: user.display_name,
            role: user.role,
            attributes: HashMap::new(),
        };
        self.users.insert(id, record.clone());
        Ok(record)
    }

    async fn update_identity(
        &self,
        user_id: u64,
        update: IdentityUpdate,
    ) -> Result<(), DirectoryError> {
        let mut user = self
            .users
            .get_mut(&user_id)
            .ok_or(DirectoryError::NotFound(user_id))?;
        for (key, value) in update.attributes() {
            user.attributes.insert(key.to_string(), value);
        }
        Ok(())
    }
}
