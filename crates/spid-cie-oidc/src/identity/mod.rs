//! From verified claims to a local account.
//!
//! - [`mapper`] - Claim aliases, sanitization and mandatory attributes
//! - [`directory`] - Account storage abstraction
//! - [`resolver`] - Account matching and auto-provisioning

pub mod directory;
pub mod mapper;
pub mod resolver;

pub use directory::{
    DirectoryError, IdentityUpdate, InMemoryUserDirectory, NewUser, UserDirectory, UserRecord,
    provider_sub_attribute,
};
pub use mapper::{IdentityMapper, NormalizedIdentity, is_valid_email};
pub use resolver::IdentityResolver;
