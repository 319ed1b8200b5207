//! SPID and CIE provider resolution.
//!
//! - [`discovery`] - OpenID Connect discovery with an SSRF guard
//! - [`profile`] - Provider profile trait and resolved configuration
//! - [`spid`] - SPID profile with IdP catalog selection
//! - [`cie`] - CIE profile
//! - [`registry`] - Provider lookup and enablement policy

pub mod cie;
pub mod discovery;
pub mod profile;
pub mod registry;
pub mod spid;

pub use cie::CieProfile;
pub use discovery::{DiscoveryConfig, DiscoveryResolver, ProviderMetadata, build_discovery_url};
pub use profile::{ProviderConfig, ProviderKind, ProviderProfile};
pub use registry::ProviderRegistry;
pub use spid::SpidProfile;
