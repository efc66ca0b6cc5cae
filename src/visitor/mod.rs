//! Visitor geolocation subsystem.
//!
//! Queries third-party IP geolocation providers in priority order, normalizes
//! their response schemas, and picks the most complete answer.

pub mod providers;
pub mod resolver;
pub mod types;

pub use providers::{default_providers, normalize, FieldMap, HttpSource, ProviderDescriptor, ProviderSource};
pub use resolver::{select_best, ResolverConfig, VisitorInfoResolver};
pub use types::{FanOut, ProviderUnavailable, VisitorInfo, UNKNOWN};
