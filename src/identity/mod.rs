//! Tenant and resource identity: resolution, ownership and quota enforcement.

use std::sync::Arc;

use crate::database::store::DocumentStore;

pub mod error;
pub mod gateway;
pub mod migration;
pub mod normalizer;
pub mod ownership;
pub mod plans;
pub mod quota;
pub mod resolver;
pub mod service;

/// Store handle shared by every identity component
pub type SharedStore = Arc<dyn DocumentStore>;

pub use error::{IdentityError, Outcome};
pub use gateway::{Applied, MutationGateway, WritePath};
pub use migration::{MigrationReport, OwnerMigration};
pub use normalizer::{normalize, normalize_name, CandidateKey, CandidateKeys};
pub use ownership::{OwnerRef, OwnershipVerifier};
pub use plans::{CatalogError, Limit, PlanCatalog, QuotaPolicy, ResolvedPlan};
pub use quota::QuotaEnforcer;
pub use resolver::{EntityResolver, MatchedBy, Resolution, Resolved, StorageInconsistency};
pub use service::{Actor, IdentityService, NewResource, NewTenant, PurgeReport};
