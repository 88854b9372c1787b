//! Service layer for the NoETL Control Plane.
//!
//! Services encapsulate business logic and coordinate
//! between handlers and database queries.

pub mod auth;
pub mod catalog;
pub mod credential;
pub mod event;
pub mod execution;
pub mod keychain;
pub mod orchestration;
pub mod queue;
pub mod runtime;

pub use auth::AuthService;
pub use catalog::CatalogService;
pub use credential::CredentialService;
pub use event::EventService;
pub use execution::ExecutionService;
pub use keychain::KeychainService;
pub use orchestration::OrchestrationService;
pub use queue::QueueService;
pub use runtime::RuntimeService;
