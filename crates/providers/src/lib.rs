//! LLM provider adapters.
//!
//! Three wire shapes (anthropic, openai, google) translate to and from the
//! normalized [`bc_domain::ProviderResponse`]; the agent loop never touches
//! provider-specific JSON. The registry resolves model names through the
//! catalog and caches one client per provider.

pub mod anthropic;
pub mod catalog;
pub mod google;
pub mod mock;
pub mod openai;
pub mod registry;
pub mod retry;
pub mod traits;

pub use catalog::{ApiShape, ModelCatalog, ResolvedModel};
pub use mock::MockProvider;
pub use registry::ProviderRegistry;
pub use retry::{classify_http_error, with_retries};
pub use traits::{ChatRequest, Provider};
