//! Provider gateway and model routing.
//!
//! Three public model identifiers map onto three provider bindings. Callers
//! go through [`ProviderGateway`], which picks the binding, enforces its
//! parameter contract and reports each call to a [`CallLog`].
//!
//! ```ignore
//! use archforge::llm::{ModelId, ProviderGateway, ProviderRequest, SamplingParams};
//!
//! let gateway = ProviderGateway::from_config(&config)?;
//! let completion = gateway
//!     .invoke(
//!         ProviderRequest::new(ModelId::Claude45Sonnet, "Summarise this")
//!             .with_system("You are terse")
//!             .with_sampling(SamplingParams::new().with_max_tokens(500)),
//!     )
//!     .await?;
//! println!("{}", completion.text);
//! ```

pub mod call_log;
pub mod gateway;
pub mod model;
pub mod providers;
pub mod router;

pub use call_log::{CallLog, CallNote, StoreCallLog, TracingCallLog};
pub use gateway::{Completion, ProviderGateway, ProviderRequest, SamplingParams, TextProvider};
pub use model::{ModelId, ProviderKind};
pub use router::{choose_model, flatten_conversation, ChatMessage};
