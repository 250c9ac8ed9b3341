//! HTTP surface.
//!
//! | Method/Path | Operation | Auth |
//! |---|---|---|
//! | `POST /runs` | Submit a run; answers once the pipeline finishes | none |
//! | `GET /runs/{id}` | Run with its lanes | none |
//! | `POST /jobs` | Enqueue a job | bearer |
//! | `POST /jobs/execute` | Claim and execute one owned job | bearer |
//! | `GET /jobs/{id}` | Job status | bearer |
//! | `POST /jobs/dispatch` | Heal, claim next, execute | `x-internal-key` |
//! | `POST /ai/dispatch` | Direct model call | none |
//! | `POST /llm/route` | Routed chat call | none |
//! | `GET /metrics`, `GET /health` | ops | none |

pub mod auth;
pub mod cors;
pub mod error;
pub mod handlers;
pub mod server;

pub use auth::{CallerIdentity, IdentityResolver, StaticTokenResolver};
pub use cors::cors_allow_origin;
pub use error::ApiError;
pub use server::{router, serve, serve_with_shutdown, ApiState};
