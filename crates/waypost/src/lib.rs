//! Attribution and deep-linking SDK core.
//!
//! [`Sdk`] sequences every public call through one FIFO queue, gates calls on
//! the outcome of [`Sdk::initialize`] and keeps the session record in a
//! two-scope [`SessionStore`](waypost_store::SessionStore).

pub mod config;
pub mod data;
pub mod environment;
pub mod errors;
pub mod events;
pub mod links;
pub mod registry;
pub mod sequencer;
pub mod session;

pub use config::{InitOptions, SdkConfig};
pub use data::SessionData;
pub use environment::{Environment, ForegroundListener, StaticEnvironment};
pub use errors::{InitFailureCode, SdkError};
pub use registry::{default_sdk, reset_default_sdk, set_default_sdk};
pub use sequencer::{Gate, InitState, Pending, Sequencer};
pub use session::{CreatedLink, Credential, Sdk, SdkBuilder};
