//! Process-wide default SDK session.
//!
//! Created from the environment on first use, reusable afterwards and
//! resettable so tests can install their own session.

use crate::errors::SdkError;
use crate::session::Sdk;
use std::sync::{Mutex, MutexGuard};

static DEFAULT_SDK: Mutex<Option<Sdk>> = Mutex::new(None);

/// The default session, built with [`Sdk::from_env`] on first use.
///
/// Must first be called from inside a tokio runtime.
pub fn default_sdk() -> Result<Sdk, SdkError> {
    let mut slot = slot();
    if let Some(sdk) = slot.as_ref() {
        return Ok(sdk.clone());
    }
    let sdk = Sdk::from_env()?;
    *slot = Some(sdk.clone());
    Ok(sdk)
}

/// Replaces the default session, returning the previous one.
pub fn set_default_sdk(sdk: Sdk) -> Option<Sdk> {
    slot().replace(sdk)
}

/// Forgets the default session; the next [`default_sdk`] call builds a new one.
pub fn reset_default_sdk() -> Option<Sdk> {
    slot().take()
}

fn slot() -> MutexGuard<'static, Option<Sdk>> {
    DEFAULT_SDK
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner())
}
