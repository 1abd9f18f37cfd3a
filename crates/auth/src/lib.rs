//! Bearer-credential verification for TaskFlow.
//!
//! This crate is the authorization gate: it turns a signed JWT into a
//! [`Principal`] before any agent work begins. The principal is the only
//! identity the rest of the system trusts — it is injected server-side into
//! every tool execution and is never a value the remote model can supply.

mod error;
mod verifier;

pub use error::{Error, Result};
pub use verifier::{Claims, Principal, Verifier};
