//! Multi-account credential management.
//!
//! - `AccountRegistry`: ordered alias -> account records in `accounts.yaml`
//! - `CredentialStore`: token material behind a `SecretBackend` (keyring or file)
//! - `TokenManager` / `TokenSource`: valid access tokens, refreshed on demand
//! - `AccountManager`: the three composed for command handlers

pub mod manager;
pub mod registry;
pub mod store;
pub mod token;

pub use manager::AccountManager;
pub use registry::{Account, AccountRegistry};
pub use store::{Credential, CredentialStore, FileBackend, KeyringBackend, SecretBackend};
pub use token::{TokenExchange, TokenGrant, TokenManager, TokenSource, TokenState};
