//! OAuth 2.0 authorization-code + PKCE flow for the MCP bridge.
//!
//! The pieces fit together as follows: the [`provider::OAuthProvider`]
//! owns the flow; it asks the [`coordination::AuthCoordinator`] whether
//! this process leads or follows, and the leader binds a
//! [`callback::CallbackServer`] whose code future both the leader and
//! the follower poll route observe. All persisted state goes through
//! `mcp-store`.

pub mod browser;
pub mod callback;
pub mod coordination;
pub mod error;
pub mod pkce;
pub mod provider;
pub mod sanitize;
pub mod types;

pub use coordination::{AuthCoordinator, Coordination};
pub use error::{OAuthError, Result};
pub use provider::{OAuthProvider, OAuthProviderOptions};
pub use types::InvalidationScope;
