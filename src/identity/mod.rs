//! Identity management: the user-agent, cookies and anti-bot tokens shared
//! by every resolver, plus the agent that refreshes them.

pub mod refresh;
pub mod store;

// Re-export for convenience
pub use refresh::{IdentityUpdate, TokenRefreshAgent};
pub use store::IdentityStore;
