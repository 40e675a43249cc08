//! Grouped handler registration.
//!
//! A [`HandlerSet`] is an object that owns several related handlers (a game
//! lobby's chat, matchmaking and presence handlers, say) and registers all of
//! them in one call. It is a thin layer over
//! [`ProtonSession::register_handler`]: each handler still names its topic,
//! payload type and lane explicitly.
//!
//! ```no_run
//! use std::sync::Arc;
//! use proton::{ExecutionLane, HandlerSet, MessageAttributes, ProtonSession};
//!
//! struct Chat {
//!     room: Arc<str>,
//! }
//!
//! #[async_trait::async_trait]
//! impl HandlerSet for Chat {
//!     async fn register(&self, session: &ProtonSession) -> proton::Result<()> {
//!         let room = Arc::clone(&self.room);
//!         session
//!             .register_handler("chat", "say", ExecutionLane::Foreground, move |text: String, attrs: &MessageAttributes| {
//!                 println!("[{room}] <{}> {text}", attrs.sender_name());
//!             })
//!             .await?;
//!         session
//!             .register_handler_data("chat", "clear", ExecutionLane::Background, |_: bool| {})
//!             .await
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::{ProtonSession, Result};

/// A group of handlers registered together.
#[async_trait]
pub trait HandlerSet: Send + Sync {
    /// Register every handler of this set on `session`.
    ///
    /// # Errors
    ///
    /// The first registration error. Handlers registered before it stay
    /// registered.
    async fn register(&self, session: &ProtonSession) -> Result<()>;
}
