//! Port definitions (hexagonal architecture interfaces)
//!
//! This module defines the port traits that form the boundaries of the
//! hexagonal architecture. Ports are interfaces that the backup engine
//! depends on, but whose implementations live in adapter crates.
//!
//! ## Ports Overview
//!
//! - [`ITokenProvider`] - OAuth token acquisition and refresh
//! - [`IMailboxProvider`] - Paginated message listing and raw message download
//! - [`IEventSink`] - Receivers of backup events (console, JSON, tests)

pub mod event_sink;
pub mod mailbox;
pub mod token_provider;

pub use event_sink::IEventSink;
pub use mailbox::{IMailboxProvider, MessagePage, ProviderError};
pub use token_provider::{AuthError, AuthRequest, ITokenProvider, Token};
