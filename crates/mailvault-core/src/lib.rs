//! MailVault Core - Domain logic and business rules
//!
//! This crate contains the hexagonal architecture core with:
//! - **Domain entities** - `MessageRef`, `LocalRecord`, `FilterSpec`, `BackupSession`
//! - **Events** - `BackupEvent`, the typed surface a backup run emits
//! - **Port definitions** - Traits for adapters: `ITokenProvider`, `IMailboxProvider`, `IEventSink`
//! - **State machine** - Backup session lifecycle (`Idle` through `Completed`/`Failed`)
//!
//! # Architecture
//!
//! This crate follows the hexagonal (ports & adapters) architecture pattern.
//! The domain module contains pure business logic with no I/O.
//! Ports define trait interfaces that adapter crates implement; the sync
//! crate drives them to run a backup session.

pub mod config;
pub mod domain;
pub mod ports;
