//! # Listen Together Module
//!
//! Keeps a client pinned to a shared listening group.
//!
//! ## Overview
//!
//! - One persistent socket reused across reconnects, rejoining the last group
//! - Follower application of versioned snapshots and deltas with clock-skew
//!   correction
//! - Host command dispatch with transient-conflict retry
//! - Latest-only coalescing of track navigation
//!
//! ## Components
//!
//! - **Protocol** (`protocol`): event names, payloads, ack classification and
//!   timeline math
//! - **Client** (`client`): the [`ListenTogetherClient`] session
//! - **Config** (`config`): retry and clock tunables

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;

pub use client::{GroupEvent, ListenTogetherClient};
pub use config::ListenTogetherConfig;
pub use error::{Result, SyncError};
pub use protocol::{
    follower_target_seconds, AckOutcome, GroupMember, GroupSnapshot, PlaybackCommand, PlaybackDelta,
    QueueCommand, QueueDelta,
};
