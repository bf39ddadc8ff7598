//! # peerdesk: session host
//!
//! Loads the host configuration and drives `peerdesk-core` sessions.

pub mod config;
