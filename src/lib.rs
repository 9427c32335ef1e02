//! minichain: an educational peer-to-peer proof-of-work network.
//!
//! One binary, four roles: a bootstrap rendezvous registry, mining nodes
//! that gossip transactions and blocks over newline-delimited JSON, a thin
//! wallet client, and an optional log-streaming sink. See DESIGN.md for the
//! architecture notes.

pub mod blockchain;
pub mod bootstrap;
pub mod config;
pub mod daemon;
pub mod logger;
pub mod mempool;
pub mod miner;
pub mod wallet;
