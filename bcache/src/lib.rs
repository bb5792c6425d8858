// Copyright (c) 2026 ALAS Technology. MIT License.
// See LICENSE for details.

//! # bcache
//!
//! An embedded, eventually-consistent, in-process key/value cache that
//! replicates its contents across a cluster of peer processes by gossip.
//!
//! Each peer holds a bounded LRU of string-keyed, string-valued entries with
//! per-entry expiration and tombstoning. Updates made on any peer propagate
//! to all others with last-writer-wins conflict resolution keyed on
//! monotonic timestamps. The cache is consumed as a library: the host calls
//! [`Bcache::set`]/[`Bcache::get`]/[`Bcache::delete`]/[`Bcache::get_with_filler`]
//! and the cache transparently replicates mutations and absorbs mutations
//! from peers.
//!
//! This crate is the replication core only. The underlying gossip mesh
//! transport — discovery, peer membership, connection management, retry —
//! is an external collaborator described here only by the contract it must
//! satisfy: the [`transport::MeshTransport`] and [`transport::Gossiper`]
//! traits. A concrete transport (libp2p-backed), CLI, logging, and HTTP
//! facade live in the sibling `bcache-node` binary crate.
//!
//! ## Modules
//!
//! - [`entry`] — the per-key value record and the ordering rule that drives
//!   convergence.
//! - [`message`] — the gossip payload and its JSON wire form.
//! - [`cache`] — the bounded LRU engine with timestamp-ordered merge.
//! - [`peer`] — the single-writer envelope around a `Cache`: serializes
//!   local mutations through an action queue and implements the three
//!   gossip callbacks.
//! - [`filler`] — single-flight `GetWithFiller` for thundering-herd
//!   suppression on cold-key misses.
//! - [`transport`] — the mesh transport contract plus an in-memory
//!   `LoopbackMesh` used by this crate's own integration tests.
//! - [`config`] — configuration and its defaulting rules.
//! - [`facade`] — [`Bcache`], the public entry point wiring a `Peer` to a
//!   `MeshTransport`.
//! - [`error`] — error types for every module above.

pub mod cache;
pub mod config;
pub mod entry;
pub mod error;
pub mod facade;
pub mod filler;
pub mod message;
pub mod peer;
pub mod transport;

pub use cache::{now_ns, Cache};
pub use config::BcacheConfig;
pub use entry::Entry;
pub use error::{BcacheError, CacheError, CodecError, ConfigError, FillerError, TransportError};
pub use facade::Bcache;
pub use filler::Filler;
pub use message::{KeyedEntry, Message, PeerId};
pub use peer::Peer;
pub use transport::{GossipBroadcaster, Gossiper, LoopbackMesh, MeshTransport};
