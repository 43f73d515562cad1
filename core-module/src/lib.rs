//! Local DNS resolver and ad/tracker blocker.
//!
//! The resolution pipeline lives across three subsystems designed
//! together: the [`resolvers`] chain that composes independent
//! [`sources`] with a cache-feeding decorator, the bounded [`cache`] with
//! TTL-ordered eviction and periodic reaping, and the [`server`] UDP
//! endpoint that performs concurrent read/write I/O over the [`protocols`]
//! wire codec.

pub mod blocklist;
pub mod buffer;
pub mod cache;
pub mod config;
pub mod protocols;
pub mod resolvers;
pub mod server;
pub mod sources;
