//! Ordered composition of sources into a resolver chain, plus the
//! cache-feeding decorator that sits in front of the upstream source.

pub mod chain;
pub mod feeder;

pub use chain::Chain;
pub use feeder::CacheFeeder;
