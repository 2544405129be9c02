//! GraphQL subgraph access: query envelopes, strict record parsing, and the
//! HTTP client implementing [`crate::processor::fetcher::PairSource`].

pub mod client;
pub(crate) mod payload;

pub use client::SubgraphClient;
