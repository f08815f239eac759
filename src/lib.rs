//! This crate exposes the internal functionality of the `pinprobe`
//! reachability prober.
//!
//! `pinprobe` reads candidate hostnames, resolves each one, and checks
//! whether the first resolved address answers an HTTPS request made for
//! that hostname. The connection is pinned to the address that was
//! resolved, so a hostname is only reported when that specific IP serves
//! it. This makes it useful for spotting DNS-based or selective blocking.
//!
//! ## Architecture Overview
//!
//! The pipeline is made of four parts, leaves first:
//!
//! 1. **Exclusion**: [`ExclusionFilter`](crate::exclusion::ExclusionFilter)
//!    holds an exact host deny-list and a set of IPv4/IPv6 ranges with
//!    logarithmic membership tests. It is built once and shared read-only.
//! 2. **Candidates**: [`CandidateStream`](crate::candidate::CandidateStream)
//!    reads lines, drops excluded hosts, applies the optional rate limit and
//!    hands candidates over a channel with a single slot, so the producer
//!    can never run ahead of the workers.
//! 3. **Probing**: [`HttpsProber`](crate::prober::HttpsProber) resolves,
//!    range-checks and sends a pinned `HEAD` request under one deadline.
//! 4. **Workers**: [`WorkerPool`](crate::pool::WorkerPool) runs a fixed
//!    number of concurrent workers, each probing one candidate at a time,
//!    and writes reachable hosts to a serialized [`Output`](crate::pool::Output).
//!
//! Results are printed in completion order. Failures of any kind (lookup,
//! connection, TLS, timeout) only show up as log lines on stderr.
//!
//! ## Basic Usage Example
//!
//! Any type implementing [`Probe`](crate::prober::Probe) can drive the
//! pool, which keeps the pipeline testable without a network:
//!
//! ```rust
//! use std::num::NonZeroUsize;
//! use std::sync::Arc;
//!
//! use async_trait::async_trait;
//! use pinprobe::candidate::CandidateStream;
//! use pinprobe::exclusion::ExclusionFilter;
//! use pinprobe::pool::{Output, WorkerPool};
//! use pinprobe::prober::Probe;
//!
//! struct OnlyA;
//!
//! #[async_trait]
//! impl Probe for OnlyA {
//!     async fn probe(&self, host: &str) -> bool {
//!         host == "a.example"
//!     }
//! }
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let filter = Arc::new(ExclusionFilter::build(["b.example"], ["10.0.0.0/8"])?);
//!     let input: &[u8] = b"a.example\nb.example\nc.example\n";
//!     let stream = CandidateStream::new(input, filter, None);
//!
//!     let output = Arc::new(Output::new(Vec::new()));
//!     let pool = WorkerPool::new(NonZeroUsize::new(2).unwrap());
//!
//!     let runtime = tokio::runtime::Runtime::new()?;
//!     let run = pool.run_stream(stream, Arc::new(OnlyA), Arc::clone(&output));
//!     let summary = runtime.block_on(run);
//!
//!     assert_eq!(summary.probed, 2);
//!     assert_eq!(output.into_inner().unwrap(), b"a.example\n");
//!     Ok(())
//! }
//! ```
//!
//! ## Timeouts
//!
//! A configured timeout is one deadline per candidate covering both the
//! lookup and the request. A timed out probe is treated like any other
//! failure and never affects the other workers. Without a timeout, lookups
//! are still limited by the resolver's own per-query timeout.
#![allow(clippy::needless_doctest_main)]

pub mod input;

pub mod exclusion;

pub mod candidate;

pub mod address;

pub mod prober;

pub mod pool;
