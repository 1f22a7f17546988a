//! Benchmarks for the Courier delivery hub.
//!
//! - `benches/router.rs`: routing decisions and the output queue
//! - `benches/registry.rs`: connection registration and lookup
//! - `src/bin/e2e_throughput.rs`: acknowledgements per second against a running server
