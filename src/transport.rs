//! The HTTP/1.1 range-fetching client: socket transport, header codec,
//! TLS trust policy, and the exchange engine that drives a request/
//! response round trip with retry semantics (spec §2, §4.1-4.3).

pub mod exchange;
pub mod header;
pub mod io_stream;
pub mod pem;
pub mod socket;
pub mod tls;
