//! Privilege-separated untrusted-input parser for CGI/1.1 and FastCGI/1.0
//! gateways.
//!
//! This crate is the worker half of a privilege-separated CGI/FastCGI
//! stack: it turns attacker-controlled bytes (the CGI environment, an
//! HTTP body in one of several encodings, a FastCGI record stream) into a
//! stream of typed [`ipc::ParsedPair`] records a trusted parent process
//! consumes over a pipe. The parent process, the sandbox the worker runs
//! in, and the application-facing request object built from the parsed
//! stream are all out of scope here — see `DESIGN.md`.
//!
//! Module layout follows the dependency order leaves-first: [`error`] and
//! [`env_provider`] have no crate-internal dependencies; [`ipc`] is the
//! wire codec; [`env`] ingests CGI/FastCGI environments; [`urlencode`],
//! [`pairs`], [`mime`], [`multipart`] are the body-format parsers
//! [`body`] dispatches between; [`fastcgi`] is the record-stream engine;
//! [`validate`] is the per-key validator suite; [`worker`] is the driver
//! that ties all of the above into the fixed-order emission the parent
//! relies on; [`config`] and [`digest`] are supporting/ambient pieces.

#![forbid(unsafe_code)]

pub mod body;
pub mod config;
pub mod digest;
pub mod env;
pub mod env_provider;
pub mod error;
pub mod fastcgi;
pub mod ipc;
pub mod mime;
pub mod multipart;
pub mod pairs;
pub mod urlencode;
pub mod validate;
pub mod worker;

#[cfg(test)]
mod test_logger;
