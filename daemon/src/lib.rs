// Folio Daemon Library
// Exposes the ledger core for the binary and for integration tests

#[macro_use]
extern crate log;

pub mod config;
pub mod core;
