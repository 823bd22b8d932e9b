// Integration tests for the ledger core.
// Everything runs against the in-memory storage backend and the simulated
// external providers.

mod fixtures;

mod ledger_tests;
mod sync_tests;
