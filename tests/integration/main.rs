//! Integration tests for the MSU trading client.
//!
//! Everything runs against local doubles: `httpmock` servers stand in for
//! the venue and a recording engine stands in for the browser.

mod fingerprint;
mod strategy;
mod support;
mod venue;
