//! Test suites for the dispatch and session engine.

mod support;
mod unit;
