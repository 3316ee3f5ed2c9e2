//! Integration test modules.

mod common;
mod incremental_test;
mod isolation_test;
mod pipeline_test;
