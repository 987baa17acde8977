//! Integration tests for the taxon eviction controller

mod cli_parse;
mod config_loading;
mod reconcile_cycle;
mod test_utils;
