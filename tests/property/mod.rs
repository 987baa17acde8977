//! Property-based tests for admission and classification guarantees

mod admission;
