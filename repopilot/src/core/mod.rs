//! Deterministic, pure logic shared by the session controller.
//!
//! Core modules must be free of I/O side effects. They operate on in-memory
//! values and return deterministic outputs suitable for tests.

pub mod fix_loop;
pub mod index;
pub mod types;
