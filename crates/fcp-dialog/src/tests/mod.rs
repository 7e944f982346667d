//! End-to-end tests driving the client against a scripted node.

#![expect(clippy::expect_used, reason = "tests use expect for clarity")]

mod engine;
mod support;
