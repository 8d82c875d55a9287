//! Foglio: a markdown rendering pipeline with executable `js run` fences,
//! live `html demo` previews, KaTeX math and line-numbered code blocks.

pub mod application;
pub mod config;
pub mod infra;
