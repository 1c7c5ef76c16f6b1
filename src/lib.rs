//! Job Link Pipeline
//!
//! Turns user-submitted job posting URLs into structured job metadata:
//! validate and normalize the link, skip links the store already has,
//! render the page in a headless browser, extract fields with an AI model,
//! and hand the result to the deposit service.

pub mod app_state;
pub mod config;
pub mod models;
pub mod services;
