// src/lib.rs — Library root for al-engine

pub mod api;
pub mod cli;
pub mod core;
pub mod infra;
pub mod store;
