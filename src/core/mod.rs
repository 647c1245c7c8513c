// src/core/mod.rs — Core iteration engine

pub mod controller;
pub mod dataset;
pub mod run_config;
pub mod types;
pub mod workflow;

pub use controller::IterationController;
