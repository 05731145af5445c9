//! Command-line entry point for the server binary

mod config;
#[path = "main.rs"]
mod main_impl;

pub use main_impl::{main, Cli};
