pub mod cli;
pub mod config;
pub mod git;
pub mod processor;

mod api;
mod flock;

pub use api::{Submirror, SubmirrorBuilder, UpdateOptions};
