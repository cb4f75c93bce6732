#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]

pub mod agent;
pub mod cli;
pub mod compaction;
pub mod config;
pub mod conversation;
pub mod error;
pub mod session;
pub mod tool;

pub use error::{Error, Result};
