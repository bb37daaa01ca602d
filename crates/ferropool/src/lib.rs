#![doc = include_str!("../README.md")]

mod config;
mod error;
mod event;
mod handlers;
mod ordering;
mod pool;
mod task;

pub use crate::config::*;
pub use crate::error::*;
pub use crate::event::TaskResponse;
pub use crate::handlers::*;
pub use crate::pool::*;
pub use crate::task::*;
