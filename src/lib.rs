#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod heartbeat;
pub(crate) mod timer;
pub mod transport;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

pub use connection::{ConnectionManager, ConnectionState};
