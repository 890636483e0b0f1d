//! rawnode: a compute node that stages mass-spectrometry raw data files and
//! runs processing jobs submitted by a remote controller.
//!
//! Jobs arrive through [`node::NodeServer`] (in process or over the HTTP
//! intake in [`api`]), are executed one at a time by the worker thread in
//! [`worker`], and are reported back through the [`controller`] link.

pub mod api;
pub mod config;
pub mod controller;
pub mod dataset;
pub mod error;
pub mod node;
pub mod scheduler;
pub mod shutdown;
pub mod strategy;
pub mod worker;

pub use error::{NodeError, Result};
pub use node::NodeServer;
