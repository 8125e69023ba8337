//! A sidecar that speaks Batsim's wire protocol and runs the EASY-backfill
//! scheduling policy against the jobs a discrete-event simulator submits.

pub mod error;
pub mod job;
pub mod interval;
pub mod freespace;
pub mod policy;
pub mod protocol;
pub mod transport;
pub mod session;
pub mod workload;

pub use crate::error::{Error, Result};
