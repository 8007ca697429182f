//! Supervision of the `sysdig` tracer process.
//!
//! The [`Server`] launches the tracer, decodes the JSON event it prints per
//! line into an [`Event`], and hands every event to each subscribed queue.
mod error;
mod event;
mod server;

pub use error::{Error, Result};
pub use event::{DIRECTION_EXIT, Event, PROCESS_EXIT, ROOT_THREAD_VID};
pub use server::{FILTER, FORMAT, Server, TracerCommand};
