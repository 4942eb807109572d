#![warn(clippy::pedantic)]
// Noisy doc/signature lints, would require annotating every pub function
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
// Style preference: keeping format!("{}", x) over format!("{x}") for readability with complex exprs
#![allow(clippy::uninlined_format_args)]
// Platform timestamps are i64 millis
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::module_name_repetitions)]

pub mod cli;
pub mod config;
pub mod dedup;
pub mod errors;
pub mod events;
pub mod incoming;
pub mod outgoing;
pub mod pending;
pub mod profile;
pub mod refstore;
pub mod sink;
pub mod webhook;

pub(crate) mod utils;

#[cfg(test)]
pub(crate) mod testing;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
