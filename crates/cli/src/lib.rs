//! Terminal front end for the MARCUS session client.
//!
//! Every command prints one [`output::CommandResult`] envelope. Session state
//! is sealed into a JSON file between invocations, so `create`, `status` and
//! `end` can run as separate processes against the same session.

pub mod cli;
pub mod commands;
pub mod context;
pub mod logging;
pub mod output;
