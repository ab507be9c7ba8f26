//! Eventide Core — event-sourced aggregate persistence abstractions.
//!
//! This crate defines aggregate roots, stored events, snapshots and the
//! repository traits their storage backends implement. It contains no
//! infrastructure code.

pub mod aggregate;
pub mod aggregate_root;
pub mod clock;
pub mod config;
pub mod error;
pub mod event;
pub mod handler;
pub mod persistence;
pub mod repository;
pub mod snapshot;
