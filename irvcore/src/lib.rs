//! Load runtime for the floorplan design model.
//!
//! A [`store::DesignStore`] holds the latest published [`store::Snapshot`] of a
//! design. Loads described by a [`config::ProjectConfig`] run as a single
//! background job that alone mutates its private copy of the hierarchy,
//! reports coarse [`progress::Progress`] events and publishes snapshots as it
//! goes. Readers only ever see whole snapshots.

pub mod config;
pub mod loader;
pub mod magic;
pub mod progress;
pub mod store;
pub mod utils;

pub extern crate chrono;
pub extern crate irvmodel;
