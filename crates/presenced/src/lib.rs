//! presenced: presence-triggered smart-plug controller.
//!
//! Polls an mmWave presence sensor once a second and toggles a networked
//! smart plug: on as soon as a target is detected, off after a 10 second
//! grace window without one. The controller runs as a service on the
//! [`presence_runtime`] bus; sensor and plug protocols are supplied by
//! collaborators resolved through the device registry.

pub mod config;
pub mod controller;
pub mod devices;
pub mod error;
pub mod service;

pub use error::{Error, Result};
