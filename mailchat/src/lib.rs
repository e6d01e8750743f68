//! The MailChat server.
//!
//! Ties the module crates together: the built-in [`registry`], the
//! [`controller`] driving a configured graph through its lifecycle, and the
//! [`signals`] that control it.

pub mod auth;
pub mod config;
pub mod controller;
pub mod registry;
pub mod signals;

pub use controller::Controller;
pub use signals::Control;
