//! MVNO back-office provisioning.
//!
//! A signed client for the Widely MVNO API, a thin HTTP surface over it,
//! and the nightly job that terminates lines whose plan has ended.

pub mod config;
pub mod gateway;
pub mod scheduler;
pub mod widely;
