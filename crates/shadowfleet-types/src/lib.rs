//! Core types and traits for the shadowfleet agent monitor.
//!
//! This crate defines the data structures shared by the monitoring kernel,
//! the agent-side client and the command-line tool. It contains no business
//! logic.

pub mod agent;
pub mod config;
pub mod error;
pub mod event;
pub mod health;
pub mod message;
