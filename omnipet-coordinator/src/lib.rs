//! omnipet-coordinator
//!
//! Off-chain coordinator for the travel system.
//!
//! Architecture:
//! 1. Poll the travel controller for active travels
//! 2. Mirror records into a local sled store
//! 3. Force overdue travels home once the safety window is exceeded
//! 4. Handle retries, timeouts and operator-attention flagging

pub mod client;
pub mod config;
pub mod mirror;
pub mod service;

pub use client::{ClientError, ControllerClient, InProcessClient};
pub use config::CoordinatorConfig;
pub use mirror::{MirrorEntry, MirrorError, MirrorStore};
pub use service::CoordinatorService;
