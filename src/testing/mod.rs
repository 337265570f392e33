//! Testing utilities
//!
//! A reference controller and transport helpers for driving an accessory
//! in tests and demos.

pub mod client;
pub mod controller;
pub mod mfi;

pub use client::{LoopbackClient, expect_ok};
#[cfg(feature = "tokio-runtime")]
pub use client::TcpClient;
pub use controller::{AccessoryInfo, MfiProof, TestController};
pub use mfi::SoftwareMfi;
