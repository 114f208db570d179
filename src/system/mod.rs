//! # System Interaction Layer
//!
//! The boundary between the resolution engine and the operating system. The
//! only thing the engine needs from the host is a read-only view of the
//! process environment.
//!
//! ## Modules
//!
//! - **`environment`**: The [`Environment`](environment::Environment) trait, a
//!   snapshot of the real process environment and a fixed map for tests.

pub mod environment;
