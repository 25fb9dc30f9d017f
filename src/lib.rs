//! ==============================================================================
//! climate-dashboard - live climate dashboard client
//! ==============================================================================
//!
//! fetches the reading history from the backend once, follows the live
//! reading stream over a websocket, and keeps both in one timeline that the
//! local dashboard renders.
//!
//! ```text
//!     history.rs ──┐
//!                  ├──> dashboard.rs ──> overview.rs (timeline.rs) ──> web.rs
//!     stream.rs  ──┘
//! ```
//!
//! ==============================================================================

pub mod config;
pub mod dashboard;
pub mod domain;
pub mod error;
pub mod history;
pub mod logging;
pub mod overview;
pub mod stream;
pub mod timeline;
pub mod web;

pub use config::DashboardConfig;
pub use dashboard::{Dashboard, SharedOverview};
pub use domain::{DeviceEvent, Reading};
