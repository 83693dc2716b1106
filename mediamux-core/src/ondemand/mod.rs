//! On-demand controller (C6): starts a path's source — a `runOnDemand`
//! child process, an internal puller, or a redirect — the first time a
//! reader asks for a path with no active publisher, and tears it down after
//! it sits idle past `sourceOnDemandCloseAfter`.

pub mod controller;

pub use controller::{OnDemandController, Source};
