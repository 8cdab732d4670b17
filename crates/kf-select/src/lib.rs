//! # kf-select
//!
//! Object and event selection stage: per-category multiplicity cuts,
//! eta acceptance windows, missing-ET cut, index maps from the selected
//! subset back to the original event, and cut-flow counters.

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Selection tool, cuts, counters, index maps.
pub mod selection;

pub use selection::{Cut, SelectionCounters, SelectionTool};
