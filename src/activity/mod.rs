//! Transcription factor activity inference

mod network;
mod ulm;

pub use network::{Edge, RegulatoryNetwork};
pub use ulm::{run_ulm, ActivityColumn, ActivityEstimate};
