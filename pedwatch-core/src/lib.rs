//! Pedestrian detection on video frames with a sliding-window linear
//! classifier over gradient (HOG) and texture (uniform LBP) descriptors.
//!
//! The pieces, bottom-up: [`features`] turns a patch into a fixed-length
//! vector, [`classifier`] scores it, [`scanner`] slides the patch over a
//! frame, [`detection`] collapses overlapping hits, [`pipeline`] wraps that
//! into a per-frame session and [`runtime`] drives a session from a live
//! [`video`] source. [`training`] produces the model the scanner loads.

pub mod classifier;
pub mod config;
pub mod detection;
pub mod error;
pub mod features;
pub mod pipeline;
pub mod rendering;
pub mod runtime;
pub mod scanner;
pub mod training;
pub mod video;

pub use error::{Error, Result};
