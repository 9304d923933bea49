//! Render pipelines.
//!
//! Every model is drawn by the single forward pipeline in [`basic`].

pub mod basic;
