//! Analysis Layer
//!
//! Post-processing of recognized text.

pub mod id_extractor;
