//! Shared utility functions for judge-forge.
//!
//! This module provides common utilities used across multiple modules,
//! including brace segmentation of loosely formatted agent reports.

pub mod json_extraction;

pub use json_extraction::{
    preview, scan_top_level_objects, segment_top_level_objects, SegmentScan,
};
