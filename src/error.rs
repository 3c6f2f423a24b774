//! Error Types
//!
//! This module defines the error types used throughout the compositor.
//!
//! # Overview
//!
//! The main error type [`CompositorError`] covers all failure modes including:
//! - Render target allocation failures
//! - Attachment group construction errors
//! - Pixel read-back transfer failures
//!
//! All public APIs return [`Result<T>`] which is an alias for
//! `std::result::Result<T, CompositorError>`.
//!
//! A frame that hits an allocation failure is aborted wholesale: the partial
//! target set is rolled back and the error propagates to the caller. There
//! are no internal retries.

use thiserror::Error;

/// The main error type for the compositor.
#[derive(Error, Debug)]
pub enum CompositorError {
    // ========================================================================
    // Resource Errors
    // ========================================================================
    /// GPU memory was exhausted (or validation failed) while creating a
    /// render target.
    #[error("render target allocation failed ({label}): {detail}")]
    TargetAllocation {
        /// Label of the target that failed to allocate.
        label: &'static str,
        /// Backend-reported reason.
        detail: String,
    },

    /// An attachment group referenced a target the backend cannot bind.
    #[error("attachment group construction failed: {0}")]
    AttachmentGroup(String),

    /// The requested viewport dimensions cannot back a render target.
    #[error("invalid viewport dimensions: {width}x{height}")]
    InvalidDimensions {
        /// Requested width in pixels.
        width: u32,
        /// Requested height in pixels.
        height: u32,
    },

    // ========================================================================
    // Transfer Errors
    // ========================================================================
    /// A GPU-to-CPU pixel transfer failed. Callers must treat this as
    /// distinct from a successful read of all-zero data.
    #[error("pixel read-back failed: {0}")]
    ReadBack(String),
}

/// Alias for `Result<T, CompositorError>`.
pub type Result<T> = std::result::Result<T, CompositorError>;
