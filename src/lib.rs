//! # Mnemos - HTM sequence memory in Rust
//!
//! Mnemos implements the sequence-memory half of Hierarchical Temporal Memory:
//! given a stream of sparse column activations it learns temporal context,
//! predicts the next input and maintains a bounded graph of dendrite segments
//! and synapses.
//!
//! ## Overview
//!
//! - **Sparse Distributed Representations (SDR)**: the binary vector every
//!   component speaks, with dense, sparse and coordinate encodings
//! - **Connections**: the capacity-bounded cell → segment → synapse graph and
//!   its presynaptic reverse index
//! - **Temporal Memory**: the per-timestep activation and learning rules
//!
//! Everything is deterministic: the same parameters, seed and input sequence
//! always produce the same cells, the same graph and the same serialized bytes.
//!
//! ## Quick Start
//!
//! ```rust
//! use mnemos::prelude::*;
//!
//! let mut tm = TemporalMemory::new(TemporalMemoryParams {
//!     column_dimensions: vec![64],
//!     cells_per_column: 8,
//!     ..Default::default()
//! })
//! .unwrap();
//!
//! let mut columns = Sdr::new(&[64]);
//! columns.set_sparse(&[3, 17, 40]).unwrap();
//!
//! tm.compute(&columns, true).unwrap();
//! assert_eq!(tm.active_cells().len(), 3 * 8);
//! assert_eq!(tm.winner_cells().len(), 3);
//! ```
//!
//! ## Feature Flags
//!
//! - `serde` (default): save/load in binary (`bincode`) and JSON formats

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_precision_loss)]

pub mod types;
pub mod algorithms;
pub mod utils;

#[cfg(feature = "serde")]
pub mod serialization;

/// Re-export of commonly used types and traits for convenience.
pub mod prelude {
    pub use crate::types::{
        CellIdx, IntersectionView, Permanence, Real, ReshapeView, Sdr, SdrArena, SdrCoordinate,
        SdrDense, SdrKey, SdrSparse, Segment, SegmentIdx, Synapse, SynapseIdx, UInt,
    };
    pub use crate::algorithms::{
        Connections, ConnectionsParams, SegmentActivity, TemporalMemory, TemporalMemoryParams,
    };
    pub use crate::utils::Random;
    pub use crate::error::{ErrorKind, MnemosError};

    #[cfg(feature = "serde")]
    pub use crate::serialization::{Serializable, SerializableFormat};
}

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Error types for the library.
pub mod error {
    use thiserror::Error;

    /// Broad category of a [`MnemosError`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum ErrorKind {
        /// Invalid constructor or setter parameters.
        Configuration,
        /// Structurally invalid input (unsorted columns, shape mismatch, ...).
        Input,
        /// A handle or view no longer refers to the state it was bound to.
        State,
        /// Truncated, corrupt or version-mismatched persisted stream.
        Serialization,
        /// Failure of the underlying reader, writer or file.
        Io,
    }

    /// Main error type for mnemos operations.
    #[derive(Error, Debug)]
    pub enum MnemosError {
        /// Invalid dimensions provided.
        #[error("Invalid dimensions: {0}")]
        InvalidDimensions(String),

        /// Invalid parameter value.
        #[error("Invalid parameter '{name}': {message}")]
        InvalidParameter {
            /// Name of the invalid parameter.
            name: &'static str,
            /// Description of the error.
            message: String,
        },

        /// Index out of bounds.
        #[error("Index {index} out of bounds (size: {size})")]
        IndexOutOfBounds {
            /// The invalid index.
            index: usize,
            /// The valid size.
            size: usize,
        },

        /// Dimension mismatch between SDRs or other structures.
        #[error("Dimension mismatch: expected {expected:?}, got {actual:?}")]
        DimensionMismatch {
            /// Expected dimensions.
            expected: Vec<u32>,
            /// Actual dimensions.
            actual: Vec<u32>,
        },

        /// SDR data is invalid (e.g., unsorted sparse indices).
        #[error("Invalid SDR data: {0}")]
        InvalidSdrData(String),

        /// Algorithm input is invalid (e.g., unsorted active columns).
        #[error("Invalid input: {0}")]
        InvalidInput(String),

        /// A derived view was read after one of its sources changed.
        #[error("Stale view of arena slot {index}: bound at generation {expected}, slot is at {found}")]
        StaleView {
            /// Arena slot of the source that changed.
            index: usize,
            /// Generation captured when the view was bound.
            expected: u64,
            /// Current generation of the slot.
            found: u64,
        },

        /// An arena key refers to a slot that has been removed.
        #[error("Arena slot {index} holds no SDR")]
        InvalidHandle {
            /// The slot index.
            index: usize,
        },

        /// Serialization error.
        #[cfg(feature = "serde")]
        #[error("Serialization error: {message}")]
        SerializationError {
            /// Description of the serialization error.
            message: String,
        },

        /// The persisted header does not match what the reader expects.
        #[cfg(feature = "serde")]
        #[error("Version mismatch for '{tag}': expected {expected}, found {found}")]
        VersionMismatch {
            /// Type tag the reader expected.
            tag: String,
            /// Expected header (`tag@version`).
            expected: String,
            /// Header found in the stream.
            found: String,
        },

        /// I/O error.
        #[error("I/O error: {message}")]
        IoError {
            /// Description of the I/O error.
            message: String,
        },
    }

    impl MnemosError {
        /// Returns the broad category of this error.
        pub fn kind(&self) -> ErrorKind {
            match self {
                Self::InvalidParameter { .. } => ErrorKind::Configuration,
                Self::InvalidDimensions(_)
                | Self::IndexOutOfBounds { .. }
                | Self::DimensionMismatch { .. }
                | Self::InvalidSdrData(_)
                | Self::InvalidInput(_) => ErrorKind::Input,
                Self::StaleView { .. } | Self::InvalidHandle { .. } => ErrorKind::State,
                #[cfg(feature = "serde")]
                Self::SerializationError { .. } | Self::VersionMismatch { .. } => {
                    ErrorKind::Serialization
                }
                Self::IoError { .. } => ErrorKind::Io,
            }
        }
    }

    /// Result type alias using MnemosError.
    pub type Result<T> = std::result::Result<T, MnemosError>;
}

pub use error::{ErrorKind, MnemosError, Result};
