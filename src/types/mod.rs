//! Core data types: primitives, SDRs and the SDR arena.

mod primitives;
mod sdr;
mod sdr_arena;

pub use primitives::*;
pub use sdr::{Sdr, SdrCallback, SdrCoordinate, SdrDense, SdrSparse};
pub use sdr_arena::{IntersectionView, ReshapeView, SdrArena, SdrKey};
