//! Primitive type definitions shared by the SDR, the synapse graph and the
//! Temporal Memory.
//!
//! Handles are plain integers so that the graph can live in flat arrays with
//! free lists instead of pointer-linked nodes.

/// 16-bit unsigned integer.
pub type UInt16 = u16;

/// 32-bit unsigned integer.
pub type UInt32 = u32;

/// 64-bit unsigned integer.
pub type UInt64 = u64;

/// 32-bit floating point number.
pub type Real32 = f32;

/// 64-bit floating point number.
pub type Real64 = f64;

/// Default unsigned integer type.
pub type UInt = UInt32;

/// Default floating point type.
pub type Real = Real32;

/// Index of a cell. Extra (external) presynaptic inputs share this space,
/// offset by the number of cells that own segments.
pub type CellIdx = UInt32;

/// Count of segments on one cell.
pub type SegmentIdx = UInt16;

/// Count of synapses on one segment.
pub type SynapseIdx = UInt16;

/// Flat handle of a segment inside [`Connections`](crate::algorithms::Connections).
pub type Segment = UInt32;

/// Flat handle of a synapse inside [`Connections`](crate::algorithms::Connections).
pub type Synapse = UInt32;

/// Synapse permanence value (0.0 to 1.0).
pub type Permanence = Real32;

/// Minimum permanence value.
pub const MIN_PERMANENCE: Permanence = 0.0;

/// Maximum permanence value.
pub const MAX_PERMANENCE: Permanence = 1.0;

/// Permanences below this value count as zero after adaptation.
pub const EPSILON: Permanence = 1e-6;

/// Element type for dense SDR representation.
pub type ElemDense = u8;

/// Element type for sparse SDR representation (indices).
pub type ElemSparse = UInt32;
