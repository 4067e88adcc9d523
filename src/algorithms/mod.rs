//! HTM sequence-memory algorithms.
//!
//! - **Connections**: the capacity-bounded synapse graph
//! - **Temporal Memory**: learns temporal sequences over column activations

mod connections;
mod temporal_memory;

pub use connections::{
    Connections, ConnectionsParams, SegmentActivity, SegmentData, SynapseData,
};
pub use temporal_memory::{TemporalMemory, TemporalMemoryParams, TM_VERSION};
