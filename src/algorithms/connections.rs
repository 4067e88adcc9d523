//! Connections - the synapse graph mutated by the Temporal Memory.
//!
//! Cells own segments, segments own synapses, and every synapse points at one
//! presynaptic cell. Segments and synapses live in flat arrays addressed by
//! integer handles; destroyed slots go onto free lists and are reused.
//!
//! Two capacity limits bound memory: when a cell is full its least recently
//! used segment is evicted, and when a segment is full its weakest synapse is
//! evicted. Eviction is silent and deterministic.
//!
//! A reverse index from presynaptic cell to synapses makes
//! [`Connections::compute_activity`] scale with the fan-out of the active
//! inputs instead of the total number of segments.

use crate::types::{
    CellIdx, Permanence, Sdr, Segment, SegmentIdx, Synapse, SynapseIdx, EPSILON, MAX_PERMANENCE,
    MIN_PERMANENCE,
};
use crate::utils::Random;

use ahash::AHashMap;
use smallvec::SmallVec;
use std::cmp::Ordering;
use tracing::trace;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Data associated with a synapse.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SynapseData {
    /// The presynaptic cell this synapse connects to.
    pub presynaptic_cell: CellIdx,

    /// The permanence strength of this synapse.
    pub permanence: Permanence,

    /// The segment this synapse belongs to.
    pub segment: Segment,

    /// Global creation order, used to break permanence ties on eviction.
    pub ordinal: u64,

    alive: bool,
}

/// Data associated with a segment.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct SegmentData {
    /// The synapses on this segment, in creation order.
    pub synapses: SmallVec<[Synapse; 32]>,

    /// The cell this segment belongs to.
    pub cell: CellIdx,

    /// Number of connected synapses (permanence above the connected threshold).
    pub num_connected: SynapseIdx,

    /// Iteration at which the segment was created.
    pub created_iteration: u64,

    /// Last iteration at which the segment was active or learned.
    pub last_used_iteration: u64,

    /// Global creation order, used to break recency ties on eviction.
    pub ordinal: u64,

    alive: bool,
}

impl SegmentData {
    fn new(cell: CellIdx, iteration: u64, ordinal: u64) -> Self {
        Self {
            synapses: SmallVec::new(),
            cell,
            num_connected: 0,
            created_iteration: iteration,
            last_used_iteration: iteration,
            ordinal,
            alive: true,
        }
    }
}

/// Data associated with a cell.
#[derive(Debug, Clone, Default, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
struct CellData {
    /// The segments on this cell, in creation order.
    segments: SmallVec<[Segment; 8]>,
}

/// Parameters for creating a Connections instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ConnectionsParams {
    /// Number of presynaptic/postsynaptic cells in the graph.
    pub num_cells: CellIdx,

    /// A synapse is connected when its permanence is strictly above this.
    pub connected_permanence: Permanence,

    /// Segments per cell before LRU eviction kicks in.
    pub max_segments_per_cell: SegmentIdx,

    /// Synapses per segment before weakest-first eviction kicks in.
    pub max_synapses_per_segment: SynapseIdx,
}

impl Default for ConnectionsParams {
    fn default() -> Self {
        Self {
            num_cells: 0,
            connected_permanence: 0.5,
            max_segments_per_cell: 255,
            max_synapses_per_segment: 255,
        }
    }
}

/// Result of [`Connections::compute_activity`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SegmentActivity {
    /// Active connected synapses per segment, indexed by segment handle.
    pub num_active_connected: Vec<SynapseIdx>,

    /// Active synapses of any permanence per segment, indexed by segment handle.
    pub num_active_potential: Vec<SynapseIdx>,

    /// Segments meeting the activation threshold, ordered by (cell, creation).
    pub active: Vec<Segment>,

    /// Segments meeting the matching threshold, ordered by (cell, creation).
    pub matching: Vec<Segment>,
}

/// The capacity-bounded cell → segment → synapse graph.
#[derive(Debug, Clone)]
pub struct Connections {
    /// All cells in the connections graph.
    cells: Vec<CellData>,

    /// All segments (indexed by Segment).
    segments: Vec<SegmentData>,

    /// Destroyed segment indices (available for reuse).
    destroyed_segments: Vec<Segment>,

    /// All synapses (indexed by Synapse).
    synapses: Vec<SynapseData>,

    /// Destroyed synapse indices (available for reuse).
    destroyed_synapses: Vec<Synapse>,

    connected_permanence: Permanence,
    max_segments_per_cell: SegmentIdx,
    max_synapses_per_segment: SynapseIdx,

    next_segment_ordinal: u64,
    next_synapse_ordinal: u64,

    /// Maps presynaptic cell -> synapses reading from it. Rebuilt on load.
    synapses_for_presynaptic_cell: AHashMap<CellIdx, Vec<Synapse>>,
}

// The reverse index is derived data: it is left out of the stream and rebuilt
// from the synapse table, so the bytes never depend on hash-map order.
#[cfg(feature = "serde")]
mod serde_impl {
    use super::*;
    use serde::{Deserializer, Serializer};

    #[derive(Serialize)]
    struct ConnectionsStateRef<'a> {
        cells: &'a [CellData],
        segments: &'a [SegmentData],
        destroyed_segments: &'a [Segment],
        synapses: &'a [SynapseData],
        destroyed_synapses: &'a [Synapse],
        connected_permanence: Permanence,
        max_segments_per_cell: SegmentIdx,
        max_synapses_per_segment: SynapseIdx,
        next_segment_ordinal: u64,
        next_synapse_ordinal: u64,
    }

    #[derive(Deserialize)]
    struct ConnectionsState {
        cells: Vec<CellData>,
        segments: Vec<SegmentData>,
        destroyed_segments: Vec<Segment>,
        synapses: Vec<SynapseData>,
        destroyed_synapses: Vec<Synapse>,
        connected_permanence: Permanence,
        max_segments_per_cell: SegmentIdx,
        max_synapses_per_segment: SynapseIdx,
        next_segment_ordinal: u64,
        next_synapse_ordinal: u64,
    }

    impl ConnectionsState {
        /// Cross-checks every handle list so a tampered stream is rejected
        /// on load instead of panicking on first use.
        fn check(&self) -> std::result::Result<(), String> {
            let num_cells = self.cells.len();
            let num_segments = self.segments.len();
            let num_synapses = self.synapses.len();
            let max_segments = self.max_segments_per_cell.max(1) as usize;
            let max_synapses = self.max_synapses_per_segment.max(1) as usize;

            if !(MIN_PERMANENCE..=MAX_PERMANENCE).contains(&self.connected_permanence) {
                return Err(format!(
                    "connected permanence {} outside [0, 1]",
                    self.connected_permanence
                ));
            }

            let mut segment_listed = vec![false; num_segments];
            for (cell, data) in self.cells.iter().enumerate() {
                if data.segments.len() > max_segments {
                    return Err(format!("cell {cell} holds {} segments", data.segments.len()));
                }
                for &segment in &data.segments {
                    let seg = self
                        .segments
                        .get(segment as usize)
                        .filter(|seg| seg.alive)
                        .ok_or_else(|| format!("cell {cell} lists missing segment {segment}"))?;
                    if seg.cell as usize != cell || segment_listed[segment as usize] {
                        return Err(format!("segment {segment} listed under the wrong cell"));
                    }
                    segment_listed[segment as usize] = true;
                }
            }

            let mut synapse_listed = vec![false; num_synapses];
            for (segment, seg) in self.segments.iter().enumerate() {
                if !seg.alive {
                    continue;
                }
                if !segment_listed[segment] {
                    return Err(format!("segment {segment} is not listed by its cell"));
                }
                if seg.ordinal >= self.next_segment_ordinal {
                    return Err(format!("segment {segment} has a future ordinal"));
                }
                if seg.synapses.len() > max_synapses {
                    return Err(format!("segment {segment} holds {} synapses", seg.synapses.len()));
                }

                let mut num_connected = 0;
                for &synapse in &seg.synapses {
                    let syn = self
                        .synapses
                        .get(synapse as usize)
                        .filter(|syn| syn.alive)
                        .ok_or_else(|| format!("segment {segment} lists missing synapse {synapse}"))?;
                    if syn.segment as usize != segment || synapse_listed[synapse as usize] {
                        return Err(format!("synapse {synapse} listed under the wrong segment"));
                    }
                    synapse_listed[synapse as usize] = true;

                    if syn.presynaptic_cell as usize >= num_cells {
                        return Err(format!(
                            "synapse {synapse} reads missing cell {}",
                            syn.presynaptic_cell
                        ));
                    }
                    if !(MIN_PERMANENCE..=MAX_PERMANENCE).contains(&syn.permanence) {
                        return Err(format!("synapse {synapse} permanence {}", syn.permanence));
                    }
                    if syn.ordinal >= self.next_synapse_ordinal {
                        return Err(format!("synapse {synapse} has a future ordinal"));
                    }
                    if syn.permanence > self.connected_permanence {
                        num_connected += 1;
                    }
                }
                if seg.num_connected != num_connected {
                    return Err(format!("segment {segment} connected count is stale"));
                }
            }

            if let Some(synapse) = self
                .synapses
                .iter()
                .enumerate()
                .position(|(i, syn)| syn.alive && !synapse_listed[i])
            {
                return Err(format!("synapse {synapse} is not listed by its segment"));
            }

            check_free_list("segment", &self.destroyed_segments, &segment_listed)?;
            check_free_list("synapse", &self.destroyed_synapses, &synapse_listed)
        }
    }

    /// The free list must hold exactly the dead slots, once each.
    fn check_free_list(
        what: &str,
        free: &[u32],
        live: &[bool],
    ) -> std::result::Result<(), String> {
        let mut seen = vec![false; live.len()];
        for &handle in free {
            let i = handle as usize;
            if i >= live.len() || live[i] || seen[i] {
                return Err(format!("{what} free list holds invalid handle {handle}"));
            }
            seen[i] = true;
        }
        if free.len() + live.iter().filter(|&&l| l).count() != live.len() {
            return Err(format!("{what} free list is missing dead slots"));
        }
        Ok(())
    }

    impl Serialize for Connections {
        fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            ConnectionsStateRef {
                cells: &self.cells,
                segments: &self.segments,
                destroyed_segments: &self.destroyed_segments,
                synapses: &self.synapses,
                destroyed_synapses: &self.destroyed_synapses,
                connected_permanence: self.connected_permanence,
                max_segments_per_cell: self.max_segments_per_cell,
                max_synapses_per_segment: self.max_synapses_per_segment,
                next_segment_ordinal: self.next_segment_ordinal,
                next_synapse_ordinal: self.next_synapse_ordinal,
            }
            .serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for Connections {
        fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let state = ConnectionsState::deserialize(deserializer)?;

            state.check().map_err(serde::de::Error::custom)?;

            let mut connections = Connections {
                cells: state.cells,
                segments: state.segments,
                destroyed_segments: state.destroyed_segments,
                synapses: state.synapses,
                destroyed_synapses: state.destroyed_synapses,
                connected_permanence: state.connected_permanence,
                max_segments_per_cell: state.max_segments_per_cell,
                max_synapses_per_segment: state.max_synapses_per_segment,
                next_segment_ordinal: state.next_segment_ordinal,
                next_synapse_ordinal: state.next_synapse_ordinal,
                synapses_for_presynaptic_cell: AHashMap::new(),
            };
            connections.rebuild_presynaptic_index();
            Ok(connections)
        }
    }
}

impl Connections {
    /// Creates a new Connections instance with the given parameters.
    pub fn new(params: ConnectionsParams) -> Self {
        Self {
            cells: vec![CellData::default(); params.num_cells as usize],
            segments: Vec::new(),
            destroyed_segments: Vec::new(),
            synapses: Vec::new(),
            destroyed_synapses: Vec::new(),
            connected_permanence: params.connected_permanence,
            max_segments_per_cell: params.max_segments_per_cell,
            max_synapses_per_segment: params.max_synapses_per_segment,
            next_segment_ordinal: 0,
            next_synapse_ordinal: 0,
            synapses_for_presynaptic_cell: AHashMap::new(),
        }
    }

    /// Creates a Connections instance with default parameters.
    pub fn with_cells(num_cells: CellIdx) -> Self {
        Self::new(ConnectionsParams {
            num_cells,
            ..Default::default()
        })
    }

    /// Returns the number of cells.
    #[inline]
    pub fn num_cells(&self) -> usize {
        self.cells.len()
    }

    /// Returns the connected permanence threshold.
    #[inline]
    pub fn connected_permanence(&self) -> Permanence {
        self.connected_permanence
    }

    /// Returns the per-cell segment limit.
    #[inline]
    pub fn max_segments_per_cell(&self) -> SegmentIdx {
        self.max_segments_per_cell
    }

    /// Returns the per-segment synapse limit.
    #[inline]
    pub fn max_synapses_per_segment(&self) -> SynapseIdx {
        self.max_synapses_per_segment
    }

    /// Returns the number of live segments.
    pub fn num_segments(&self) -> usize {
        self.segments.len() - self.destroyed_segments.len()
    }

    /// Returns the number of segments on a specific cell.
    pub fn num_segments_on_cell(&self, cell: CellIdx) -> usize {
        self.cells[cell as usize].segments.len()
    }

    /// Returns the number of live synapses.
    pub fn num_synapses(&self) -> usize {
        self.synapses.len() - self.destroyed_synapses.len()
    }

    /// Returns the number of synapses on a specific segment.
    pub fn num_synapses_on_segment(&self, segment: Segment) -> usize {
        self.segments[segment as usize].synapses.len()
    }

    /// Returns the flat list length for segment indexing.
    ///
    /// Vectors indexed by segment handle must be at least this long.
    pub fn segment_flat_list_length(&self) -> usize {
        self.segments.len()
    }

    // ========================================================================
    // Segment operations
    // ========================================================================

    /// Creates a new segment on `cell`, stamped with `iteration`.
    ///
    /// If the cell already holds `max_segments_per_cell` segments, the least
    /// recently used one (oldest creation on ties) is destroyed first.
    ///
    /// # Panics
    ///
    /// Panics if `cell` is out of range.
    pub fn create_segment(&mut self, cell: CellIdx, iteration: u64) -> Segment {
        while self.cells[cell as usize].segments.len() >= self.max_segments_per_cell.max(1) as usize
        {
            let Some(lru) = self.least_recently_used_segment(cell) else {
                break;
            };
            trace!(
                cell,
                segment = lru,
                last_used = self.segments[lru as usize].last_used_iteration,
                "evicting least recently used segment"
            );
            self.destroy_segment(lru);
        }

        let ordinal = self.next_segment_ordinal;
        self.next_segment_ordinal += 1;

        let data = SegmentData::new(cell, iteration, ordinal);
        let segment = if let Some(reuse) = self.destroyed_segments.pop() {
            self.segments[reuse as usize] = data;
            reuse
        } else {
            self.segments.push(data);
            (self.segments.len() - 1) as Segment
        };

        self.cells[cell as usize].segments.push(segment);
        segment
    }

    fn least_recently_used_segment(&self, cell: CellIdx) -> Option<Segment> {
        self.cells[cell as usize]
            .segments
            .iter()
            .copied()
            .min_by_key(|&s| {
                let data = &self.segments[s as usize];
                (data.last_used_iteration, data.ordinal)
            })
    }

    /// Destroys a segment and all its synapses.
    pub fn destroy_segment(&mut self, segment: Segment) {
        if !self.is_segment_alive(segment) {
            return;
        }

        let synapses: Vec<Synapse> = self.segments[segment as usize].synapses.to_vec();
        for synapse in synapses {
            self.destroy_synapse(synapse);
        }

        let cell = self.segments[segment as usize].cell;
        let cell_segments = &mut self.cells[cell as usize].segments;
        if let Some(pos) = cell_segments.iter().position(|&s| s == segment) {
            cell_segments.remove(pos);
        }

        self.segments[segment as usize].alive = false;
        self.destroyed_segments.push(segment);
    }

    /// Returns true if the handle refers to a live segment.
    pub fn is_segment_alive(&self, segment: Segment) -> bool {
        self.segments
            .get(segment as usize)
            .is_some_and(|data| data.alive)
    }

    /// Records that a segment was used at `iteration`.
    #[inline]
    pub fn touch_segment(&mut self, segment: Segment, iteration: u64) {
        self.segments[segment as usize].last_used_iteration = iteration;
    }

    /// Gets the segments for a cell, in creation order.
    #[inline]
    pub fn segments_for_cell(&self, cell: CellIdx) -> &[Segment] {
        &self.cells[cell as usize].segments
    }

    /// Gets the cell that owns a segment.
    #[inline]
    pub fn cell_for_segment(&self, segment: Segment) -> CellIdx {
        self.segments[segment as usize].cell
    }

    /// Gets the segment data.
    #[inline]
    pub fn data_for_segment(&self, segment: Segment) -> &SegmentData {
        &self.segments[segment as usize]
    }

    /// Orders segments by owning cell, then by creation.
    pub fn compare_segments(&self, a: Segment, b: Segment) -> Ordering {
        let a = &self.segments[a as usize];
        let b = &self.segments[b as usize];
        a.cell.cmp(&b.cell).then(a.ordinal.cmp(&b.ordinal))
    }

    // ========================================================================
    // Synapse operations
    // ========================================================================

    /// Creates a synapse from `presynaptic_cell` onto `segment`.
    ///
    /// If the segment already has a synapse to that cell, no new synapse is
    /// made; the existing one keeps the larger of the two permanences. If the
    /// segment is full, its weakest synapse (oldest on ties) is destroyed
    /// first. Either way the segment is marked used at `iteration`.
    pub fn create_synapse(
        &mut self,
        segment: Segment,
        presynaptic_cell: CellIdx,
        permanence: Permanence,
        iteration: u64,
    ) -> Synapse {
        self.touch_segment(segment, iteration);

        let existing = self.segments[segment as usize]
            .synapses
            .iter()
            .find(|&&s| self.synapses[s as usize].presynaptic_cell == presynaptic_cell)
            .copied();

        if let Some(existing) = existing {
            if permanence > self.synapses[existing as usize].permanence {
                self.update_synapse_permanence(existing, permanence);
            }
            return existing;
        }

        while self.segments[segment as usize].synapses.len()
            >= self.max_synapses_per_segment.max(1) as usize
        {
            if self.destroy_min_permanence_synapses(segment, 1, &[]) == 0 {
                break;
            }
        }

        let permanence = permanence.clamp(MIN_PERMANENCE, MAX_PERMANENCE);
        let ordinal = self.next_synapse_ordinal;
        self.next_synapse_ordinal += 1;

        let data = SynapseData {
            presynaptic_cell,
            permanence,
            segment,
            ordinal,
            alive: true,
        };
        let synapse = if let Some(reuse) = self.destroyed_synapses.pop() {
            self.synapses[reuse as usize] = data;
            reuse
        } else {
            self.synapses.push(data);
            (self.synapses.len() - 1) as Synapse
        };

        let seg = &mut self.segments[segment as usize];
        seg.synapses.push(synapse);
        if permanence > self.connected_permanence {
            seg.num_connected += 1;
        }

        self.synapses_for_presynaptic_cell
            .entry(presynaptic_cell)
            .or_default()
            .push(synapse);

        synapse
    }

    /// Destroys a synapse and removes it from the reverse index.
    pub fn destroy_synapse(&mut self, synapse: Synapse) {
        let data = &self.synapses[synapse as usize];
        if !data.alive {
            return;
        }
        let segment = data.segment;
        let presynaptic_cell = data.presynaptic_cell;
        let was_connected = data.permanence > self.connected_permanence;

        let seg = &mut self.segments[segment as usize];
        if let Some(pos) = seg.synapses.iter().position(|&s| s == synapse) {
            seg.synapses.remove(pos);
        }
        if was_connected {
            seg.num_connected = seg.num_connected.saturating_sub(1);
        }

        if let Some(list) = self.synapses_for_presynaptic_cell.get_mut(&presynaptic_cell) {
            if let Some(pos) = list.iter().position(|&s| s == synapse) {
                list.swap_remove(pos);
            }
            if list.is_empty() {
                self.synapses_for_presynaptic_cell.remove(&presynaptic_cell);
            }
        }

        self.synapses[synapse as usize].alive = false;
        self.destroyed_synapses.push(synapse);
    }

    /// Sets a synapse's permanence (clamped to `[0, 1]`), keeping the
    /// connected-synapse count of its segment in step.
    pub fn update_synapse_permanence(&mut self, synapse: Synapse, permanence: Permanence) {
        let permanence = permanence.clamp(MIN_PERMANENCE, MAX_PERMANENCE);
        let data = &mut self.synapses[synapse as usize];
        let was_connected = data.permanence > self.connected_permanence;
        let is_connected = permanence > self.connected_permanence;
        data.permanence = permanence;

        let seg = &mut self.segments[data.segment as usize];
        match (was_connected, is_connected) {
            (false, true) => seg.num_connected += 1,
            (true, false) => seg.num_connected = seg.num_connected.saturating_sub(1),
            _ => {}
        }
    }

    /// Gets the synapses on a segment, in creation order.
    #[inline]
    pub fn synapses_for_segment(&self, segment: Segment) -> &[Synapse] {
        &self.segments[segment as usize].synapses
    }

    /// Gets the synapse data.
    #[inline]
    pub fn data_for_synapse(&self, synapse: Synapse) -> &SynapseData {
        &self.synapses[synapse as usize]
    }

    /// Gets the presynaptic cells for a segment, in synapse creation order.
    pub fn presynaptic_cells_for_segment(&self, segment: Segment) -> Vec<CellIdx> {
        self.segments[segment as usize]
            .synapses
            .iter()
            .map(|&s| self.synapses[s as usize].presynaptic_cell)
            .collect()
    }

    /// Gets all synapses reading from a presynaptic cell, sorted by handle.
    pub fn synapses_for_presynaptic_cell(&self, cell: CellIdx) -> Vec<Synapse> {
        let mut synapses = self
            .synapses_for_presynaptic_cell
            .get(&cell)
            .cloned()
            .unwrap_or_default();
        synapses.sort_unstable();
        synapses
    }

    fn rebuild_presynaptic_index(&mut self) {
        self.synapses_for_presynaptic_cell.clear();
        for (handle, data) in self.synapses.iter().enumerate() {
            if data.alive {
                self.synapses_for_presynaptic_cell
                    .entry(data.presynaptic_cell)
                    .or_default()
                    .push(handle as Synapse);
            }
        }
    }

    // ========================================================================
    // Activity computation
    // ========================================================================

    /// Counts active synapses per segment and classifies segments.
    ///
    /// Only segments reachable from `active_presynaptic_cells` through the
    /// reverse index are visited. A segment is active when its active connected
    /// count reaches `activation_threshold` and matching when its active
    /// potential count reaches `min_threshold`.
    ///
    /// `active_presynaptic_cells` must not contain duplicates.
    pub fn compute_activity(
        &self,
        active_presynaptic_cells: &[CellIdx],
        activation_threshold: u32,
        min_threshold: u32,
    ) -> SegmentActivity {
        let n = self.segments.len();
        let mut num_active_connected = vec![0 as SynapseIdx; n];
        let mut num_active_potential = vec![0 as SynapseIdx; n];
        let mut touched: Vec<Segment> = Vec::new();

        for cell in active_presynaptic_cells {
            let Some(synapses) = self.synapses_for_presynaptic_cell.get(cell) else {
                continue;
            };
            for &synapse in synapses {
                let data = &self.synapses[synapse as usize];
                let seg = data.segment as usize;
                if num_active_potential[seg] == 0 {
                    touched.push(data.segment);
                }
                num_active_potential[seg] += 1;
                if data.permanence > self.connected_permanence {
                    num_active_connected[seg] += 1;
                }
            }
        }

        touched.sort_unstable_by(|&a, &b| self.compare_segments(a, b));

        let active = touched
            .iter()
            .copied()
            .filter(|&s| u32::from(num_active_connected[s as usize]) >= activation_threshold)
            .collect();
        let matching = touched
            .iter()
            .copied()
            .filter(|&s| u32::from(num_active_potential[s as usize]) >= min_threshold)
            .collect();

        SegmentActivity {
            num_active_connected,
            num_active_potential,
            active,
            matching,
        }
    }

    // ========================================================================
    // Learning operations
    // ========================================================================

    /// Adapts a segment based on active inputs.
    ///
    /// Synapses whose presynaptic cell is active in `inputs` gain `increment`,
    /// all others lose `decrement`. Permanences are clamped to `[0, 1]` and
    /// synapses that reach zero are destroyed. The segment itself survives
    /// even if it ends up empty.
    pub fn adapt_segment(
        &mut self,
        segment: Segment,
        inputs: &Sdr,
        increment: Permanence,
        decrement: Permanence,
        iteration: u64,
    ) {
        self.touch_segment(segment, iteration);

        let synapses: Vec<Synapse> = self.segments[segment as usize].synapses.to_vec();
        let mut synapses_to_destroy = Vec::new();

        inputs.with_dense(|active| {
            for &synapse in &synapses {
                let data = &self.synapses[synapse as usize];
                let is_active = active
                    .get(data.presynaptic_cell as usize)
                    .is_some_and(|&v| v != 0);
                let delta = if is_active { increment } else { -decrement };

                let old_perm = data.permanence;
                let new_perm = (old_perm + delta).clamp(MIN_PERMANENCE, MAX_PERMANENCE);
                if new_perm < EPSILON {
                    synapses_to_destroy.push(synapse);
                } else if new_perm != old_perm {
                    self.update_synapse_permanence(synapse, new_perm);
                }
            }
        });

        for synapse in synapses_to_destroy {
            self.destroy_synapse(synapse);
        }
    }

    /// Grows up to `max_new` synapses from `candidates` onto `segment`.
    ///
    /// Candidates the segment already reads from are skipped. If growing would
    /// overrun the synapse limit, the weakest synapses to cells outside
    /// `candidates` are destroyed first. Picks are drawn from `rng` so growth
    /// order is a pure function of the generator state.
    ///
    /// Returns the number of synapses created.
    pub fn grow_synapses(
        &mut self,
        segment: Segment,
        candidates: &[CellIdx],
        max_new: usize,
        initial_permanence: Permanence,
        rng: &mut Random,
        iteration: u64,
    ) -> usize {
        self.touch_segment(segment, iteration);

        let mut protected: Vec<CellIdx> = candidates.to_vec();
        protected.sort_unstable();
        protected.dedup();

        let mut pool = protected.clone();
        for &synapse in &self.segments[segment as usize].synapses {
            let presynaptic_cell = self.synapses[synapse as usize].presynaptic_cell;
            if let Ok(i) = pool.binary_search(&presynaptic_cell) {
                pool.remove(i);
            }
        }

        let mut num_new = max_new.min(pool.len());
        if num_new == 0 {
            return 0;
        }

        let max_synapses = self.max_synapses_per_segment.max(1) as usize;
        let overrun = (self.num_synapses_on_segment(segment) + num_new).saturating_sub(max_synapses);
        if overrun > 0 {
            self.destroy_min_permanence_synapses(segment, overrun, &protected);
        }
        num_new = num_new.min(max_synapses.saturating_sub(self.num_synapses_on_segment(segment)));

        for _ in 0..num_new {
            let i = rng.get_usize(pool.len());
            let cell = pool.remove(i);
            self.create_synapse(segment, cell, initial_permanence, iteration);
        }

        num_new
    }

    /// Destroys up to `n_destroy` of the weakest synapses on a segment.
    ///
    /// Synapses to cells in `exclude_cells` (sorted) are spared. Ties on
    /// permanence go to the oldest synapse. Returns the number destroyed.
    pub fn destroy_min_permanence_synapses(
        &mut self,
        segment: Segment,
        n_destroy: usize,
        exclude_cells: &[CellIdx],
    ) -> usize {
        if n_destroy == 0 {
            return 0;
        }

        let mut candidates: Vec<(Permanence, u64, Synapse)> = self.segments[segment as usize]
            .synapses
            .iter()
            .filter_map(|&s| {
                let data = &self.synapses[s as usize];
                if exclude_cells.binary_search(&data.presynaptic_cell).is_ok() {
                    None
                } else {
                    Some((data.permanence, data.ordinal, s))
                }
            })
            .collect();

        candidates.sort_unstable_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        candidates.truncate(n_destroy);

        for &(permanence, _, synapse) in &candidates {
            trace!(segment, synapse, permanence, "evicting weakest synapse");
            self.destroy_synapse(synapse);
        }
        candidates.len()
    }
}

impl PartialEq for Connections {
    fn eq(&self, other: &Self) -> bool {
        if self.cells.len() != other.cells.len()
            || self.connected_permanence.to_bits() != other.connected_permanence.to_bits()
            || self.max_segments_per_cell != other.max_segments_per_cell
            || self.max_synapses_per_segment != other.max_synapses_per_segment
            || self.num_segments() != other.num_segments()
            || self.num_synapses() != other.num_synapses()
        {
            return false;
        }

        self.cells.iter().zip(&other.cells).all(|(a, b)| {
            a.segments.len() == b.segments.len()
                && a.segments.iter().zip(&b.segments).all(|(&sa, &sb)| {
                    let da = &self.segments[sa as usize];
                    let db = &other.segments[sb as usize];
                    da.created_iteration == db.created_iteration
                        && da.last_used_iteration == db.last_used_iteration
                        && da.num_connected == db.num_connected
                        && da.synapses.len() == db.synapses.len()
                        && da.synapses.iter().zip(&db.synapses).all(|(&ya, &yb)| {
                            let pa = &self.synapses[ya as usize];
                            let pb = &other.synapses[yb as usize];
                            pa.presynaptic_cell == pb.presynaptic_cell
                                && pa.permanence.to_bits() == pb.permanence.to_bits()
                        })
                })
        })
    }
}
