//! Temporal Memory implementation.
//!
//! The Temporal Memory learns sequences of column activations. Each timestep
//! runs in two phases:
//!
//! 1. [`TemporalMemory::activate_dendrites`] classifies segments as active or
//!    matching from the cells that were active on the previous step (plus any
//!    extra external input). The result is cached until phase 2 runs.
//! 2. [`TemporalMemory::activate_cells`] turns the active columns into active
//!    and winner cells, bursting unpredicted columns, and applies learning to
//!    the [`Connections`] graph.
//!
//! [`TemporalMemory::compute`] runs both phases.

use crate::algorithms::{Connections, ConnectionsParams};
use crate::error::{MnemosError, Result};
use crate::types::{CellIdx, Permanence, Sdr, Segment, SegmentIdx, SynapseIdx, UInt};
use crate::utils::Random;

use std::fmt;
use tracing::{debug, trace};

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Version of the Temporal Memory state layout.
pub const TM_VERSION: UInt = 3;

/// Parameters for creating a Temporal Memory.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct TemporalMemoryParams {
    /// Dimensions of the column space.
    pub column_dimensions: Vec<UInt>,

    /// Number of cells per column.
    pub cells_per_column: UInt,

    /// Active connected synapses needed for a segment to be active.
    pub activation_threshold: UInt,

    /// Initial permanence for new synapses.
    pub initial_permanence: Permanence,

    /// A synapse is connected when its permanence is strictly above this.
    pub connected_permanence: Permanence,

    /// Active potential synapses needed for a segment to be matching.
    pub min_threshold: UInt,

    /// Maximum number of synapses grown on a segment per learning step.
    pub max_new_synapse_count: UInt,

    /// Amount to increment permanence for active synapses.
    pub permanence_increment: Permanence,

    /// Amount to decrement permanence for inactive synapses.
    pub permanence_decrement: Permanence,

    /// Amount to decrement permanence of matching segments that predicted a
    /// column which then stayed inactive, or that lost a bursting column to
    /// another cell. Zero disables punishment.
    pub predicted_segment_decrement: Permanence,

    /// Random seed.
    pub seed: u64,

    /// Maximum number of segments per cell.
    pub max_segments_per_cell: UInt,

    /// Maximum number of synapses per segment.
    pub max_synapses_per_segment: UInt,

    /// Reject unsorted or duplicate active columns.
    pub check_inputs: bool,

    /// Number of external presynaptic inputs available to every segment.
    pub extra: UInt,
}

impl Default for TemporalMemoryParams {
    fn default() -> Self {
        Self {
            column_dimensions: vec![2048],
            cells_per_column: 32,
            activation_threshold: 13,
            initial_permanence: 0.21,
            connected_permanence: 0.5,
            min_threshold: 10,
            max_new_synapse_count: 20,
            permanence_increment: 0.1,
            permanence_decrement: 0.1,
            predicted_segment_decrement: 0.0,
            seed: 42,
            max_segments_per_cell: 255,
            max_synapses_per_segment: 255,
            check_inputs: true,
            extra: 0,
        }
    }
}

impl TemporalMemoryParams {
    /// Checks every parameter, reporting the first invalid one.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::InvalidParameter`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.column_dimensions.is_empty() {
            return Err(invalid("column_dimensions", "Cannot be empty"));
        }
        if self.column_dimensions.contains(&0) {
            return Err(invalid("column_dimensions", "Every dimension must be > 0"));
        }
        if self.cells_per_column == 0 {
            return Err(invalid("cells_per_column", "Must be > 0"));
        }

        let permanences = [
            ("initial_permanence", self.initial_permanence),
            ("connected_permanence", self.connected_permanence),
            ("permanence_increment", self.permanence_increment),
            ("permanence_decrement", self.permanence_decrement),
            ("predicted_segment_decrement", self.predicted_segment_decrement),
        ];
        for (name, value) in permanences {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(name, &format!("Must be within [0, 1], got {value}")));
            }
        }

        if self.max_segments_per_cell == 0 || self.max_segments_per_cell > UInt::from(SegmentIdx::MAX) {
            return Err(invalid(
                "max_segments_per_cell",
                &format!("Must be within [1, {}]", SegmentIdx::MAX),
            ));
        }
        if self.max_synapses_per_segment == 0
            || self.max_synapses_per_segment > UInt::from(SynapseIdx::MAX)
        {
            return Err(invalid(
                "max_synapses_per_segment",
                &format!("Must be within [1, {}]", SynapseIdx::MAX),
            ));
        }

        let total = self
            .column_dimensions
            .iter()
            .try_fold(u64::from(self.cells_per_column), |acc, &d| acc.checked_mul(u64::from(d)))
            .and_then(|cells| cells.checked_add(u64::from(self.extra)));
        if total.map_or(true, |t| t > u64::from(CellIdx::MAX)) {
            return Err(invalid(
                "column_dimensions",
                "Number of cells plus extra inputs does not fit a cell index",
            ));
        }

        Ok(())
    }

    /// Number of columns described by `column_dimensions`.
    pub fn num_columns(&self) -> usize {
        self.column_dimensions.iter().map(|&d| d as usize).product()
    }
}

fn invalid(name: &'static str, message: &str) -> MnemosError {
    MnemosError::InvalidParameter {
        name,
        message: message.to_string(),
    }
}

impl fmt::Display for TemporalMemoryParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Temporal Memory Parameters")?;
        writeln!(f, "version                     = {TM_VERSION}")?;
        writeln!(f, "column_dimensions           = {:?}", self.column_dimensions)?;
        writeln!(f, "cells_per_column            = {}", self.cells_per_column)?;
        writeln!(f, "activation_threshold        = {}", self.activation_threshold)?;
        writeln!(f, "initial_permanence          = {}", self.initial_permanence)?;
        writeln!(f, "connected_permanence        = {}", self.connected_permanence)?;
        writeln!(f, "min_threshold               = {}", self.min_threshold)?;
        writeln!(f, "max_new_synapse_count       = {}", self.max_new_synapse_count)?;
        writeln!(f, "permanence_increment        = {}", self.permanence_increment)?;
        writeln!(f, "permanence_decrement        = {}", self.permanence_decrement)?;
        writeln!(f, "predicted_segment_decrement = {}", self.predicted_segment_decrement)?;
        writeln!(f, "max_segments_per_cell       = {}", self.max_segments_per_cell)?;
        writeln!(f, "max_synapses_per_segment    = {}", self.max_synapses_per_segment)?;
        writeln!(f, "check_inputs                = {}", self.check_inputs)?;
        writeln!(f, "extra                       = {}", self.extra)?;
        write!(f, "seed                        = {}", self.seed)
    }
}

/// The Temporal Memory algorithm.
///
/// # Example
///
/// ```rust
/// use mnemos::algorithms::{TemporalMemory, TemporalMemoryParams};
/// use mnemos::types::Sdr;
///
/// let mut tm = TemporalMemory::new(TemporalMemoryParams {
///     column_dimensions: vec![100],
///     cells_per_column: 4,
///     ..Default::default()
/// }).unwrap();
///
/// let mut active_columns = Sdr::new(&[100]);
/// active_columns.set_sparse(&[1, 5, 10, 20]).unwrap();
///
/// tm.compute(&active_columns, true).unwrap();
///
/// // Nothing was predicted, so every column bursts.
/// assert_eq!(tm.active_cells().len(), 16);
/// assert_eq!(tm.winner_cells().len(), 4);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TemporalMemory {
    // Configuration
    column_dimensions: Vec<UInt>,
    cells_per_column: UInt,
    num_columns: usize,
    num_cells: usize,
    activation_threshold: UInt,
    initial_permanence: Permanence,
    connected_permanence: Permanence,
    min_threshold: UInt,
    max_new_synapse_count: UInt,
    permanence_increment: Permanence,
    permanence_decrement: Permanence,
    predicted_segment_decrement: Permanence,
    max_segments_per_cell: UInt,
    max_synapses_per_segment: UInt,
    check_inputs: bool,
    extra: UInt,
    seed: u64,

    // Connections
    connections: Connections,

    // Current timestep
    active_cells: Vec<CellIdx>,
    winner_cells: Vec<CellIdx>,
    active_segments: Vec<Segment>,
    matching_segments: Vec<Segment>,
    num_active_potential_synapses_for_segment: Vec<SynapseIdx>,

    // Presynaptic inputs captured by the last dendrite activation: prior
    // active cells plus extra winners (reinforcement), prior winner cells plus
    // extra winners (growth).
    learning_inputs: Vec<CellIdx>,
    winner_inputs: Vec<CellIdx>,
    segments_valid: bool,

    // RNG
    rng: Random,

    // Iteration counter
    iteration: u64,
}

impl TemporalMemory {
    /// Creates a new Temporal Memory with the given parameters.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::InvalidParameter`] if the parameters are invalid.
    pub fn new(params: TemporalMemoryParams) -> Result<Self> {
        params.validate()?;

        let num_columns = params.num_columns();
        let num_cells = num_columns * params.cells_per_column as usize;

        debug!(
            columns = num_columns,
            cells_per_column = params.cells_per_column,
            extra = params.extra,
            seed = params.seed,
            "creating temporal memory"
        );

        Ok(Self {
            num_columns,
            num_cells,
            cells_per_column: params.cells_per_column,
            activation_threshold: params.activation_threshold,
            initial_permanence: params.initial_permanence,
            connected_permanence: params.connected_permanence,
            min_threshold: params.min_threshold,
            max_new_synapse_count: params.max_new_synapse_count,
            permanence_increment: params.permanence_increment,
            permanence_decrement: params.permanence_decrement,
            predicted_segment_decrement: params.predicted_segment_decrement,
            max_segments_per_cell: params.max_segments_per_cell,
            max_synapses_per_segment: params.max_synapses_per_segment,
            check_inputs: params.check_inputs,
            extra: params.extra,
            seed: params.seed,

            connections: Connections::new(ConnectionsParams {
                num_cells: (num_cells + params.extra as usize) as CellIdx,
                connected_permanence: params.connected_permanence,
                max_segments_per_cell: params.max_segments_per_cell as SegmentIdx,
                max_synapses_per_segment: params.max_synapses_per_segment as SynapseIdx,
            }),

            active_cells: Vec::new(),
            winner_cells: Vec::new(),
            active_segments: Vec::new(),
            matching_segments: Vec::new(),
            num_active_potential_synapses_for_segment: Vec::new(),

            learning_inputs: Vec::new(),
            winner_inputs: Vec::new(),
            segments_valid: false,

            rng: Random::new(params.seed),
            iteration: 0,
            column_dimensions: params.column_dimensions,
        })
    }

    // ========================================================================
    // Compute
    // ========================================================================

    /// Runs one full timestep: dendrite activation, then cell activation.
    ///
    /// # Errors
    ///
    /// Returns an error if `active_columns` does not match the column space.
    /// Nothing is modified in that case.
    pub fn compute(&mut self, active_columns: &Sdr, learn: bool) -> Result<()> {
        self.compute_with_extra(active_columns, learn, &[], &[])
    }

    /// Runs one full timestep with extra external presynaptic input.
    ///
    /// `extra_active` and `extra_winners` index into `[0, extra)`; segments
    /// see them as cells `num_cells() + i`. `extra_winners` is expected to be a
    /// subset of `extra_active`. Segment activity counts `extra_active`, while
    /// learning treats only `extra_winners` as active.
    ///
    /// # Errors
    ///
    /// Returns an error if `active_columns` does not match the column space or
    /// an extra index is out of range. Nothing is modified in that case.
    pub fn compute_with_extra(
        &mut self,
        active_columns: &Sdr,
        learn: bool,
        extra_active: &[CellIdx],
        extra_winners: &[CellIdx],
    ) -> Result<()> {
        let columns = self.columns_from_sdr(active_columns)?;
        self.check_extra(extra_active)?;
        self.check_extra(extra_winners)?;

        self.activate_dendrites_with_extra(learn, extra_active, extra_winners)?;
        self.activate_columns(&columns, learn);
        Ok(())
    }

    /// Classifies segments from the current active cells.
    ///
    /// Repeated calls before the next [`activate_cells`](Self::activate_cells)
    /// reuse the cached classification and have no side effects.
    pub fn activate_dendrites(&mut self, learn: bool) {
        if self.segments_valid {
            return;
        }
        self.compute_dendrites(learn, &[], &[]);
    }

    /// Classifies segments from the current active cells plus extra inputs.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::IndexOutOfBounds`] if an extra index is not
    /// below `extra`.
    pub fn activate_dendrites_with_extra(
        &mut self,
        learn: bool,
        extra_active: &[CellIdx],
        extra_winners: &[CellIdx],
    ) -> Result<()> {
        if self.segments_valid {
            return Ok(());
        }
        self.check_extra(extra_active)?;
        self.check_extra(extra_winners)?;
        self.compute_dendrites(learn, extra_active, extra_winners);
        Ok(())
    }

    fn compute_dendrites(&mut self, learn: bool, extra_active: &[CellIdx], extra_winners: &[CellIdx]) {
        let offset = self.num_cells as CellIdx;
        let active_inputs = merge_inputs(&self.active_cells, extra_active, offset);
        self.learning_inputs = merge_inputs(&self.active_cells, extra_winners, offset);
        self.winner_inputs = merge_inputs(&self.winner_cells, extra_winners, offset);

        let activity = self.connections.compute_activity(
            &active_inputs,
            self.activation_threshold,
            self.min_threshold,
        );
        self.active_segments = activity.active;
        self.matching_segments = activity.matching;
        self.num_active_potential_synapses_for_segment = activity.num_active_potential;

        if learn {
            for &segment in &self.active_segments {
                self.connections.touch_segment(segment, self.iteration);
            }
            self.iteration += 1;
        }

        self.segments_valid = true;
    }

    /// Activates cells for the given active columns and learns.
    ///
    /// Runs an implicit [`activate_dendrites`](Self::activate_dendrites) if no
    /// classification is cached. Afterwards the classification is invalid.
    ///
    /// # Errors
    ///
    /// Returns an error if `active_columns` does not match the column space.
    pub fn activate_cells(&mut self, active_columns: &Sdr, learn: bool) -> Result<()> {
        let columns = self.columns_from_sdr(active_columns)?;
        self.activate_columns(&columns, learn);
        Ok(())
    }

    /// Activates cells for active column indices given as a raw slice.
    ///
    /// With `check_inputs` enabled the slice must be sorted and free of
    /// duplicates; otherwise it is sorted internally.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::InvalidInput`] for unsorted or duplicate columns
    /// under `check_inputs`, and [`MnemosError::IndexOutOfBounds`] for a
    /// column outside the column space.
    pub fn activate_cells_sparse(&mut self, active_columns: &[UInt], learn: bool) -> Result<()> {
        if self.check_inputs {
            if let Some(w) = active_columns.windows(2).find(|w| w[1] <= w[0]) {
                return Err(MnemosError::InvalidInput(format!(
                    "Active columns must be sorted and unique: {} follows {}",
                    w[1], w[0]
                )));
            }
        }
        if let Some(&column) = active_columns.iter().find(|&&c| c as usize >= self.num_columns) {
            return Err(MnemosError::IndexOutOfBounds {
                index: column as usize,
                size: self.num_columns,
            });
        }

        let mut columns = active_columns.to_vec();
        if !self.check_inputs {
            columns.sort_unstable();
            columns.dedup();
        }
        self.activate_columns(&columns, learn);
        Ok(())
    }

    fn columns_from_sdr(&self, active_columns: &Sdr) -> Result<Vec<UInt>> {
        if active_columns.size() != self.num_columns {
            return Err(MnemosError::DimensionMismatch {
                expected: self.column_dimensions.clone(),
                actual: active_columns.dimensions().to_vec(),
            });
        }
        Ok(active_columns.get_sparse())
    }

    fn check_extra(&self, extra: &[CellIdx]) -> Result<()> {
        match extra.iter().find(|&&e| e >= self.extra) {
            Some(&e) => Err(MnemosError::IndexOutOfBounds {
                index: e as usize,
                size: self.extra as usize,
            }),
            None => Ok(()),
        }
    }

    /// Cell activation over sorted, unique, in-range columns.
    fn activate_columns(&mut self, active_columns: &[UInt], learn: bool) {
        if !self.segments_valid {
            trace!(iteration = self.iteration, "activating dendrites implicitly");
            self.compute_dendrites(learn, &[], &[]);
        }

        let active_segments = std::mem::take(&mut self.active_segments);
        let matching_segments = std::mem::take(&mut self.matching_segments);
        let winner_inputs = std::mem::take(&mut self.winner_inputs);
        let mut inputs = Sdr::new(&[self.connections.num_cells() as UInt]);
        inputs.set_sparse_unchecked(std::mem::take(&mut self.learning_inputs));

        let mut columns: Vec<UInt> = active_columns.to_vec();
        columns.extend(
            active_segments
                .iter()
                .chain(&matching_segments)
                .map(|&s| self.column_for_segment(s)),
        );
        columns.sort_unstable();
        columns.dedup();

        self.active_cells.clear();
        self.winner_cells.clear();

        for column in columns {
            let column_active = self.segments_in_column(&active_segments, column);
            let column_matching = self.segments_in_column(&matching_segments, column);

            if active_columns.binary_search(&column).is_ok() {
                if column_active.is_empty() {
                    self.burst_column(column, column_matching, &inputs, &winner_inputs, learn);
                } else {
                    self.activate_predicted_column(column_active, &inputs, &winner_inputs, learn);
                }
            } else if learn && self.predicted_segment_decrement > 0.0 {
                self.punish_segments(column_matching, &inputs);
            }
        }

        self.segments_valid = false;
    }

    /// Activates the cells of a correctly predicted column.
    fn activate_predicted_column(
        &mut self,
        column_active_segments: &[Segment],
        inputs: &Sdr,
        winner_inputs: &[CellIdx],
        learn: bool,
    ) {
        for &segment in column_active_segments {
            let cell = self.connections.cell_for_segment(segment);
            if self.active_cells.last() != Some(&cell) {
                self.active_cells.push(cell);
                self.winner_cells.push(cell);
            }

            if learn {
                self.learn_on_segment(segment, inputs, winner_inputs);
            }
        }
    }

    /// Bursts a column (activates all cells when unpredicted).
    fn burst_column(
        &mut self,
        column: UInt,
        column_matching_segments: &[Segment],
        inputs: &Sdr,
        winner_inputs: &[CellIdx],
        learn: bool,
    ) {
        let cells = self.column_cells(column);
        self.active_cells.extend(cells.clone());

        let best_matching = self.best_matching_segment(column_matching_segments);

        let winner_cell = if let Some(segment) = best_matching {
            if learn {
                self.learn_on_segment(segment, inputs, winner_inputs);
            }
            self.connections.cell_for_segment(segment)
        } else {
            let cell = self.least_used_cell(cells);

            let num_new = (self.max_new_synapse_count as usize).min(winner_inputs.len());
            if learn && num_new > 0 {
                let segment = self.connections.create_segment(cell, self.iteration);
                self.connections.grow_synapses(
                    segment,
                    winner_inputs,
                    num_new,
                    self.initial_permanence,
                    &mut self.rng,
                    self.iteration,
                );
            }

            cell
        };

        // Matching segments that lost the column to another cell.
        if learn && self.predicted_segment_decrement > 0.0 {
            let losers: Vec<Segment> = column_matching_segments
                .iter()
                .copied()
                .filter(|&s| self.connections.cell_for_segment(s) != winner_cell)
                .collect();
            self.punish_segments(&losers, inputs);
        }

        self.winner_cells.push(winner_cell);
    }

    /// Weakens the synapses of false predictions that read from active inputs.
    ///
    /// Used for matching segments in columns that received no input and for
    /// matching segments on non-winner cells of a bursting column.
    fn punish_segments(&mut self, segments: &[Segment], inputs: &Sdr) {
        for &segment in segments {
            self.connections.adapt_segment(
                segment,
                inputs,
                -self.predicted_segment_decrement,
                0.0,
                self.iteration,
            );
        }
    }

    /// Reinforces a segment and tops it up with synapses to prior winners.
    fn learn_on_segment(&mut self, segment: Segment, inputs: &Sdr, winner_inputs: &[CellIdx]) {
        self.connections.adapt_segment(
            segment,
            inputs,
            self.permanence_increment,
            self.permanence_decrement,
            self.iteration,
        );

        let num_active = self
            .num_active_potential_synapses_for_segment
            .get(segment as usize)
            .copied()
            .unwrap_or(0);
        let num_new = (self.max_new_synapse_count as usize).saturating_sub(num_active as usize);

        if num_new > 0 {
            self.connections.grow_synapses(
                segment,
                winner_inputs,
                num_new,
                self.initial_permanence,
                &mut self.rng,
                self.iteration,
            );
        }
    }

    /// First segment with the most active potential synapses.
    ///
    /// Segments arrive ordered by cell, so ties go to the lowest cell.
    fn best_matching_segment(&self, segments: &[Segment]) -> Option<Segment> {
        let mut best: Option<(Segment, SynapseIdx)> = None;
        for &segment in segments {
            let score = self.num_active_potential_synapses_for_segment[segment as usize];
            if best.map_or(true, |(_, s)| score > s) {
                best = Some((segment, score));
            }
        }
        best.map(|(segment, _)| segment)
    }

    /// Cell with the fewest segments; ties are drawn from the RNG.
    fn least_used_cell(&mut self, cells: std::ops::Range<CellIdx>) -> CellIdx {
        let fewest = cells
            .clone()
            .map(|c| self.connections.num_segments_on_cell(c))
            .min()
            .unwrap_or(0);
        let candidates: Vec<CellIdx> = cells
            .filter(|&c| self.connections.num_segments_on_cell(c) == fewest)
            .collect();

        match candidates.len() {
            0 => 0,
            1 => candidates[0],
            n => candidates[self.rng.get_usize(n)],
        }
    }

    /// Sub-slice of `segments` (ordered by cell) owned by cells of `column`.
    fn segments_in_column<'a>(&self, segments: &'a [Segment], column: UInt) -> &'a [Segment] {
        let start = segments.partition_point(|&s| self.column_for_segment(s) < column);
        let end = segments.partition_point(|&s| self.column_for_segment(s) <= column);
        &segments[start..end]
    }

    #[inline]
    fn column_for_segment(&self, segment: Segment) -> UInt {
        self.connections.cell_for_segment(segment) / self.cells_per_column
    }

    #[inline]
    fn column_cells(&self, column: UInt) -> std::ops::Range<CellIdx> {
        let start = column * self.cells_per_column;
        start..start + self.cells_per_column
    }

    /// Clears the per-timestep state. Learned connections are kept.
    pub fn reset(&mut self) {
        self.active_cells.clear();
        self.winner_cells.clear();
        self.active_segments.clear();
        self.matching_segments.clear();
        self.num_active_potential_synapses_for_segment.clear();
        self.learning_inputs.clear();
        self.winner_inputs.clear();
        self.segments_valid = false;
    }

    /// Restarts the random number generator from `seed`.
    pub fn reseed(&mut self, seed: u64) {
        self.seed = seed;
        self.rng.reseed(seed);
    }

    /// Creates a segment on `cell`, stamped with the current iteration.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::IndexOutOfBounds`] if `cell` is not a column cell.
    pub fn create_segment(&mut self, cell: CellIdx) -> Result<Segment> {
        self.check_cell(cell)?;
        Ok(self.connections.create_segment(cell, self.iteration))
    }

    // ========================================================================
    // Cell/Column utilities
    // ========================================================================

    /// Returns the cells belonging to a column.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::IndexOutOfBounds`] for an unknown column.
    pub fn cells_for_column(&self, column: UInt) -> Result<Vec<CellIdx>> {
        if column as usize >= self.num_columns {
            return Err(MnemosError::IndexOutOfBounds {
                index: column as usize,
                size: self.num_columns,
            });
        }
        Ok(self.column_cells(column).collect())
    }

    /// Returns the column a cell belongs to.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::IndexOutOfBounds`] for an unknown cell.
    pub fn column_for_cell(&self, cell: CellIdx) -> Result<UInt> {
        self.check_cell(cell)?;
        Ok(cell / self.cells_per_column)
    }

    fn check_cell(&self, cell: CellIdx) -> Result<()> {
        if cell as usize >= self.num_cells {
            return Err(MnemosError::IndexOutOfBounds {
                index: cell as usize,
                size: self.num_cells,
            });
        }
        Ok(())
    }

    /// Cross-checks a freshly loaded instance against its own parameters.
    #[cfg(feature = "serde")]
    pub(crate) fn check_loaded_state(&self) -> Result<()> {
        let corrupt = |message: String| MnemosError::SerializationError { message };

        self.params()
            .validate()
            .map_err(|e| corrupt(format!("stored parameters are invalid: {e}")))?;

        let num_columns: usize = self.column_dimensions.iter().map(|&d| d as usize).product();
        if num_columns != self.num_columns
            || self.num_cells != num_columns * self.cells_per_column as usize
        {
            return Err(corrupt("cell counts disagree with the column shape".to_string()));
        }

        let graph = &self.connections;
        let graph_cells = self.num_cells + self.extra as usize;
        if graph.num_cells() != graph_cells
            || graph.connected_permanence().to_bits() != self.connected_permanence.to_bits()
            || UInt::from(graph.max_segments_per_cell()) != self.max_segments_per_cell
            || UInt::from(graph.max_synapses_per_segment()) != self.max_synapses_per_segment
        {
            return Err(corrupt(format!(
                "connections ({} cells) disagree with the parameters ({graph_cells} cells)",
                graph.num_cells()
            )));
        }

        let cells_ok = |cells: &[CellIdx], limit: usize| cells.iter().all(|&c| (c as usize) < limit);
        if !cells_ok(&self.active_cells, self.num_cells)
            || !cells_ok(&self.winner_cells, self.num_cells)
            || !cells_ok(&self.learning_inputs, graph_cells)
            || !cells_ok(&self.winner_inputs, graph_cells)
        {
            return Err(corrupt("per-step cell lists hold unknown cells".to_string()));
        }

        let counts = self.num_active_potential_synapses_for_segment.len();
        let segment_ok = |&s: &Segment| graph.is_segment_alive(s) && (s as usize) < counts;
        if !self.active_segments.iter().all(segment_ok)
            || !self.matching_segments.iter().all(segment_ok)
        {
            return Err(corrupt("per-step segment lists hold dead segments".to_string()));
        }

        Ok(())
    }

    // ========================================================================
    // Outputs
    // ========================================================================

    /// Returns the currently active cells, sorted.
    pub fn active_cells(&self) -> &[CellIdx] {
        &self.active_cells
    }

    /// Returns the winner cells from the last compute, sorted.
    pub fn winner_cells(&self) -> &[CellIdx] {
        &self.winner_cells
    }

    /// Returns the cells with at least one active segment, sorted.
    ///
    /// Empty unless a dendrite activation has run since the last cell
    /// activation.
    pub fn predictive_cells(&self) -> Vec<CellIdx> {
        if !self.segments_valid {
            return Vec::new();
        }
        let mut cells: Vec<CellIdx> = self
            .active_segments
            .iter()
            .map(|&s| self.connections.cell_for_segment(s))
            .collect();
        cells.dedup();
        cells
    }

    /// Returns the active segments, ordered by cell.
    ///
    /// Empty unless a dendrite activation has run since the last cell
    /// activation.
    pub fn active_segments(&self) -> &[Segment] {
        if self.segments_valid {
            &self.active_segments
        } else {
            &[]
        }
    }

    /// Returns the matching segments, ordered by cell.
    ///
    /// Empty unless a dendrite activation has run since the last cell
    /// activation.
    pub fn matching_segments(&self) -> &[Segment] {
        if self.segments_valid {
            &self.matching_segments
        } else {
            &[]
        }
    }

    /// Active potential synapse counts from the last dendrite activation,
    /// indexed by segment. Empty when no classification is cached.
    pub fn num_active_potential_synapses_for_segment(&self) -> &[SynapseIdx] {
        if self.segments_valid {
            &self.num_active_potential_synapses_for_segment
        } else {
            &[]
        }
    }

    fn cells_sdr(&self, cells: &[CellIdx]) -> Sdr {
        let mut dimensions = self.column_dimensions.clone();
        dimensions.push(self.cells_per_column);
        let mut sdr = Sdr::new(&dimensions);
        sdr.set_sparse_unchecked(cells.to_vec());
        sdr
    }

    /// Returns the active cells as an SDR shaped `column_dimensions ++ [cells_per_column]`.
    pub fn active_cells_sdr(&self) -> Sdr {
        self.cells_sdr(&self.active_cells)
    }

    /// Returns the winner cells as an SDR.
    pub fn winner_cells_sdr(&self) -> Sdr {
        self.cells_sdr(&self.winner_cells)
    }

    /// Returns the predictive cells as an SDR.
    pub fn predictive_cells_sdr(&self) -> Sdr {
        self.cells_sdr(&self.predictive_cells())
    }

    // ========================================================================
    // Getters
    // ========================================================================

    /// Version of the state layout.
    pub fn version(&self) -> UInt {
        TM_VERSION
    }

    /// Returns a snapshot of the current parameters.
    pub fn params(&self) -> TemporalMemoryParams {
        TemporalMemoryParams {
            column_dimensions: self.column_dimensions.clone(),
            cells_per_column: self.cells_per_column,
            activation_threshold: self.activation_threshold,
            initial_permanence: self.initial_permanence,
            connected_permanence: self.connected_permanence,
            min_threshold: self.min_threshold,
            max_new_synapse_count: self.max_new_synapse_count,
            permanence_increment: self.permanence_increment,
            permanence_decrement: self.permanence_decrement,
            predicted_segment_decrement: self.predicted_segment_decrement,
            seed: self.seed,
            max_segments_per_cell: self.max_segments_per_cell,
            max_synapses_per_segment: self.max_synapses_per_segment,
            check_inputs: self.check_inputs,
            extra: self.extra,
        }
    }

    /// Returns the column dimensions.
    pub fn column_dimensions(&self) -> &[UInt] {
        &self.column_dimensions
    }

    /// Returns the number of columns.
    pub fn num_columns(&self) -> usize {
        self.num_columns
    }

    /// Returns the number of cells per column.
    pub fn cells_per_column(&self) -> UInt {
        self.cells_per_column
    }

    /// Returns the number of column cells (extra inputs excluded).
    pub fn num_cells(&self) -> usize {
        self.num_cells
    }

    /// Returns the number of extra presynaptic inputs.
    pub fn extra(&self) -> UInt {
        self.extra
    }

    /// Returns a reference to the connections.
    pub fn connections(&self) -> &Connections {
        &self.connections
    }

    /// Returns the activation threshold.
    pub fn activation_threshold(&self) -> UInt {
        self.activation_threshold
    }

    /// Returns the initial permanence.
    pub fn initial_permanence(&self) -> Permanence {
        self.initial_permanence
    }

    /// Returns the connected permanence threshold.
    pub fn connected_permanence(&self) -> Permanence {
        self.connected_permanence
    }

    /// Returns the minimum threshold for matching.
    pub fn min_threshold(&self) -> UInt {
        self.min_threshold
    }

    /// Returns the maximum number of synapses grown per learning step.
    pub fn max_new_synapse_count(&self) -> UInt {
        self.max_new_synapse_count
    }

    /// Returns the permanence increment.
    pub fn permanence_increment(&self) -> Permanence {
        self.permanence_increment
    }

    /// Returns the permanence decrement.
    pub fn permanence_decrement(&self) -> Permanence {
        self.permanence_decrement
    }

    /// Returns the predicted segment decrement.
    pub fn predicted_segment_decrement(&self) -> Permanence {
        self.predicted_segment_decrement
    }

    /// Returns the segment limit per cell.
    pub fn max_segments_per_cell(&self) -> UInt {
        self.max_segments_per_cell
    }

    /// Returns the synapse limit per segment.
    pub fn max_synapses_per_segment(&self) -> UInt {
        self.max_synapses_per_segment
    }

    /// Returns whether active columns are validated.
    pub fn check_inputs(&self) -> bool {
        self.check_inputs
    }

    /// Returns the seed the RNG was last started from.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Returns the current iteration.
    pub fn iteration(&self) -> u64 {
        self.iteration
    }

    // ========================================================================
    // Setters
    // ========================================================================

    /// Sets the activation threshold.
    pub fn set_activation_threshold(&mut self, value: UInt) {
        self.activation_threshold = value;
    }

    /// Sets the initial permanence.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is outside `[0, 1]`.
    pub fn set_initial_permanence(&mut self, value: Permanence) -> Result<()> {
        self.initial_permanence = check_permanence("initial_permanence", value)?;
        Ok(())
    }

    /// Sets the minimum threshold for matching.
    pub fn set_min_threshold(&mut self, value: UInt) {
        self.min_threshold = value;
    }

    /// Sets the maximum number of synapses grown per learning step.
    pub fn set_max_new_synapse_count(&mut self, value: UInt) {
        self.max_new_synapse_count = value;
    }

    /// Enables or disables active column validation.
    pub fn set_check_inputs(&mut self, value: bool) {
        self.check_inputs = value;
    }

    /// Sets the permanence increment.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is outside `[0, 1]`.
    pub fn set_permanence_increment(&mut self, value: Permanence) -> Result<()> {
        self.permanence_increment = check_permanence("permanence_increment", value)?;
        Ok(())
    }

    /// Sets the permanence decrement.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is outside `[0, 1]`.
    pub fn set_permanence_decrement(&mut self, value: Permanence) -> Result<()> {
        self.permanence_decrement = check_permanence("permanence_decrement", value)?;
        Ok(())
    }

    /// Sets the predicted segment decrement.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` is outside `[0, 1]`.
    pub fn set_predicted_segment_decrement(&mut self, value: Permanence) -> Result<()> {
        self.predicted_segment_decrement =
            check_permanence("predicted_segment_decrement", value)?;
        Ok(())
    }
}

fn check_permanence(name: &'static str, value: Permanence) -> Result<Permanence> {
    if (0.0..=1.0).contains(&value) {
        Ok(value)
    } else {
        Err(invalid(name, &format!("Must be within [0, 1], got {value}")))
    }
}

/// Sorted union of `cells` and `extra` shifted by `offset`.
fn merge_inputs(cells: &[CellIdx], extra: &[CellIdx], offset: CellIdx) -> Vec<CellIdx> {
    let mut inputs = Vec::with_capacity(cells.len() + extra.len());
    inputs.extend_from_slice(cells);
    inputs.extend(extra.iter().map(|&e| e + offset));
    inputs.sort_unstable();
    inputs.dedup();
    inputs
}

impl PartialEq for TemporalMemory {
    fn eq(&self, other: &Self) -> bool {
        self.params() == other.params()
            && self.iteration == other.iteration
            && self.connections == other.connections
    }
}
