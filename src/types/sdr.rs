//! Sparse Distributed Representation (SDR) implementation.
//!
//! An SDR is a group of boolean values (bits) over a multi-dimensional index
//! space. It can be represented in three formats:
//! - **Dense**: A contiguous array of all bits (C order)
//! - **Sparse**: A sorted, duplicate-free list of flat indices of active bits
//! - **Coordinate**: One index list per dimension
//!
//! Exactly one format is authoritative after a setter runs; the others are
//! computed lazily on first access and cached until the next setter.

use crate::error::{MnemosError, Result};
use crate::types::{ElemDense, ElemSparse, Real, UInt};
use crate::utils::Random;

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;

/// Type alias for dense SDR data (array of bytes, 0 or 1).
pub type SdrDense = Vec<ElemDense>;

/// Type alias for sparse SDR data (sorted indices of active bits).
pub type SdrSparse = Vec<ElemSparse>;

/// Type alias for coordinate SDR data (coordinates per dimension).
pub type SdrCoordinate = Vec<Vec<UInt>>;

/// Callback function type for SDR value changes.
pub type SdrCallback = Box<dyn Fn() + Send + Sync>;

/// Internal cache state for lazy evaluation.
#[derive(Default)]
struct SdrCache {
    dense: Option<SdrDense>,
    sparse: Option<SdrSparse>,
    coordinates: Option<SdrCoordinate>,
}

impl SdrCache {
    fn from_dense(dense: SdrDense) -> Self {
        Self {
            dense: Some(dense),
            ..Default::default()
        }
    }

    fn from_sparse(sparse: SdrSparse) -> Self {
        Self {
            sparse: Some(sparse),
            ..Default::default()
        }
    }

    fn from_coordinates(coordinates: SdrCoordinate) -> Self {
        Self {
            coordinates: Some(coordinates),
            ..Default::default()
        }
    }
}

/// Sparse Distributed Representation.
///
/// # Example
///
/// ```rust
/// use mnemos::types::Sdr;
///
/// let mut sdr = Sdr::new(&[10, 10]);
/// sdr.set_sparse(&[1, 4, 8, 15, 42]).unwrap();
///
/// assert_eq!(sdr.get_sum(), 5);
/// assert_eq!(sdr.get_dense()[42], 1);
/// assert_eq!(sdr.get_coordinates(), vec![vec![0, 0, 0, 1, 4], vec![1, 4, 8, 5, 2]]);
/// ```
pub struct Sdr {
    /// Dimensions of the SDR.
    dimensions: Vec<UInt>,

    /// Total size (product of dimensions).
    size: usize,

    /// Cached representations (interior mutability for lazy evaluation).
    cache: RefCell<SdrCache>,

    /// Callbacks to notify on value changes.
    callbacks: RefCell<Vec<Option<SdrCallback>>>,

    /// Callbacks to notify on destruction.
    destroy_callbacks: RefCell<Vec<Option<SdrCallback>>>,
}

// Serialized as dimensions plus sparse indices, whatever format is authoritative.
#[cfg(feature = "serde")]
mod serde_impl {
    use super::*;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    struct SdrState {
        dimensions: Vec<UInt>,
        sparse: Vec<ElemSparse>,
    }

    impl Serialize for Sdr {
        fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
        where
            S: Serializer,
        {
            let state = SdrState {
                dimensions: self.dimensions.clone(),
                sparse: self.get_sparse(),
            };
            state.serialize(serializer)
        }
    }

    impl<'de> Deserialize<'de> for Sdr {
        fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
        where
            D: Deserializer<'de>,
        {
            let state = SdrState::deserialize(deserializer)?;
            let mut sdr = Sdr::try_new(&state.dimensions).map_err(serde::de::Error::custom)?;
            sdr.set_sparse_owned(state.sparse)
                .map_err(serde::de::Error::custom)?;
            Ok(sdr)
        }
    }
}

impl Sdr {
    /// Creates a new SDR with the given dimensions, initialized to all zeros.
    ///
    /// # Panics
    ///
    /// Panics if dimensions is empty, or if a multi-dimensional SDR has a zero
    /// dimension. Use [`Sdr::try_new`] to get an error instead.
    ///
    /// # Example
    ///
    /// ```rust
    /// use mnemos::types::Sdr;
    ///
    /// let sdr = Sdr::new(&[100]);        // 1D SDR with 100 bits
    /// let sdr2 = Sdr::new(&[10, 10]);    // 2D SDR with 100 bits
    /// let sdr3 = Sdr::new(&[5, 4, 5]);   // 3D SDR with 100 bits
    /// ```
    #[must_use]
    pub fn new(dimensions: &[UInt]) -> Self {
        match Self::try_new(dimensions) {
            Ok(sdr) => sdr,
            Err(e) => panic!("{e}"),
        }
    }

    /// Creates a new SDR, reporting invalid dimensions as an error.
    ///
    /// A single zero dimension (`&[0]`) is allowed as an empty placeholder.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::InvalidDimensions`] for empty dimensions or a
    /// zero inside a multi-dimensional shape.
    pub fn try_new(dimensions: &[UInt]) -> Result<Self> {
        if dimensions.is_empty() {
            return Err(MnemosError::InvalidDimensions(
                "Dimensions cannot be empty".to_string(),
            ));
        }
        if dimensions.len() > 1 {
            if let Some(i) = dimensions.iter().position(|&d| d == 0) {
                return Err(MnemosError::InvalidDimensions(format!(
                    "Dimension {i} cannot be zero in multi-dimensional SDR"
                )));
            }
        }

        let size: usize = dimensions.iter().map(|&d| d as usize).product();

        Ok(Self {
            dimensions: dimensions.to_vec(),
            size,
            cache: RefCell::new(SdrCache::from_sparse(Vec::new())),
            callbacks: RefCell::new(Vec::new()),
            destroy_callbacks: RefCell::new(Vec::new()),
        })
    }

    /// Returns the dimensions of this SDR.
    #[inline]
    #[must_use]
    pub fn dimensions(&self) -> &[UInt] {
        &self.dimensions
    }

    /// Returns the total number of bits in the SDR.
    #[inline]
    #[must_use]
    pub fn size(&self) -> usize {
        self.size
    }

    /// Returns the number of dimensions.
    #[inline]
    #[must_use]
    pub fn num_dimensions(&self) -> usize {
        self.dimensions.len()
    }

    /// Reshapes the SDR to new dimensions. The total size must remain the same.
    ///
    /// # Errors
    ///
    /// Returns an error if the new dimensions have a different total size.
    pub fn reshape(&mut self, new_dimensions: &[UInt]) -> Result<()> {
        let new_size: usize = new_dimensions.iter().map(|&d| d as usize).product();

        if new_dimensions.is_empty() || new_size != self.size {
            return Err(MnemosError::InvalidDimensions(format!(
                "Cannot reshape from size {} to size {}",
                self.size, new_size
            )));
        }

        // Materialize the flat form before the shape changes.
        self.ensure_sparse();
        self.dimensions = new_dimensions.to_vec();
        self.cache.borrow_mut().coordinates = None;

        self.do_callbacks();
        Ok(())
    }

    /// Sets all bits to zero.
    pub fn zero(&mut self) {
        let cache = SdrCache {
            dense: Some(vec![0; self.size]),
            sparse: Some(Vec::new()),
            coordinates: Some(vec![Vec::new(); self.dimensions.len()]),
        };
        self.assign(cache);
    }

    /// Replaces the cached encodings and notifies observers.
    fn assign(&mut self, cache: SdrCache) {
        *self.cache.get_mut() = cache;
        self.do_callbacks();
    }

    /// Invokes all registered callbacks.
    fn do_callbacks(&self) {
        let callbacks = self.callbacks.borrow();
        for callback in callbacks.iter().flatten() {
            callback();
        }
    }

    fn ensure_sparse(&self) {
        if self.cache.borrow().sparse.is_some() {
            return;
        }

        let sparse = {
            let cache = self.cache.borrow();
            if let Some(dense) = cache.dense.as_ref() {
                dense
                    .iter()
                    .enumerate()
                    .filter(|(_, &v)| v != 0)
                    .map(|(i, _)| i as ElemSparse)
                    .collect()
            } else if let Some(coords) = cache.coordinates.as_ref() {
                self.coordinates_to_sparse(coords)
            } else {
                Vec::new()
            }
        };

        self.cache.borrow_mut().sparse = Some(sparse);
    }

    fn ensure_dense(&self) {
        if self.cache.borrow().dense.is_some() {
            return;
        }
        self.ensure_sparse();

        let mut dense = vec![0u8; self.size];
        if let Some(sparse) = self.cache.borrow().sparse.as_ref() {
            for &idx in sparse {
                dense[idx as usize] = 1;
            }
        }
        self.cache.borrow_mut().dense = Some(dense);
    }

    fn ensure_coordinates(&self) {
        if self.cache.borrow().coordinates.is_some() {
            return;
        }
        self.ensure_sparse();

        let coords = match self.cache.borrow().sparse.as_ref() {
            Some(sparse) => self.sparse_to_coordinates(sparse),
            None => vec![Vec::new(); self.dimensions.len()],
        };
        self.cache.borrow_mut().coordinates = Some(coords);
    }

    // ========================================================================
    // Dense format operations
    // ========================================================================

    /// Sets the SDR value from a dense array.
    ///
    /// # Arguments
    ///
    /// * `data` - A slice of values where non-zero means active
    ///
    /// # Errors
    ///
    /// Returns an error if the data length doesn't match the SDR size.
    pub fn set_dense(&mut self, data: &[ElemDense]) -> Result<()> {
        self.set_dense_owned(data.to_vec())
    }

    /// Sets the SDR value from a dense array, consuming it to avoid copying.
    ///
    /// # Errors
    ///
    /// Returns an error if the data length doesn't match the SDR size.
    pub fn set_dense_owned(&mut self, mut data: SdrDense) -> Result<()> {
        if data.len() != self.size {
            return Err(MnemosError::DimensionMismatch {
                expected: vec![self.size as u32],
                actual: vec![data.len() as u32],
            });
        }

        for v in &mut data {
            *v = ElemDense::from(*v != 0);
        }
        self.assign(SdrCache::from_dense(data));
        Ok(())
    }

    /// Gets the dense representation of the SDR.
    #[must_use]
    pub fn get_dense(&self) -> SdrDense {
        self.with_dense(<[ElemDense]>::to_vec)
    }

    /// Runs `f` against the dense representation, computing it if necessary.
    pub fn with_dense<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[ElemDense]) -> R,
    {
        self.ensure_dense();
        let cache = self.cache.borrow();
        f(cache.dense.as_deref().unwrap_or_default())
    }

    // ========================================================================
    // Sparse format operations
    // ========================================================================

    /// Sets the SDR value from sparse indices.
    ///
    /// # Arguments
    ///
    /// * `indices` - Sorted slice of indices of active bits
    ///
    /// # Errors
    ///
    /// Returns an error if indices are not sorted, contain duplicates, or are out of bounds.
    pub fn set_sparse(&mut self, indices: &[ElemSparse]) -> Result<()> {
        self.validate_sparse(indices)?;
        self.assign(SdrCache::from_sparse(indices.to_vec()));
        Ok(())
    }

    /// Sets the SDR value from sparse indices, consuming to avoid copying.
    ///
    /// # Errors
    ///
    /// Returns an error if indices are not sorted, contain duplicates, or are out of bounds.
    pub fn set_sparse_owned(&mut self, indices: SdrSparse) -> Result<()> {
        self.validate_sparse(&indices)?;
        self.assign(SdrCache::from_sparse(indices));
        Ok(())
    }

    /// Sets sparse indices without validation (for internal use).
    pub(crate) fn set_sparse_unchecked(&mut self, indices: SdrSparse) {
        debug_assert!(indices.windows(2).all(|w| w[0] < w[1]));
        self.assign(SdrCache::from_sparse(indices));
    }

    /// Validates sparse indices.
    fn validate_sparse(&self, indices: &[ElemSparse]) -> Result<()> {
        if let Some(&last) = indices.last() {
            if last as usize >= self.size {
                return Err(MnemosError::IndexOutOfBounds {
                    index: last as usize,
                    size: self.size,
                });
            }
        }

        if indices.windows(2).any(|w| w[1] <= w[0]) {
            return Err(MnemosError::InvalidSdrData(
                "Sparse indices must be sorted and unique".to_string(),
            ));
        }

        Ok(())
    }

    /// Gets the sparse representation of the SDR.
    #[must_use]
    pub fn get_sparse(&self) -> SdrSparse {
        self.with_sparse(<[ElemSparse]>::to_vec)
    }

    /// Runs `f` against the sparse representation, computing it if necessary.
    pub fn with_sparse<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&[ElemSparse]) -> R,
    {
        self.ensure_sparse();
        let cache = self.cache.borrow();
        f(cache.sparse.as_deref().unwrap_or_default())
    }

    // ========================================================================
    // Coordinate format operations
    // ========================================================================

    /// Sets the SDR value from coordinates.
    ///
    /// # Arguments
    ///
    /// * `coordinates` - A vector of coordinate vectors, one per dimension
    ///
    /// # Errors
    ///
    /// Returns an error if coordinates are invalid.
    pub fn set_coordinates(&mut self, coordinates: &SdrCoordinate) -> Result<()> {
        if coordinates.len() != self.dimensions.len() {
            return Err(MnemosError::InvalidDimensions(format!(
                "Expected {} dimensions, got {}",
                self.dimensions.len(),
                coordinates.len()
            )));
        }

        let len = coordinates.first().map_or(0, Vec::len);
        for (i, coord) in coordinates.iter().enumerate() {
            if coord.len() != len {
                return Err(MnemosError::InvalidSdrData(format!(
                    "Coordinate dimension {} has length {}, expected {}",
                    i,
                    coord.len(),
                    len
                )));
            }
        }

        for (coords, &dim_size) in coordinates.iter().zip(&self.dimensions) {
            if let Some(&c) = coords.iter().find(|&&c| c >= dim_size) {
                return Err(MnemosError::IndexOutOfBounds {
                    index: c as usize,
                    size: dim_size as usize,
                });
            }
        }

        // Keep the coordinate form consistent with the sparse form.
        let sparse = self.coordinates_to_sparse(coordinates);
        let coordinates = self.sparse_to_coordinates(&sparse);
        self.assign(SdrCache {
            sparse: Some(sparse),
            coordinates: Some(coordinates),
            dense: None,
        });
        Ok(())
    }

    /// Gets the coordinate representation of the SDR.
    #[must_use]
    pub fn get_coordinates(&self) -> SdrCoordinate {
        self.ensure_coordinates();
        self.cache
            .borrow()
            .coordinates
            .clone()
            .unwrap_or_default()
    }

    /// Converts flat indices to coordinates.
    fn sparse_to_coordinates(&self, sparse: &[ElemSparse]) -> SdrCoordinate {
        let num_dims = self.dimensions.len();
        let mut coordinates: SdrCoordinate = vec![Vec::with_capacity(sparse.len()); num_dims];

        for &flat_idx in sparse {
            let mut idx = flat_idx as usize;
            for dim in (0..num_dims).rev() {
                let dim_size = self.dimensions[dim] as usize;
                coordinates[dim].push((idx % dim_size) as UInt);
                idx /= dim_size;
            }
        }

        coordinates
    }

    /// Converts coordinates to sorted, duplicate-free flat indices.
    fn coordinates_to_sparse(&self, coordinates: &SdrCoordinate) -> SdrSparse {
        let num_points = coordinates.first().map_or(0, Vec::len);
        let mut sparse: SdrSparse = (0..num_points)
            .map(|i| {
                let point: Vec<UInt> = coordinates.iter().map(|c| c[i]).collect();
                self.coordinates_to_flat(&point) as ElemSparse
            })
            .collect();

        sparse.sort_unstable();
        sparse.dedup();
        sparse
    }

    /// Converts coordinates to a flat index.
    fn coordinates_to_flat(&self, coordinates: &[UInt]) -> usize {
        let mut flat_idx: usize = 0;
        let mut multiplier: usize = 1;

        for dim in (0..self.dimensions.len()).rev() {
            flat_idx += coordinates[dim] as usize * multiplier;
            multiplier *= self.dimensions[dim] as usize;
        }

        flat_idx
    }

    // ========================================================================
    // Value queries
    // ========================================================================

    /// Returns the value at the given coordinates.
    ///
    /// # Panics
    ///
    /// Panics if the number of coordinates differs from the number of
    /// dimensions or a coordinate is out of range.
    #[must_use]
    pub fn at(&self, coordinates: &[UInt]) -> bool {
        assert_eq!(
            coordinates.len(),
            self.dimensions.len(),
            "Coordinate dimensions mismatch"
        );

        let flat_idx = self.coordinates_to_flat(coordinates);
        self.with_dense(|dense| dense[flat_idx] != 0)
    }

    /// Returns the number of active (true) bits.
    #[must_use]
    pub fn get_sum(&self) -> usize {
        self.with_sparse(<[ElemSparse]>::len)
    }

    /// Returns the sparsity (fraction of active bits).
    #[must_use]
    pub fn get_sparsity(&self) -> Real {
        if self.size == 0 {
            return 0.0;
        }
        self.get_sum() as Real / self.size as Real
    }

    /// Returns the number of bits that are active in both SDRs.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::DimensionMismatch`] if the shapes differ.
    pub fn get_overlap(&self, other: &Sdr) -> Result<usize> {
        if self.dimensions != other.dimensions {
            return Err(MnemosError::DimensionMismatch {
                expected: self.dimensions.clone(),
                actual: other.dimensions.clone(),
            });
        }

        let count = self.with_sparse(|a| {
            other.with_sparse(|b| {
                let mut count = 0;
                let (mut i, mut j) = (0, 0);
                while i < a.len() && j < b.len() {
                    match a[i].cmp(&b[j]) {
                        Ordering::Less => i += 1,
                        Ordering::Greater => j += 1,
                        Ordering::Equal => {
                            count += 1;
                            i += 1;
                            j += 1;
                        }
                    }
                }
                count
            })
        });

        Ok(count)
    }

    // ========================================================================
    // SDR operations
    // ========================================================================

    /// Copies the value from another SDR.
    ///
    /// # Errors
    ///
    /// Returns an error if dimensions don't match.
    pub fn set_sdr(&mut self, other: &Sdr) -> Result<()> {
        if self.dimensions != other.dimensions {
            return Err(MnemosError::DimensionMismatch {
                expected: self.dimensions.clone(),
                actual: other.dimensions.clone(),
            });
        }

        self.set_sparse_unchecked(other.get_sparse());
        Ok(())
    }

    /// Randomizes the SDR with the given sparsity.
    ///
    /// # Arguments
    ///
    /// * `sparsity` - Fraction of bits to set active, clamped to `[0, 1]`
    /// * `rng` - Random number generator
    pub fn randomize(&mut self, sparsity: Real, rng: &mut Random) {
        let sparsity = sparsity.clamp(0.0, 1.0);
        let num_active = ((self.size as Real) * sparsity).round() as usize;

        let mut sparse = rng.sample((0..self.size as ElemSparse).collect(), num_active);
        sparse.sort_unstable();
        self.set_sparse_unchecked(sparse);
    }

    /// Moves a fraction of the active bits to random inactive positions.
    ///
    /// The number of active bits is preserved.
    ///
    /// # Arguments
    ///
    /// * `fraction_noise` - Fraction of active bits to move (0.0 to 1.0)
    /// * `rng` - Random number generator
    pub fn add_noise(&mut self, fraction_noise: Real, rng: &mut Random) {
        let sparse = self.get_sparse();
        let num_active = sparse.len();

        if num_active == 0 || fraction_noise <= 0.0 {
            return;
        }

        let num_inactive = self.size - num_active;
        let num_to_flip = (((num_active as Real) * fraction_noise.min(1.0)).round() as usize)
            .min(num_inactive);
        if num_to_flip == 0 {
            return;
        }

        let turn_off = rng.sample(sparse.clone(), num_to_flip);

        let dense = self.get_dense();
        let inactive: Vec<ElemSparse> = (0..self.size as ElemSparse)
            .filter(|&i| dense[i as usize] == 0)
            .collect();
        let turn_on = rng.sample(inactive, num_to_flip);

        let mut next = dense;
        for i in turn_off {
            next[i as usize] = 0;
        }
        for i in turn_on {
            next[i as usize] = 1;
        }

        self.assign(SdrCache::from_dense(next));
    }

    /// Computes the intersection of two SDRs into this SDR.
    ///
    /// # Errors
    ///
    /// Returns an error if dimensions don't match.
    pub fn intersection(&mut self, a: &Sdr, b: &Sdr) -> Result<()> {
        if a.dimensions != b.dimensions {
            return Err(MnemosError::DimensionMismatch {
                expected: a.dimensions.clone(),
                actual: b.dimensions.clone(),
            });
        }

        if self.dimensions != a.dimensions {
            return Err(MnemosError::DimensionMismatch {
                expected: self.dimensions.clone(),
                actual: a.dimensions.clone(),
            });
        }

        let result = a.with_sparse(|sparse_a| {
            b.with_dense(|dense_b| {
                sparse_a
                    .iter()
                    .copied()
                    .filter(|&i| dense_b[i as usize] != 0)
                    .collect()
            })
        });

        self.set_sparse_unchecked(result);
        Ok(())
    }

    // ========================================================================
    // Callbacks
    // ========================================================================

    /// Adds a callback that is called whenever the SDR value changes.
    ///
    /// Returns a handle that can be used to remove the callback.
    pub fn add_callback(&self, callback: SdrCallback) -> usize {
        let mut callbacks = self.callbacks.borrow_mut();
        let handle = callbacks.len();
        callbacks.push(Some(callback));
        handle
    }

    /// Removes a callback by its handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown or already removed.
    pub fn remove_callback(&self, handle: usize) -> Result<()> {
        remove_from(&self.callbacks, handle, "handle")
    }

    /// Adds a callback that is called when the SDR is destroyed.
    pub fn add_destroy_callback(&self, callback: SdrCallback) -> usize {
        let mut callbacks = self.destroy_callbacks.borrow_mut();
        let handle = callbacks.len();
        callbacks.push(Some(callback));
        handle
    }

    /// Removes a destroy callback by its handle.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle is unknown or already removed.
    pub fn remove_destroy_callback(&self, handle: usize) -> Result<()> {
        remove_from(&self.destroy_callbacks, handle, "destroy handle")
    }
}

fn remove_from(
    callbacks: &RefCell<Vec<Option<SdrCallback>>>,
    handle: usize,
    name: &'static str,
) -> Result<()> {
    let mut callbacks = callbacks.borrow_mut();
    match callbacks.get_mut(handle) {
        Some(slot @ Some(_)) => {
            *slot = None;
            Ok(())
        }
        _ => Err(MnemosError::InvalidParameter {
            name,
            message: format!("Invalid callback handle: {handle}"),
        }),
    }
}

impl Clone for Sdr {
    fn clone(&self) -> Self {
        let cache = self.cache.borrow();
        let copy = if let Some(sparse) = cache.sparse.as_ref() {
            SdrCache::from_sparse(sparse.clone())
        } else if let Some(dense) = cache.dense.as_ref() {
            SdrCache::from_dense(dense.clone())
        } else if let Some(coords) = cache.coordinates.as_ref() {
            SdrCache::from_coordinates(coords.clone())
        } else {
            SdrCache::from_sparse(Vec::new())
        };

        Self {
            dimensions: self.dimensions.clone(),
            size: self.size,
            cache: RefCell::new(copy),
            callbacks: RefCell::new(Vec::new()),
            destroy_callbacks: RefCell::new(Vec::new()),
        }
    }
}

impl PartialEq for Sdr {
    fn eq(&self, other: &Self) -> bool {
        if self.dimensions != other.dimensions {
            return false;
        }
        self.with_sparse(|a| other.with_sparse(|b| a == b))
    }
}

impl Eq for Sdr {}

impl fmt::Debug for Sdr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SDR({:?}) {:?}", self.dimensions, self.get_sparse())
    }
}

impl fmt::Display for Sdr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dims: Vec<String> = self.dimensions.iter().map(ToString::to_string).collect();
        let bits: Vec<String> = self.get_sparse().iter().map(ToString::to_string).collect();
        write!(f, "SDR( {} ) {}", dims.join(", "), bits.join(", "))
    }
}

impl Drop for Sdr {
    fn drop(&mut self) {
        let callbacks = self.destroy_callbacks.borrow();
        for callback in callbacks.iter().flatten() {
            callback();
        }
    }
}

impl Default for Sdr {
    fn default() -> Self {
        Self::new(&[0])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Arc;

    #[test]
    fn test_constructor() {
        let sdr = Sdr::new(&[3]);
        assert_eq!(sdr.size(), 3);
        assert_eq!(sdr.dimensions(), &[3]);

        let sdr2 = Sdr::new(&[3, 4, 5]);
        assert_eq!(sdr2.size(), 60);
        assert_eq!(sdr2.dimensions(), &[3, 4, 5]);
        assert_eq!(sdr2.get_sum(), 0);
    }

    #[test]
    fn test_try_new_rejects_bad_shapes() {
        assert!(Sdr::try_new(&[]).is_err());
        assert!(Sdr::try_new(&[3, 0]).is_err());
        assert_eq!(Sdr::try_new(&[0]).unwrap().size(), 0);
    }

    #[test]
    fn test_zero() {
        let mut sdr = Sdr::new(&[4, 4]);
        sdr.set_dense(&[1; 16]).unwrap();
        sdr.zero();
        assert_eq!(sdr.get_sum(), 0);
        assert_eq!(sdr.get_coordinates(), vec![Vec::<u32>::new(), Vec::new()]);
    }

    #[test]
    fn test_dense_sparse_conversion() {
        let mut sdr = Sdr::new(&[9]);
        sdr.set_dense(&[0, 1, 0, 0, 1, 0, 0, 0, 1]).unwrap();
        assert_eq!(sdr.get_sparse(), vec![1, 4, 8]);

        sdr.set_sparse(&[1, 4, 8]).unwrap();
        assert_eq!(sdr.get_dense(), vec![0, 1, 0, 0, 1, 0, 0, 0, 1]);
    }

    #[test]
    fn test_dense_values_are_normalized() {
        let mut sdr = Sdr::new(&[4]);
        sdr.set_dense(&[0, 7, 0, 255]).unwrap();
        assert_eq!(sdr.get_dense(), vec![0, 1, 0, 1]);
    }

    #[test]
    fn test_set_dense_wrong_length() {
        let mut sdr = Sdr::new(&[4]);
        assert!(matches!(
            sdr.set_dense(&[0, 1]),
            Err(MnemosError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_sparse_validation() {
        let mut sdr = Sdr::new(&[10]);
        assert!(matches!(
            sdr.set_sparse(&[3, 1]),
            Err(MnemosError::InvalidSdrData(_))
        ));
        assert!(matches!(
            sdr.set_sparse(&[1, 1]),
            Err(MnemosError::InvalidSdrData(_))
        ));
        assert!(matches!(
            sdr.set_sparse(&[1, 10]),
            Err(MnemosError::IndexOutOfBounds { index: 10, size: 10 })
        ));
    }

    #[test]
    fn test_coordinates() {
        let mut sdr = Sdr::new(&[3, 3]);
        sdr.set_coordinates(&vec![vec![0, 1, 2], vec![1, 1, 2]]).unwrap();
        assert_eq!(sdr.get_sparse(), vec![1, 4, 8]);

        sdr.set_sparse(&[1, 4, 8]).unwrap();
        let coords = sdr.get_coordinates();
        assert_eq!(coords, vec![vec![0, 1, 2], vec![1, 1, 2]]);
    }

    #[test]
    fn test_unsorted_coordinates_are_canonicalized() {
        let mut sdr = Sdr::new(&[3, 3]);
        sdr.set_coordinates(&vec![vec![2, 0, 2], vec![2, 1, 2]]).unwrap();
        assert_eq!(sdr.get_sparse(), vec![1, 8]);
        assert_eq!(sdr.get_coordinates(), vec![vec![0, 2], vec![1, 2]]);
    }

    #[test]
    fn test_coordinates_out_of_range() {
        let mut sdr = Sdr::new(&[3, 3]);
        assert!(sdr.set_coordinates(&vec![vec![3], vec![0]]).is_err());
        assert!(sdr.set_coordinates(&vec![vec![0, 1], vec![0]]).is_err());
        assert!(sdr.set_coordinates(&vec![vec![0]]).is_err());
    }

    #[test]
    fn test_at() {
        let mut sdr = Sdr::new(&[3, 3]);
        sdr.set_sparse(&[4, 5, 8]).unwrap();
        assert!(sdr.at(&[1, 1]));
        assert!(sdr.at(&[1, 2]));
        assert!(sdr.at(&[2, 2]));
        assert!(!sdr.at(&[0, 0]));
    }

    #[test]
    fn test_sum_sparsity() {
        let mut sdr = Sdr::new(&[100]);
        sdr.set_sparse(&[1, 2, 3, 4, 5]).unwrap();
        assert_eq!(sdr.get_sum(), 5);
        assert!((sdr.get_sparsity() - 0.05).abs() < 0.001);
    }

    #[test]
    fn test_overlap() {
        let mut a = Sdr::new(&[9]);
        let mut b = Sdr::new(&[9]);
        a.set_sparse(&[1, 2, 3, 4]).unwrap();
        b.set_sparse(&[2, 3, 4, 5]).unwrap();
        assert_eq!(a.get_overlap(&b).unwrap(), 3);
    }

    #[test]
    fn test_overlap_dimension_mismatch() {
        let a = Sdr::new(&[10]);
        let b = Sdr::new(&[2, 5]);
        assert!(matches!(
            a.get_overlap(&b),
            Err(MnemosError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn test_intersection() {
        let mut a = Sdr::new(&[10]);
        let mut b = Sdr::new(&[10]);
        let mut c = Sdr::new(&[10]);

        a.set_sparse(&[0, 1, 2, 3]).unwrap();
        b.set_sparse(&[2, 3, 4, 5]).unwrap();
        c.intersection(&a, &b).unwrap();

        assert_eq!(c.get_sparse(), vec![2, 3]);
    }

    #[test]
    fn test_set_sdr() {
        let mut a = Sdr::new(&[4, 4]);
        a.set_sparse(&[0, 5, 15]).unwrap();
        let mut b = Sdr::new(&[4, 4]);
        b.set_sdr(&a).unwrap();
        assert_eq!(a, b);

        let mut c = Sdr::new(&[16]);
        assert!(c.set_sdr(&a).is_err());
    }

    #[test]
    fn test_randomize() {
        let mut rng = Random::new(42);
        let mut sdr = Sdr::new(&[1000]);
        sdr.randomize(0.02, &mut rng);
        assert_eq!(sdr.get_sum(), 20);

        let sparse = sdr.get_sparse();
        assert!(sparse.windows(2).all(|w| w[0] < w[1]));

        let mut again = Sdr::new(&[1000]);
        again.randomize(0.02, &mut Random::new(42));
        assert_eq!(sdr, again);
    }

    #[test]
    fn test_add_noise_preserves_sum() {
        let mut rng = Random::new(1);
        let mut sdr = Sdr::new(&[200]);
        sdr.randomize(0.1, &mut rng);
        let before = sdr.clone();

        sdr.add_noise(0.5, &mut rng);
        assert_eq!(sdr.get_sum(), 20);
        assert_eq!(before.get_overlap(&sdr).unwrap(), 10);
    }

    #[test]
    fn test_equality() {
        let mut a = Sdr::new(&[10]);
        let mut b = Sdr::new(&[10]);

        a.set_sparse(&[1, 2, 3]).unwrap();
        b.set_dense(&[0, 1, 1, 1, 0, 0, 0, 0, 0, 0]).unwrap();
        assert_eq!(a, b);

        b.set_sparse(&[1, 2, 4]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_reshape() {
        let mut sdr = Sdr::new(&[3, 4, 5]);
        sdr.set_sparse(&[0, 5, 10]).unwrap();

        sdr.reshape(&[5, 12]).unwrap();
        assert_eq!(sdr.dimensions(), &[5, 12]);
        assert_eq!(sdr.get_sparse(), vec![0, 5, 10]);
        assert!(sdr.reshape(&[7]).is_err());
    }

    #[test]
    fn test_reshape_from_coordinates() {
        let mut sdr = Sdr::new(&[2, 3]);
        sdr.set_coordinates(&vec![vec![1], vec![2]]).unwrap();
        sdr.reshape(&[6]).unwrap();
        assert_eq!(sdr.get_coordinates(), vec![vec![5]]);
    }

    #[test]
    fn test_callbacks_fire_on_every_setter() {
        let count = Arc::new(AtomicUsize::new(0));
        let mut sdr = Sdr::new(&[10]);

        let counter = Arc::clone(&count);
        let handle = sdr.add_callback(Box::new(move || {
            counter.fetch_add(1, AtomicOrdering::SeqCst);
        }));

        sdr.set_sparse(&[1]).unwrap();
        sdr.set_dense(&[0; 10]).unwrap();
        sdr.set_coordinates(&vec![vec![4]]).unwrap();
        sdr.zero();
        assert_eq!(count.load(AtomicOrdering::SeqCst), 4);

        sdr.remove_callback(handle).unwrap();
        sdr.set_sparse(&[2]).unwrap();
        assert_eq!(count.load(AtomicOrdering::SeqCst), 4);
        assert!(sdr.remove_callback(handle).is_err());
    }

    #[test]
    fn test_destroy_callback() {
        let count = Arc::new(AtomicUsize::new(0));
        {
            let sdr = Sdr::new(&[10]);
            let counter = Arc::clone(&count);
            sdr.add_destroy_callback(Box::new(move || {
                counter.fetch_add(1, AtomicOrdering::SeqCst);
            }));
        }
        assert_eq!(count.load(AtomicOrdering::SeqCst), 1);
    }

    #[test]
    fn test_display() {
        let mut sdr = Sdr::new(&[3, 3]);
        sdr.set_sparse(&[1, 4, 8]).unwrap();
        let s = format!("{}", sdr);
        assert!(s.contains("SDR( 3, 3 )"));
        assert!(s.contains("1, 4, 8"));
    }

    #[test]
    fn test_clone() {
        let mut sdr = Sdr::new(&[10]);
        sdr.set_sparse(&[1, 2, 3]).unwrap();

        let cloned = sdr.clone();
        assert_eq!(sdr, cloned);

        sdr.set_sparse(&[4, 5, 6]).unwrap();
        assert_ne!(sdr, cloned);
    }
}
