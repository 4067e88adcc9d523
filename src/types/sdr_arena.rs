//! Generation-checked storage for SDRs and the derived views built on it.
//!
//! Views never hold references to their sources. They hold [`SdrKey`]s plus
//! the generation each source had when the view was bound, and recompute
//! their value on demand. Any mutation of a source bumps its generation, so a
//! view read after its source changed fails with [`MnemosError::StaleView`]
//! instead of silently returning outdated bits.
//!
//! Keys also carry the occupancy epoch of their slot. Removing an SDR advances
//! the epoch, so a key to a removed SDR fails with
//! [`MnemosError::InvalidHandle`] even after its slot is reused.

use crate::error::{MnemosError, Result};
use crate::types::{Sdr, UInt};

/// Handle to an SDR stored in an [`SdrArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SdrKey {
    index: usize,
    epoch: u64,
}

impl SdrKey {
    /// Slot index inside the arena.
    #[inline]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Occupancy epoch of the slot when this key was issued.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

#[derive(Debug, Default)]
struct Slot {
    sdr: Option<Sdr>,
    // Advanced on every removal.
    epoch: u64,
    // Advanced on every mutation and removal.
    generation: u64,
}

/// Owner of a set of SDRs addressed by epoch-stamped keys.
///
/// # Example
///
/// ```rust
/// use mnemos::types::{ReshapeView, Sdr, SdrArena};
///
/// let mut arena = SdrArena::new();
/// let key = arena.insert(Sdr::new(&[4, 4]));
/// let view = ReshapeView::new(&arena, key, &[16]).unwrap();
///
/// arena.update(key, |sdr| sdr.set_sparse(&[3, 9])).unwrap();
/// assert!(view.read(&arena).is_err());
///
/// let view = view.rebind(&arena).unwrap();
/// assert_eq!(view.read(&arena).unwrap().get_sparse(), vec![3, 9]);
/// ```
#[derive(Debug, Default)]
pub struct SdrArena {
    slots: Vec<Slot>,
    free: Vec<usize>,
}

impl SdrArena {
    /// Creates an empty arena.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live SDRs.
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// Returns true if the arena holds no SDRs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stores an SDR and returns its key. Freed slots are reused.
    pub fn insert(&mut self, sdr: Sdr) -> SdrKey {
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index];
            slot.sdr = Some(sdr);
            return SdrKey {
                index,
                epoch: slot.epoch,
            };
        }

        self.slots.push(Slot {
            sdr: Some(sdr),
            ..Slot::default()
        });
        SdrKey {
            index: self.slots.len() - 1,
            epoch: 0,
        }
    }

    fn slot(&self, key: SdrKey) -> Result<&Slot> {
        self.slots
            .get(key.index)
            .filter(|slot| slot.sdr.is_some() && slot.epoch == key.epoch)
            .ok_or(MnemosError::InvalidHandle { index: key.index })
    }

    fn slot_mut(&mut self, key: SdrKey) -> Result<&mut Slot> {
        self.slots
            .get_mut(key.index)
            .filter(|slot| slot.sdr.is_some() && slot.epoch == key.epoch)
            .ok_or(MnemosError::InvalidHandle { index: key.index })
    }

    /// Returns the SDR behind `key`, regardless of its current generation.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::InvalidHandle`] if the SDR has been removed.
    pub fn get(&self, key: SdrKey) -> Result<&Sdr> {
        self.slot(key)?
            .sdr
            .as_ref()
            .ok_or(MnemosError::InvalidHandle { index: key.index })
    }

    /// Current generation of the SDR behind `key`.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::InvalidHandle`] if the SDR has been removed.
    pub fn generation(&self, key: SdrKey) -> Result<u64> {
        Ok(self.slot(key)?.generation)
    }

    /// Mutates the SDR behind `key` and advances its generation.
    ///
    /// The generation advances even if `f` fails, since `f` may have
    /// partially modified the SDR.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::InvalidHandle`] if the slot has been removed, or
    /// whatever `f` returns.
    pub fn update<F, R>(&mut self, key: SdrKey, f: F) -> Result<R>
    where
        F: FnOnce(&mut Sdr) -> Result<R>,
    {
        let slot = self.slot_mut(key)?;
        slot.generation += 1;
        match slot.sdr.as_mut() {
            Some(sdr) => f(sdr),
            None => Err(MnemosError::InvalidHandle { index: key.index }),
        }
    }

    /// Removes and returns the SDR behind `key`.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::InvalidHandle`] if the SDR was already removed.
    pub fn remove(&mut self, key: SdrKey) -> Result<Sdr> {
        let slot = self.slot_mut(key)?;
        let sdr = slot
            .sdr
            .take()
            .ok_or(MnemosError::InvalidHandle { index: key.index })?;

        slot.epoch += 1;
        slot.generation += 1;
        self.free.push(key.index);
        Ok(sdr)
    }

    fn check(&self, key: SdrKey, expected: u64) -> Result<&Sdr> {
        let found = self.generation(key)?;
        if found != expected {
            return Err(MnemosError::StaleView {
                index: key.index,
                expected,
                found,
            });
        }
        self.get(key)
    }
}

/// A view of one arena SDR under different dimensions of the same total size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReshapeView {
    source: SdrKey,
    generation: u64,
    dimensions: Vec<UInt>,
}

impl ReshapeView {
    /// Binds a view of `source` with the given dimensions.
    ///
    /// # Errors
    ///
    /// Returns an error if the source is gone or the sizes differ.
    pub fn new(arena: &SdrArena, source: SdrKey, dimensions: &[UInt]) -> Result<Self> {
        let sdr = arena.get(source)?;
        let size: usize = dimensions.iter().map(|&d| d as usize).product();
        if dimensions.is_empty() || size != sdr.size() {
            return Err(MnemosError::InvalidDimensions(format!(
                "Cannot view size {} as {:?}",
                sdr.size(),
                dimensions
            )));
        }

        Ok(Self {
            source,
            generation: arena.generation(source)?,
            dimensions: dimensions.to_vec(),
        })
    }

    /// Dimensions this view presents.
    pub fn dimensions(&self) -> &[UInt] {
        &self.dimensions
    }

    /// Materializes the reshaped SDR.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::StaleView`] if the source changed since binding.
    pub fn read(&self, arena: &SdrArena) -> Result<Sdr> {
        let source = arena.check(self.source, self.generation)?;
        let mut out = Sdr::try_new(&self.dimensions)?;
        out.set_sparse_unchecked(source.get_sparse());
        Ok(out)
    }

    /// Returns a copy of this view bound to the source's current generation.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::InvalidHandle`] if the source has been removed.
    pub fn rebind(&self, arena: &SdrArena) -> Result<Self> {
        Ok(Self {
            generation: arena.generation(self.source)?,
            ..self.clone()
        })
    }
}

/// A view of the bits active in every one of several arena SDRs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntersectionView {
    sources: Vec<(SdrKey, u64)>,
}

impl IntersectionView {
    /// Binds an intersection of `sources`, which must share one shape.
    ///
    /// # Errors
    ///
    /// Returns an error if no sources are given, a source is gone or the
    /// shapes differ.
    pub fn new(arena: &SdrArena, sources: &[SdrKey]) -> Result<Self> {
        let Some(&first) = sources.first() else {
            return Err(MnemosError::InvalidInput(
                "Intersection needs at least one source".to_string(),
            ));
        };

        let dims = arena.get(first)?.dimensions().to_vec();
        let mut bound = Vec::with_capacity(sources.len());
        for &key in sources {
            let sdr = arena.get(key)?;
            if sdr.dimensions() != dims.as_slice() {
                return Err(MnemosError::DimensionMismatch {
                    expected: dims,
                    actual: sdr.dimensions().to_vec(),
                });
            }
            bound.push((key, arena.generation(key)?));
        }

        Ok(Self { sources: bound })
    }

    /// Materializes the intersection.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::StaleView`] if any source changed since binding.
    pub fn read(&self, arena: &SdrArena) -> Result<Sdr> {
        let mut iter = self.sources.iter();
        let Some(&(key, generation)) = iter.next() else {
            return Err(MnemosError::InvalidInput(
                "Intersection needs at least one source".to_string(),
            ));
        };

        let mut acc = arena.check(key, generation)?.clone();
        for &(key, generation) in iter {
            let other = arena.check(key, generation)?;
            let mut next = Sdr::try_new(acc.dimensions())?;
            next.intersection(&acc, other)?;
            acc = next;
        }
        Ok(acc)
    }

    /// Returns a copy of this view bound to the sources' current generations.
    ///
    /// # Errors
    ///
    /// Returns [`MnemosError::InvalidHandle`] if a source has been removed.
    pub fn rebind(&self, arena: &SdrArena) -> Result<Self> {
        let sources = self
            .sources
            .iter()
            .map(|&(key, _)| Ok((key, arena.generation(key)?)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { sources })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sdr(dims: &[UInt], sparse: &[u32]) -> Sdr {
        let mut s = Sdr::new(dims);
        s.set_sparse(sparse).unwrap();
        s
    }

    #[test]
    fn test_insert_get_remove() {
        let mut arena = SdrArena::new();
        let a = arena.insert(sdr(&[10], &[1, 2]));
        let b = arena.insert(sdr(&[10], &[3]));
        assert_eq!(arena.len(), 2);

        assert_eq!(arena.get(a).unwrap().get_sparse(), vec![1, 2]);
        let removed = arena.remove(a).unwrap();
        assert_eq!(removed.get_sparse(), vec![1, 2]);
        assert!(matches!(arena.get(a), Err(MnemosError::InvalidHandle { .. })));
        assert!(arena.remove(a).is_err());

        let c = arena.insert(sdr(&[10], &[9]));
        assert_eq!(c.index(), a.index());
        assert_ne!(c.epoch(), a.epoch());
        assert_eq!(arena.get(b).unwrap().get_sparse(), vec![3]);
    }

    #[test]
    fn test_removed_key_cannot_reach_reused_slot() {
        let mut arena = SdrArena::new();
        let old = arena.insert(sdr(&[10], &[1]));
        arena.remove(old).unwrap();
        let new = arena.insert(sdr(&[10], &[7]));
        assert_eq!(new.index(), old.index());

        assert!(matches!(arena.get(old), Err(MnemosError::InvalidHandle { .. })));
        assert!(matches!(arena.generation(old), Err(MnemosError::InvalidHandle { .. })));
        assert!(arena.update(old, |s| s.set_sparse(&[2])).is_err());
        assert!(matches!(arena.remove(old), Err(MnemosError::InvalidHandle { .. })));
        assert!(ReshapeView::new(&arena, old, &[2, 5]).is_err());

        // The new occupant is untouched.
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.generation(new).unwrap(), 1);
        assert_eq!(arena.get(new).unwrap().get_sparse(), vec![7]);
    }

    #[test]
    fn test_view_of_removed_sdr_stays_invalid_after_reuse() {
        let mut arena = SdrArena::new();
        let key = arena.insert(sdr(&[16], &[3]));
        let view = ReshapeView::new(&arena, key, &[4, 4]).unwrap();

        arena.remove(key).unwrap();
        arena.insert(sdr(&[16], &[3]));

        assert!(matches!(
            view.read(&arena),
            Err(MnemosError::InvalidHandle { .. })
        ));
        assert!(view.rebind(&arena).is_err());
    }

    #[test]
    fn test_update_bumps_generation() {
        let mut arena = SdrArena::new();
        let key = arena.insert(Sdr::new(&[10]));
        assert_eq!(arena.generation(key).unwrap(), 0);

        arena.update(key, |s| s.set_sparse(&[5])).unwrap();
        assert_eq!(arena.generation(key).unwrap(), 1);

        assert!(arena.update(key, |s| s.set_sparse(&[50])).is_err());
        assert_eq!(arena.generation(key).unwrap(), 2);
    }

    #[test]
    fn test_reshape_view() {
        let mut arena = SdrArena::new();
        let key = arena.insert(sdr(&[4, 4], &[0, 5, 15]));

        let view = ReshapeView::new(&arena, key, &[2, 8]).unwrap();
        let out = view.read(&arena).unwrap();
        assert_eq!(out.dimensions(), &[2, 8]);
        assert_eq!(out.get_coordinates(), vec![vec![0, 0, 1], vec![0, 5, 7]]);

        assert!(ReshapeView::new(&arena, key, &[3, 5]).is_err());
    }

    #[test]
    fn test_reshape_view_goes_stale() {
        let mut arena = SdrArena::new();
        let key = arena.insert(sdr(&[16], &[1]));
        let view = ReshapeView::new(&arena, key, &[4, 4]).unwrap();

        arena.update(key, |s| s.set_sparse(&[2])).unwrap();
        assert!(matches!(
            view.read(&arena),
            Err(MnemosError::StaleView {
                expected: 0,
                found: 1,
                ..
            })
        ));

        let view = view.rebind(&arena).unwrap();
        assert_eq!(view.read(&arena).unwrap().get_sparse(), vec![2]);

        arena.remove(key).unwrap();
        assert!(matches!(
            view.read(&arena),
            Err(MnemosError::InvalidHandle { .. })
        ));
    }

    #[test]
    fn test_intersection_view() {
        let mut arena = SdrArena::new();
        let a = arena.insert(sdr(&[10], &[1, 2, 3, 4]));
        let b = arena.insert(sdr(&[10], &[2, 3, 4, 5]));
        let c = arena.insert(sdr(&[10], &[3, 4, 9]));

        let view = IntersectionView::new(&arena, &[a, b, c]).unwrap();
        assert_eq!(view.read(&arena).unwrap().get_sparse(), vec![3, 4]);

        arena.update(b, |s| s.set_sparse(&[4])).unwrap();
        assert!(view.read(&arena).is_err());
        let view = view.rebind(&arena).unwrap();
        assert_eq!(view.read(&arena).unwrap().get_sparse(), vec![4]);
    }

    #[test]
    fn test_intersection_view_rejects_bad_sources() {
        let mut arena = SdrArena::new();
        let a = arena.insert(Sdr::new(&[10]));
        let b = arena.insert(Sdr::new(&[2, 5]));

        assert!(IntersectionView::new(&arena, &[]).is_err());
        assert!(matches!(
            IntersectionView::new(&arena, &[a, b]),
            Err(MnemosError::DimensionMismatch { .. })
        ));
    }
}
