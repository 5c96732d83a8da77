//! Flat, exact nearest-neighbor index over fixed-dimension embeddings.
//!
//! Vectors live in one contiguous row-major buffer. Every row carries the
//! identity it belongs to and the sequence number it was inserted with, so
//! equal distances are always reported in insertion order even after rows
//! have been moved around by removals.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use thiserror::Error;

use crate::vector::PackedQuery;

pub type Identity = u64;

/// One search hit: an identity and its squared L2 distance to the query.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub identity: Identity,
    pub distance: f32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IndexError {
    #[error("index dimension must be > 0")]
    InvalidDimension,
    #[error("invalid vector dimension: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("identity {0} is already indexed")]
    IdentityExists(Identity),
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    identity: Identity,
    sequence: u64,
}

#[derive(Debug, Clone)]
pub struct SimilarityIndex {
    dimension: usize,
    slots: Vec<Slot>,
    values: Vec<f32>,
    next_sequence: u64,
}

impl SimilarityIndex {
    pub fn new(dimension: usize) -> Result<Self, IndexError> {
        if dimension == 0 {
            return Err(IndexError::InvalidDimension);
        }

        Ok(Self {
            dimension,
            slots: Vec::new(),
            values: Vec::new(),
            next_sequence: 0,
        })
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn contains(&self, identity: Identity) -> bool {
        self.slots.iter().any(|slot| slot.identity == identity)
    }

    /// Adds one entry. The caller guarantees `identity` is not already present.
    pub fn insert(&mut self, identity: Identity, embedding: &[f32]) -> Result<(), IndexError> {
        self.check_dimension(embedding.len())?;
        self.push_row(identity, embedding);
        Ok(())
    }

    /// Like [`insert`](Self::insert), but refuses an identity that already has an entry.
    pub fn insert_unique(
        &mut self,
        identity: Identity,
        embedding: &[f32],
    ) -> Result<(), IndexError> {
        self.check_dimension(embedding.len())?;
        if self.contains(identity) {
            return Err(IndexError::IdentityExists(identity));
        }
        self.push_row(identity, embedding);
        Ok(())
    }

    /// Adds a batch of entries; nothing is applied unless every entry is valid.
    pub fn insert_batch(&mut self, entries: &[(Identity, Vec<f32>)]) -> Result<usize, IndexError> {
        for (_, values) in entries {
            self.check_dimension(values.len())?;
        }

        self.slots.reserve(entries.len());
        self.values.reserve(entries.len() * self.dimension);
        for (identity, values) in entries {
            self.push_row(*identity, values);
        }
        Ok(entries.len())
    }

    /// Removes every entry for `identity` and returns how many were dropped.
    pub fn remove(&mut self, identity: Identity) -> usize {
        let mut removed = 0usize;
        let mut position = 0usize;
        while position < self.slots.len() {
            if self.slots[position].identity == identity {
                self.swap_remove_row(position);
                removed += 1;
            } else {
                position += 1;
            }
        }
        removed
    }

    pub fn clear(&mut self) {
        self.slots.clear();
        self.values.clear();
    }

    /// Returns up to `k` nearest entries ordered by ascending distance, ties in
    /// insertion order.
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<Neighbor>, IndexError> {
        self.check_dimension(query.len())?;
        let keep = k.min(self.slots.len());
        if keep == 0 {
            return Ok(Vec::new());
        }

        let packed = PackedQuery::new(query);
        let mut heap = BinaryHeap::with_capacity(keep);
        for (row, slot) in self.values.chunks_exact(self.dimension).zip(&self.slots) {
            let candidate = HeapCandidate {
                identity: slot.identity,
                sequence: slot.sequence,
                distance: packed.distance(row),
            };
            if heap.len() < keep {
                heap.push(candidate);
                continue;
            }

            let should_replace = heap
                .peek()
                .is_some_and(|worst| candidate.cmp(worst).is_lt());
            if should_replace {
                let _ = heap.pop();
                heap.push(candidate);
            }
        }

        Ok(heap
            .into_sorted_vec()
            .into_iter()
            .map(|candidate| Neighbor {
                identity: candidate.identity,
                distance: candidate.distance,
            })
            .collect())
    }

    /// Iterates over stored entries in storage order.
    pub fn entries(&self) -> impl Iterator<Item = (Identity, &[f32])> + '_ {
        self.slots
            .iter()
            .zip(self.values.chunks_exact(self.dimension))
            .map(|(slot, values)| (slot.identity, values))
    }

    fn check_dimension(&self, got: usize) -> Result<(), IndexError> {
        if got != self.dimension {
            return Err(IndexError::DimensionMismatch {
                expected: self.dimension,
                got,
            });
        }
        Ok(())
    }

    fn push_row(&mut self, identity: Identity, values: &[f32]) {
        self.slots.push(Slot {
            identity,
            sequence: self.next_sequence,
        });
        self.values.extend_from_slice(values);
        self.next_sequence = self.next_sequence.saturating_add(1);
    }

    fn swap_remove_row(&mut self, position: usize) {
        let last = self.slots.len() - 1;
        if position != last {
            let dimension = self.dimension;
            self.values.copy_within(
                last * dimension..(last + 1) * dimension,
                position * dimension,
            );
        }
        let _ = self.slots.swap_remove(position);
        self.values.truncate(last * self.dimension);
    }
}

#[derive(Debug, Clone, Copy)]
struct HeapCandidate {
    identity: Identity,
    sequence: u64,
    distance: f32,
}

impl PartialEq for HeapCandidate {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other).is_eq()
    }
}

impl Eq for HeapCandidate {}

impl PartialOrd for HeapCandidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapCandidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.distance
            .total_cmp(&other.distance)
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}
