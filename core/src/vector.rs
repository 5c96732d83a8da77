use thiserror::Error;
use wide::f32x8;

/// Runtime validation options for embedding vectors.
#[derive(Debug, Clone, Copy)]
pub struct VectorValidationOptions {
    /// When true, NaN and +/-Inf values are rejected.
    pub strict_finite: bool,
    /// Squared norm threshold under which a vector cannot be normalized.
    pub zero_norm_epsilon: f32,
}

impl Default for VectorValidationOptions {
    fn default() -> Self {
        Self::strict()
    }
}

impl VectorValidationOptions {
    /// Rejects non-finite components and near-zero vectors.
    pub const fn strict() -> Self {
        Self {
            strict_finite: true,
            zero_norm_epsilon: f32::EPSILON,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum VectorError {
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
    #[error("vector is empty")]
    EmptyVector,
    #[error("vector norm is too close to zero to normalize (epsilon={epsilon})")]
    ZeroNorm { epsilon: f32 },
    #[error("non-finite value at index {index}: {value}")]
    NonFinite { index: usize, value: f32 },
}

/// Checks length and, in strict mode, finiteness of an embedding.
pub fn validate_embedding(
    values: &[f32],
    dimension: usize,
    options: VectorValidationOptions,
) -> Result<(), VectorError> {
    if values.is_empty() {
        return Err(VectorError::EmptyVector);
    }
    if values.len() != dimension {
        return Err(VectorError::DimensionMismatch {
            expected: dimension,
            got: values.len(),
        });
    }
    if options.strict_finite {
        first_non_finite(values)?;
    }
    Ok(())
}

/// Squared Euclidean distance between two embeddings of equal length.
pub fn l2_squared(left: &[f32], right: &[f32]) -> Result<f32, VectorError> {
    if left.is_empty() || right.is_empty() {
        return Err(VectorError::EmptyVector);
    }
    if left.len() != right.len() {
        return Err(VectorError::DimensionMismatch {
            expected: left.len(),
            got: right.len(),
        });
    }
    Ok(fold_lanes(left, right, |l, r| (l - r) * (l - r), |l, r| (l - r) * (l - r)))
}

pub(crate) fn squared_norm(values: &[f32]) -> f32 {
    fold_lanes(values, values, |l, r| l * r, |l, r| l * r)
}

/// Returns a unit-length copy of `values`.
///
/// Squared L2 distance between unit vectors equals `2 - 2 * cosine`.
pub fn normalize_l2(
    values: &[f32],
    options: VectorValidationOptions,
) -> Result<Vec<f32>, VectorError> {
    if values.is_empty() {
        return Err(VectorError::EmptyVector);
    }
    if options.strict_finite {
        first_non_finite(values)?;
    }

    let epsilon = options.zero_norm_epsilon.max(0.0);
    let norm_sq = squared_norm(values);
    if !norm_sq.is_finite() || norm_sq <= epsilon {
        return Err(VectorError::ZeroNorm { epsilon });
    }

    let scale = norm_sq.sqrt().recip();
    Ok(values.iter().map(|value| value * scale).collect())
}

fn first_non_finite(values: &[f32]) -> Result<(), VectorError> {
    match values.iter().position(|value| !value.is_finite()) {
        Some(index) => Err(VectorError::NonFinite {
            index,
            value: values[index],
        }),
        None => Ok(()),
    }
}

const LANES: usize = 8;

/// A query split into 8-wide lanes once, then compared against many index rows.
#[derive(Debug, Clone)]
pub(crate) struct PackedQuery {
    dimension: usize,
    lanes: Vec<f32x8>,
    tail: Vec<f32>,
}

impl PackedQuery {
    pub(crate) fn new(query: &[f32]) -> Self {
        let head = query.len() - query.len() % LANES;
        Self {
            dimension: query.len(),
            lanes: query[..head].chunks_exact(LANES).map(pack).collect(),
            tail: query[head..].to_vec(),
        }
    }

    /// Squared L2 distance to a row of the same dimension.
    pub(crate) fn distance(&self, row: &[f32]) -> f32 {
        debug_assert_eq!(row.len(), self.dimension);
        let (head, tail) = row.split_at(self.lanes.len() * LANES);

        let lanes = self
            .lanes
            .iter()
            .zip(head.chunks_exact(LANES))
            .fold(f32x8::ZERO, |sum, (query, row)| {
                let delta = *query - pack(row);
                sum + delta * delta
            });
        let tail: f32 = self
            .tail
            .iter()
            .zip(tail)
            .map(|(query, row)| (query - row) * (query - row))
            .sum();

        lanes.reduce_add() + tail
    }
}

fn pack(chunk: &[f32]) -> f32x8 {
    let mut lanes = [0.0f32; LANES];
    lanes.copy_from_slice(chunk);
    f32x8::from(lanes)
}

/// Sums `lane` over full 8-wide chunks and `scalar` over the remainder.
fn fold_lanes(
    left: &[f32],
    right: &[f32],
    lane: impl Fn(f32x8, f32x8) -> f32x8,
    scalar: impl Fn(f32, f32) -> f32,
) -> f32 {
    let len = left.len().min(right.len());
    let head = len - len % LANES;

    let lanes = left[..head]
        .chunks_exact(LANES)
        .zip(right[..head].chunks_exact(LANES))
        .fold(f32x8::ZERO, |sum, (l, r)| sum + lane(pack(l), pack(r)));
    let tail: f32 = left[head..len]
        .iter()
        .zip(&right[head..len])
        .map(|(&l, &r)| scalar(l, r))
        .sum();

    lanes.reduce_add() + tail
}

#[cfg(test)]
mod tests;
