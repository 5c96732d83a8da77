use super::*;

const EPSILON: f32 = 1e-5;

fn approx_eq(left: f32, right: f32) {
    assert!((left - right).abs() < EPSILON, "expected {left} ~= {right}");
}

fn approx_eq_tol(left: f32, right: f32, epsilon: f32) {
    assert!((left - right).abs() < epsilon, "expected {left} ~= {right}");
}

fn deterministic_vector(seed: usize, len: usize) -> Vec<f32> {
    (0..len)
        .map(|index| {
            let mixed = seed
                .wrapping_mul(1_103_515_245)
                .wrapping_add(index.wrapping_mul(12_345))
                .wrapping_add(97);
            let base = (mixed % 10_000) as f32 / 5_000.0;
            base - 1.0
        })
        .collect()
}

#[test]
fn l2_squared_works_without_sqrt_roundtrip() {
    let left = [1.0, 2.0, 3.0];
    let right = [1.0, 2.0, 6.0];
    let squared = l2_squared(&left, &right).expect("l2 squared should succeed");
    approx_eq(squared, 9.0);
}

#[test]
fn l2_squared_rejects_mismatched_lengths() {
    let error = l2_squared(&[1.0, 2.0], &[1.0]).expect_err("must fail");
    assert_eq!(
        error,
        VectorError::DimensionMismatch {
            expected: 2,
            got: 1
        }
    );
    assert_eq!(
        l2_squared(&[], &[]).expect_err("must fail"),
        VectorError::EmptyVector
    );
}

#[test]
fn validate_embedding_checks_dimension_and_finiteness() {
    validate_embedding(&[0.1, 0.2, 0.3], 3, VectorValidationOptions::strict())
        .expect("valid embedding");

    let error = validate_embedding(&[0.1, 0.2], 3, VectorValidationOptions::strict())
        .expect_err("must fail");
    assert_eq!(
        error,
        VectorError::DimensionMismatch {
            expected: 3,
            got: 2
        }
    );

    let error = validate_embedding(&[0.1, f32::NAN, 0.3], 3, VectorValidationOptions::strict())
        .expect_err("must fail");
    assert!(matches!(error, VectorError::NonFinite { index: 1, .. }));

    let relaxed = VectorValidationOptions {
        strict_finite: false,
        ..VectorValidationOptions::strict()
    };
    validate_embedding(&[0.1, f32::INFINITY, 0.3], 3, relaxed)
        .expect("non-finite values pass when strict_finite is off");
}

#[test]
fn normalize_produces_unit_vectors() {
    let normalized =
        normalize_l2(&[3.0, 4.0], VectorValidationOptions::strict()).expect("must normalize");
    approx_eq(normalized[0], 0.6);
    approx_eq(normalized[1], 0.8);
    approx_eq(squared_norm(&normalized), 1.0);

    let wide = deterministic_vector(7, 513);
    let normalized = normalize_l2(&wide, VectorValidationOptions::strict()).expect("normalize");
    approx_eq_tol(squared_norm(&normalized), 1.0, 1e-4);
}

#[test]
fn normalize_rejects_zero_and_non_finite_vectors() {
    let error =
        normalize_l2(&[0.0, 0.0, 0.0], VectorValidationOptions::strict()).expect_err("must fail");
    assert!(matches!(error, VectorError::ZeroNorm { .. }));

    let error = normalize_l2(&[1.0, f32::NEG_INFINITY], VectorValidationOptions::strict())
        .expect_err("must fail");
    assert!(matches!(error, VectorError::NonFinite { index: 1, .. }));

    let error = normalize_l2(&[], VectorValidationOptions::strict()).expect_err("must fail");
    assert_eq!(error, VectorError::EmptyVector);
}

#[test]
fn packed_query_agrees_with_l2_squared_across_lane_boundaries() {
    for len in [1usize, 2, 3, 7, 8, 9, 16, 17, 64, 65, 127, 128, 129, 512] {
        let query = deterministic_vector(17, len);
        let row = deterministic_vector(31, len);
        let reference = l2_squared(&query, &row).expect("l2 must succeed");
        approx_eq_tol(PackedQuery::new(&query).distance(&row), reference, 1e-3);
    }
}

#[test]
fn packed_query_is_zero_against_itself() {
    let query = deterministic_vector(5, 512);
    approx_eq(PackedQuery::new(&query).distance(&query), 0.0);
}
