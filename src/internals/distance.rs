/// Squared Euclidean distance between two equal-length f32 vectors.
///
/// The first `dim - (dim % 8)` lanes run through an 8-wide accumulator block
/// that vectorizes on every target with 256-bit registers; the tail is scalar.
/// No square root is taken anywhere in the crate, ordering is all that matters.
#[inline]
pub fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    debug_assert_eq!(a.len(), b.len());

    let mut wide = [0.0f32; 8];
    let mut a_blocks = a.chunks_exact(8);
    let mut b_blocks = b.chunks_exact(8);
    for (x, y) in a_blocks.by_ref().zip(b_blocks.by_ref()) {
        for lane in 0..8 {
            let d = x[lane] - y[lane];
            wide[lane] += d * d;
        }
    }

    let mut sum: f32 = wide.iter().sum();
    for (x, y) in a_blocks.remainder().iter().zip(b_blocks.remainder()) {
        let d = x - y;
        sum += d * d;
    }
    sum
}

#[cfg(test)]
mod test {
    use super::*;
    use rand::prelude::*;
    use rand_chacha::ChaCha8Rng;

    fn l2_scalar(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b.iter()).map(|(x, y)| (x - y) * (x - y)).sum()
    }

    #[test]
    fn blocked_path_matches_scalar() {
        let mut rng = ChaCha8Rng::seed_from_u64(17);

        // 128 exercises only the 8-lane blocks, 131 also the scalar tail
        for dim in [8usize, 128, 131, 3] {
            for _ in 0..100 {
                let a: Vec<f32> = (0..dim).map(|_| rng.random::<f32>()).collect();
                let b: Vec<f32> = (0..dim).map(|_| rng.random::<f32>()).collect();

                assert!((l2_distance(&a, &b) - l2_scalar(&a, &b)).abs() < 1e-4);
            }
        }
    }

    #[test]
    fn zero_for_identical_vectors() {
        let v: Vec<f32> = (0..128).map(|i| i as f32).collect();
        assert_eq!(l2_distance(&v, &v), 0.0);
    }
}
