//! In-place lockstep shuffling of two row-major buffers.

use rand::RngCore;

use crate::{Error, Result};

/// Permute the rows of `a` and `b` with the same random permutation.
///
/// `a_stride` and `b_stride` are the number of elements per row in each buffer. Row `i` is
/// swapped with row `next_u32() % rows` for every `i` in order.
pub fn shuffle_lockstep<A, B, R>(
    a: &mut [A],
    a_stride: usize,
    b: &mut [B],
    b_stride: usize,
    rng: &mut R,
) -> Result<()>
where
    R: RngCore + ?Sized,
{
    if a_stride == 0 || b_stride == 0 {
        return Err(Error::InvalidData("shuffle stride must be > 0".to_owned()));
    }
    let rows = a.len() / a_stride;
    if a.len() % a_stride != 0 || b.len() != rows * b_stride {
        return Err(Error::InvalidData(format!(
            "cannot shuffle {} x {a_stride} against {} x {b_stride} in lockstep",
            a.len(),
            b.len()
        )));
    }

    for i in 0..rows {
        let j = rng.next_u32() as usize % rows;
        swap_rows(a, a_stride, i, j);
        swap_rows(b, b_stride, i, j);
    }
    Ok(())
}

fn swap_rows<T>(buf: &mut [T], stride: usize, i: usize, j: usize) {
    if i == j {
        return;
    }
    let (lo, hi) = if i < j { (i, j) } else { (j, i) };
    let (head, tail) = buf.split_at_mut(hi * stride);
    head[lo * stride..(lo + 1) * stride].swap_with_slice(&mut tail[..stride]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::random::Mt19937;

    #[test]
    fn rows_stay_paired() {
        let mut xs: Vec<f32> = (0..20).map(|v| v as f32).collect();
        let mut ys: Vec<u32> = (0..10).collect();
        shuffle_lockstep(&mut xs, 2, &mut ys, 1, &mut Mt19937::new(3)).unwrap();

        for (row, &y) in xs.chunks(2).zip(&ys) {
            assert_eq!(row, [2.0 * y as f32, 2.0 * y as f32 + 1.0]);
        }
        let mut sorted = ys.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..10).collect::<Vec<_>>());
        assert_ne!(ys, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let mut xs = [0.0_f32; 6];
        let mut ys = [0_u8; 4];
        assert!(shuffle_lockstep(&mut xs, 2, &mut ys, 1, &mut Mt19937::new(0)).is_err());
        assert!(shuffle_lockstep(&mut xs, 0, &mut ys, 1, &mut Mt19937::new(0)).is_err());
    }
}
