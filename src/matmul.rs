//! Strided GEMM plus the three dense-layer products built on it.
//!
//! - default: a simple, safe triple-loop implementation
//! - optional: a faster backend via the `matrixmultiply` feature

/// `C = alpha * A * B + beta * C` with arbitrary strides.
///
/// When `beta == 0`, `C` is write-only.
#[allow(clippy::too_many_arguments)]
#[inline]
pub(crate) fn gemm_f32(
    m: usize,
    n: usize,
    k: usize,
    alpha: f32,
    a: &[f32],
    rsa: usize,
    csa: usize,
    b: &[f32],
    rsb: usize,
    csb: usize,
    beta: f32,
    c: &mut [f32],
    rsc: usize,
    csc: usize,
) {
    debug_assert!(m > 0 && n > 0 && k > 0);
    debug_assert!(a.len() > (m - 1) * rsa + (k - 1) * csa);
    debug_assert!(b.len() > (k - 1) * rsb + (n - 1) * csb);
    debug_assert!(c.len() > (m - 1) * rsc + (n - 1) * csc);

    #[cfg(feature = "matrixmultiply")]
    {
        // SAFETY: the debug assertions above describe the extent each pointer is read or
        // written through; callers size every slice to the full matrix.
        unsafe {
            matrixmultiply::sgemm(
                m,
                k,
                n,
                alpha,
                a.as_ptr(),
                rsa as isize,
                csa as isize,
                b.as_ptr(),
                rsb as isize,
                csb as isize,
                beta,
                c.as_mut_ptr(),
                rsc as isize,
                csc as isize,
            );
        }
    }

    #[cfg(not(feature = "matrixmultiply"))]
    for i in 0..m {
        for j in 0..n {
            let mut acc = 0.0_f32;
            let a0 = i * rsa;
            let b0 = j * csb;

            for p in 0..k {
                acc = a[a0 + p * csa].mul_add(b[p * rsb + b0], acc);
            }

            let idx = i * rsc + j * csc;
            c[idx] = if beta == 0.0 {
                alpha * acc
            } else {
                alpha * acc + beta * c[idx]
            };
        }
    }
}

/// `out = W x` for a row-major `(rows, cols)` matrix `W`.
#[inline]
pub(crate) fn matvec(rows: usize, cols: usize, w: &[f32], x: &[f32], out: &mut [f32]) {
    debug_assert_eq!(w.len(), rows * cols);
    debug_assert_eq!(x.len(), cols);
    debug_assert_eq!(out.len(), rows);
    gemm_f32(rows, 1, cols, 1.0, w, cols, 1, x, 1, 1, 0.0, out, 1, 1);
}

/// `out = W^T v` for a row-major `(rows, cols)` matrix `W`.
#[inline]
pub(crate) fn matvec_transposed(rows: usize, cols: usize, w: &[f32], v: &[f32], out: &mut [f32]) {
    debug_assert_eq!(w.len(), rows * cols);
    debug_assert_eq!(v.len(), rows);
    debug_assert_eq!(out.len(), cols);
    gemm_f32(cols, 1, rows, 1.0, w, 1, cols, v, 1, 1, 0.0, out, 1, 1);
}

/// `g += u v^T` for a row-major `(u.len(), v.len())` accumulator `g`.
#[inline]
pub(crate) fn outer_add(u: &[f32], v: &[f32], g: &mut [f32]) {
    let (rows, cols) = (u.len(), v.len());
    debug_assert_eq!(g.len(), rows * cols);
    gemm_f32(rows, cols, 1, 1.0, u, 1, 1, v, cols, 1, 1.0, g, cols, 1);
}

#[cfg(test)]
mod tests {
    use super::*;

    // W = [[1, 2, 3], [4, 5, 6]]
    const W: [f32; 6] = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];

    #[test]
    fn matvec_products() {
        let mut out = [f32::NAN; 2];
        matvec(2, 3, &W, &[1.0, 0.0, -1.0], &mut out);
        assert_eq!(out, [-2.0, -2.0]);

        let mut out = [f32::NAN; 3];
        matvec_transposed(2, 3, &W, &[1.0, 2.0], &mut out);
        assert_eq!(out, [9.0, 12.0, 15.0]);
    }

    #[test]
    fn outer_add_accumulates() {
        let mut g = [1.0_f32; 6];
        outer_add(&[1.0, 2.0], &[1.0, 0.0, -1.0], &mut g);
        assert_eq!(g, [2.0, 1.0, 0.0, 3.0, 1.0, -1.0]);
    }
}
