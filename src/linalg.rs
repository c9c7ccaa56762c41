use faer::MatRef;
use faer::Side;
use faer::linalg::solvers::{Ldlt as FaerLdlt, Llt as FaerLlt, Solve as FaerSolve};
use ndarray::{Array1, Array2};
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LinalgError {
    #[error("symmetric factorization failed; the normal equations are singular")]
    FactorizationFailed,
    #[error("linear solve produced non-finite values")]
    NonFiniteSolution,
}

/// Borrowed faer view over an ndarray matrix.
///
/// faer kernels assume forward memory traversal, so layouts with
/// non-positive strides (reversed slices) are materialized into a compact
/// owned copy first.
struct FaerView<'a> {
    ptr: *const f64,
    rows: usize,
    cols: usize,
    row_stride: isize,
    col_stride: isize,
    owned: Option<Array2<f64>>,
    _marker: PhantomData<&'a f64>,
}

impl<'a> FaerView<'a> {
    fn from_matrix(a: &'a Array2<f64>) -> Self {
        let (rows, cols) = a.dim();
        let strides = a.strides();
        if strides[0] <= 0 || strides[1] <= 0 {
            return Self::owned(a.to_owned());
        }
        Self {
            ptr: a.as_ptr(),
            rows,
            cols,
            row_stride: strides[0],
            col_stride: strides[1],
            owned: None,
            _marker: PhantomData,
        }
    }

    fn from_column(v: &'a Array1<f64>) -> Self {
        let stride = v.strides()[0];
        if stride <= 0 {
            return Self::owned(Array2::from_shape_fn((v.len(), 1), |(i, _)| v[i]));
        }
        Self {
            ptr: v.as_ptr(),
            rows: v.len(),
            cols: 1,
            row_stride: stride,
            // col stride irrelevant for a single column
            col_stride: 0,
            owned: None,
            _marker: PhantomData,
        }
    }

    fn owned(array: Array2<f64>) -> Self {
        let (rows, cols) = array.dim();
        let strides = array.strides();
        let (rs, cs) = (strides[0], strides[1]);
        Self {
            ptr: array.as_ptr(),
            rows,
            cols,
            row_stride: rs,
            col_stride: cs,
            owned: Some(array),
            _marker: PhantomData,
        }
    }

    #[inline]
    fn as_ref(&self) -> MatRef<'_, f64> {
        let ptr = match &self.owned {
            Some(array) => array.as_ptr(),
            None => self.ptr,
        };
        // SAFETY: pointer, dimensions and strides come straight from a live
        // ndarray whose buffer this struct borrows (or owns), and strides
        // are positive by construction above.
        unsafe { MatRef::from_raw_parts(ptr, self.rows, self.cols, self.row_stride, self.col_stride) }
    }
}

/// Solve the symmetric positive-definite system `a x = b`.
///
/// Attempts an LLT factorization first and falls back to LDLT when the
/// matrix is only semi-definite up to rounding, the same ladder the IRLS
/// normal equations need on nearly separated data.
pub fn solve_spd(a: &Array2<f64>, b: &Array1<f64>) -> Result<Array1<f64>, LinalgError> {
    let a_view = FaerView::from_matrix(a);
    let b_view = FaerView::from_column(b);

    enum Factor {
        Llt(FaerLlt<f64>),
        Ldlt(FaerLdlt<f64>),
    }

    let factor = if let Ok(llt) = FaerLlt::new(a_view.as_ref(), Side::Lower) {
        Factor::Llt(llt)
    } else {
        match FaerLdlt::new(a_view.as_ref(), Side::Lower) {
            Ok(ldlt) => Factor::Ldlt(ldlt),
            Err(_) => return Err(LinalgError::FactorizationFailed),
        }
    };

    let solution = match factor {
        Factor::Llt(f) => f.solve(b_view.as_ref()),
        Factor::Ldlt(f) => f.solve(b_view.as_ref()),
    };

    let p = a.nrows();
    let mut out = Array1::<f64>::zeros(p);
    for i in 0..p {
        out[i] = solution[(i, 0)];
    }
    if out.iter().any(|v| !v.is_finite()) {
        return Err(LinalgError::NonFiniteSolution);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn solves_small_spd_system() {
        let a = array![[4.0, 1.0], [1.0, 3.0]];
        let b = array![1.0, 2.0];
        let x = solve_spd(&a, &b).unwrap();
        // Direct inversion: A^{-1} b = [1/11, 7/11].
        assert_abs_diff_eq!(x[0], 1.0 / 11.0, epsilon = 1e-12);
        assert_abs_diff_eq!(x[1], 7.0 / 11.0, epsilon = 1e-12);
    }

    #[test]
    fn reversed_storage_still_solves() {
        use ndarray::s;
        let a = array![[3.0, 1.0], [1.0, 4.0]];
        // slice_move keeps ownership but leaves a negative stride, forcing
        // the owned-copy path inside the faer bridge.
        let b_rev = array![2.0, 1.0].slice_move(s![..;-1]);
        assert_eq!(b_rev[0], 1.0);
        let direct = solve_spd(&a, &array![1.0, 2.0]).unwrap();
        let via_rev = solve_spd(&a, &b_rev).unwrap();
        assert_abs_diff_eq!(direct[0], via_rev[0], epsilon = 1e-12);
        assert_abs_diff_eq!(direct[1], via_rev[1], epsilon = 1e-12);
    }

    #[test]
    fn singular_system_is_reported() {
        let a = array![[1.0, 1.0], [1.0, 1.0]];
        let b = array![1.0, 2.0];
        assert!(solve_spd(&a, &b).is_err());
    }
}
