//! Matrix conversion utilities.
//!
//! ndarray is the array type at every public boundary of the crate while faer
//! carries the dense products inside the Levenberg-Marquardt loop. These helpers
//! copy data between the two representations.

use faer::{Col, Mat};
use ndarray::{Array1, Array2};

/// Convert an ndarray Array2 to a faer Mat.
///
/// ndarray is row-major by default, faer is column-major, so the data is copied
/// element by element.
pub fn ndarray_to_faer(arr: &Array2<f64>) -> Mat<f64> {
    Mat::from_fn(arr.nrows(), arr.ncols(), |i, j| arr[[i, j]])
}

/// Convert an ndarray Array1 to a faer Col.
pub fn ndarray_vec_to_faer(arr: &Array1<f64>) -> Col<f64> {
    Col::from_fn(arr.len(), |i| arr[i])
}

/// Convert a faer Col to an ndarray Array1.
pub fn faer_vec_to_ndarray(col: &Col<f64>) -> Array1<f64> {
    Array1::from_shape_fn(col.nrows(), |i| col[i])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_round_trip_vector() {
        let v = array![1.0, -2.5, 3.25];
        let col = ndarray_vec_to_faer(&v);
        assert_eq!(col.nrows(), 3);
        assert_eq!(faer_vec_to_ndarray(&col), v);
    }

    #[test]
    fn test_transpose_product_matches_ndarray() {
        let j = array![[1.0, 2.0], [3.0, 4.0], [5.0, 6.0]];
        let r = array![1.0, 0.5, -1.0];

        let jf = ndarray_to_faer(&j);
        let rf = ndarray_vec_to_faer(&r);
        let g = faer_vec_to_ndarray(&(jf.transpose() * rf.as_ref()));

        assert_eq!(g, j.t().dot(&r));
    }
}
