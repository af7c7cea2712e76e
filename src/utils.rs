use ndarray::{ArrayView1, ArrayView2};

/// Index of the largest value; ties go to the first
pub fn argmax(row: ArrayView1<f32>) -> usize {
    row.iter()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |(best, best_val), (i, &v)| {
            if v > best_val { (i, v) } else { (best, best_val) }
        })
        .0
}

pub fn argmax_rows(matrix: ArrayView2<f32>) -> Vec<usize> {
    matrix.rows().into_iter().map(argmax).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_argmax_rows() {
        let m = array![[0.1, 0.7, 0.2], [0.5, 0.5, 0.0], [0.0, 0.0, 1.0]];
        assert_eq!(argmax_rows(m.view()), vec![1, 0, 2]);
    }
}
