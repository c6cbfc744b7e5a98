//! Row-major position ravelling

/// Linear index of `coord` in an array of the given `shape`
///
/// Row-major: the last axis varies fastest.
pub fn ravelled_pos(coord: &[i64], shape: &[i64]) -> i64 {
    debug_assert_eq!(coord.len(), shape.len());
    let mut pos = 0;
    let mut mul = 1;
    for i in (0..shape.len()).rev() {
        pos += mul * coord[i];
        mul *= shape[i];
    }
    pos
}

/// Inverse of [`ravelled_pos`]
pub fn unravelled_pos(mut idx: i64, shape: &[i64]) -> Vec<i64> {
    let mut coord = vec![0; shape.len()];
    for i in (0..shape.len()).rev() {
        let dim = shape[i];
        if dim == 0 {
            continue;
        }
        coord[i] = idx % dim;
        idx /= dim;
    }
    coord
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_ravel_last_axis_fastest() {
        assert_eq!(ravelled_pos(&[0, 0], &[3, 4]), 0);
        assert_eq!(ravelled_pos(&[0, 3], &[3, 4]), 3);
        assert_eq!(ravelled_pos(&[1, 0], &[3, 4]), 4);
        assert_eq!(ravelled_pos(&[2, 3], &[3, 4]), 11);
    }

    #[test]
    fn test_unravel() {
        assert_eq!(unravelled_pos(11, &[3, 4]), vec![2, 3]);
        assert_eq!(unravelled_pos(5, &[2, 2, 2]), vec![1, 0, 1]);
        assert!(unravelled_pos(0, &[]).is_empty());
    }

    prop_compose! {
        fn arb_shape_and_index()(
            shape in prop::collection::vec(1i64..7, 1..6),
        )(
            idx in 0..shape.iter().product::<i64>(),
            shape in Just(shape),
        ) -> (Vec<i64>, i64) {
            (shape, idx)
        }
    }

    proptest! {
        #[test]
        fn test_ravel_unravel_inverse((shape, idx) in arb_shape_and_index()) {
            let coord = unravelled_pos(idx, &shape);
            prop_assert_eq!(ravelled_pos(&coord, &shape), idx);
        }
    }
}
