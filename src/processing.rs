use fxhash::{FxBuildHasher, FxHashSet};
use indexmap::IndexSet;
use ordered_float::OrderedFloat;

/// 完全に一致する行を取り除きます。
/// 最初に現れた行が残り、行の順序は保たれます。
pub fn remove_duplicates(rows: &[f64], width: usize) -> Vec<f64> {
    let mut unique = IndexSet::<Vec<OrderedFloat<f64>>, FxBuildHasher>::with_hasher(Default::default());

    rows.chunks_exact(width).for_each(|row| {
        unique.insert(row.iter().copied().map(OrderedFloat).collect());
    });

    unique.into_iter().flatten().map(OrderedFloat::into_inner).collect()
}

/// 座標(先頭3列)が一致する行を取り除きます。
/// 属性が異なっていても、最初に現れた行だけが残ります。
pub fn remove_duplicate_positions(rows: &[f64], width: usize) -> Vec<f64> {
    let mut seen = FxHashSet::<[OrderedFloat<f64>; 3]>::default();

    rows.chunks_exact(width)
        .filter(|row| seen.insert([row[0], row[1], row[2]].map(OrderedFloat)))
        .flatten()
        .copied()
        .collect()
}

/// いずれかの列が有限でない行を取り除きます。
/// 取り除いた行数を返します。
pub fn retain_finite(rows: &mut Vec<f64>, width: usize) -> usize {
    let kept = compact_finite(rows, width);
    let removed = rows.len() / width - kept;
    rows.truncate(kept * width);
    removed
}

/// 有限な行を先頭に詰め、その行数を返します。
/// 詰めた後ろの領域の内容は不定です。
pub(crate) fn compact_finite(rows: &mut [f64], width: usize) -> usize {
    let num_rows = rows.len() / width;
    let mut kept = 0;

    for i in 0..num_rows {
        let start = i * width;
        if rows[start..start + width].iter().all(|v| v.is_finite()) {
            if kept != i {
                rows.copy_within(start..start + width, kept * width);
            }
            kept += 1;
        }
    }

    kept
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_remove_duplicates_keeps_first_occurrence() {
        let rows = [3., 3., 1., 1., 3., 3., 2., 2., 1., 1.];

        assert_eq!(remove_duplicates(&rows, 2), vec![3., 3., 1., 1., 2., 2.]);
    }

    #[test]
    fn test_remove_duplicate_positions_ignores_attributes() {
        let rows = [1., 2., 3., 0., 1., 2., 3., 1., 4., 5., 6., 1.];

        assert_eq!(remove_duplicate_positions(&rows, 4), vec![1., 2., 3., 0., 4., 5., 6., 1.]);
        assert_eq!(remove_duplicates(&rows, 4).len(), 12);
    }

    #[test]
    fn test_retain_finite() {
        let mut rows = vec![1., 2., f64::NAN, 4., 5., 6., 7., f64::INFINITY, 9., 10., 11., 12.];

        let removed = retain_finite(&mut rows, 3);

        assert_eq!(removed, 2);
        assert_eq!(rows, vec![4., 5., 6., 10., 11., 12.]);
    }
}
