use crate::error::{Result, SegmentationError};
use ndarray::Array2;

/// Coarse domain code for each model class, indexed by class.
const RECLASS_TABLE: [u8; 10] = [5, 5, 5, 5, 5, 5, 5, 4, 3, 3];

/// Map one model class to its domain code.
pub fn reclassify_label(label: u8) -> Result<u8> {
    RECLASS_TABLE
        .get(usize::from(label))
        .copied()
        .ok_or(SegmentationError::InvalidLabel { label })
}

/// Relabel every pixel; `enabled == false` returns the grid unchanged.
pub fn apply(labels: Array2<u8>, enabled: bool) -> Result<Array2<u8>> {
    if !enabled {
        return Ok(labels);
    }
    let mut labels = labels;
    for v in labels.iter_mut() {
        *v = reclassify_label(*v)?;
    }
    Ok(labels)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn test_table_is_exact() {
        for label in 0..=6 {
            assert_eq!(reclassify_label(label).unwrap(), 5);
        }
        assert_eq!(reclassify_label(7).unwrap(), 4);
        assert_eq!(reclassify_label(8).unwrap(), 3);
        assert_eq!(reclassify_label(9).unwrap(), 3);
    }

    #[test]
    fn test_out_of_domain_label_is_an_error() {
        assert!(matches!(
            reclassify_label(10),
            Err(SegmentationError::InvalidLabel { label: 10 })
        ));
        assert!(apply(arr2(&[[0, 12]]), true).is_err());
    }

    #[test]
    fn test_enabled_output_is_coarse() {
        let raw = arr2(&[[0u8, 6, 7], [8, 9, 3]]);
        let out = apply(raw, true).unwrap();
        assert_eq!(out, arr2(&[[5u8, 5, 4], [3, 3, 5]]));
        assert!(out.iter().all(|v| (3..=5).contains(v)));
    }

    #[test]
    fn test_disabled_is_identity() {
        let raw = arr2(&[[0u8, 6, 7], [8, 9, 42]]);
        assert_eq!(apply(raw.clone(), false).unwrap(), raw);
    }
}
