//! Seeded, stratified index splits for training.
//!
//! The gate's calibration protocol depends on three disjoint label-
//! stratified slices; getting the stratification wrong silently leaks
//! calibration data into threshold tuning, so the splitter is tested on
//! exact class counts.

use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

use crate::error::{LearningError, Result};

/// A three-way split of row indices.
#[derive(Debug, Clone)]
pub struct ThreeWaySplit {
    pub train: Vec<usize>,
    pub calibration: Vec<usize>,
    pub threshold: Vec<usize>,
}

/// Stratified 60/20/20 split by a binary label.
///
/// Each class is shuffled with the seeded RNG and partitioned
/// proportionally, so both minority and majority classes appear in every
/// slice with matching prevalence.
pub fn stratified_three_way(
    labels: &[bool],
    fractions: (f64, f64),
    seed: u64,
) -> Result<ThreeWaySplit> {
    let (train_frac, calib_frac) = fractions;
    if !(0.0..1.0).contains(&train_frac) || !(0.0..1.0).contains(&calib_frac)
        || train_frac + calib_frac >= 1.0
    {
        return Err(LearningError::InvalidConfig(format!(
            "split fractions ({train_frac}, {calib_frac}) must leave a positive remainder"
        )));
    }

    let mut rng = StdRng::seed_from_u64(seed);
    let mut train = Vec::new();
    let mut calibration = Vec::new();
    let mut threshold = Vec::new();

    for class in [false, true] {
        let mut indices: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, l)| **l == class)
            .map(|(i, _)| i)
            .collect();
        if indices.len() < 3 {
            return Err(LearningError::InvalidData(format!(
                "class {class} has only {} samples; cannot stratify three ways",
                indices.len()
            )));
        }
        indices.shuffle(&mut rng);

        let n = indices.len();
        let train_end = ((n as f64) * train_frac).round() as usize;
        let calib_end = train_end + ((n as f64) * calib_frac).round() as usize;
        let calib_end = calib_end.min(n - 1);

        train.extend_from_slice(&indices[..train_end]);
        calibration.extend_from_slice(&indices[train_end..calib_end]);
        threshold.extend_from_slice(&indices[calib_end..]);
    }

    train.sort_unstable();
    calibration.sort_unstable();
    threshold.sort_unstable();

    Ok(ThreeWaySplit {
        train,
        calibration,
        threshold,
    })
}

/// Stratified two-way split (e.g. ranker train/validation).
pub fn stratified_two_way(labels: &[bool], train_frac: f64, seed: u64) -> Result<(Vec<usize>, Vec<usize>)> {
    let split = stratified_three_way(labels, (train_frac, (1.0 - train_frac) / 2.0), seed)?;
    let mut validation = split.calibration;
    validation.extend_from_slice(&split.threshold);
    validation.sort_unstable();
    Ok((split.train, validation))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pos: usize, neg: usize) -> Vec<bool> {
        let mut l = vec![true; pos];
        l.extend(vec![false; neg]);
        l
    }

    #[test]
    fn test_slices_are_disjoint_and_cover() {
        let labels = labels(200, 600);
        let split = stratified_three_way(&labels, (0.6, 0.2), 7).unwrap();

        let mut all: Vec<usize> = split
            .train
            .iter()
            .chain(&split.calibration)
            .chain(&split.threshold)
            .copied()
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 800);
    }

    #[test]
    fn test_stratification_preserves_prevalence() {
        let labels = labels(200, 600);
        let split = stratified_three_way(&labels, (0.6, 0.2), 7).unwrap();

        for slice in [&split.train, &split.calibration, &split.threshold] {
            let pos = slice.iter().filter(|&&i| labels[i]).count();
            let prevalence = pos as f64 / slice.len() as f64;
            assert!(
                (prevalence - 0.25).abs() < 0.03,
                "prevalence {prevalence} drifted in a slice of {}",
                slice.len()
            );
        }
    }

    #[test]
    fn test_same_seed_same_split() {
        let labels = labels(100, 300);
        let a = stratified_three_way(&labels, (0.6, 0.2), 11).unwrap();
        let b = stratified_three_way(&labels, (0.6, 0.2), 11).unwrap();
        assert_eq!(a.train, b.train);
        assert_eq!(a.threshold, b.threshold);

        let c = stratified_three_way(&labels, (0.6, 0.2), 12).unwrap();
        assert_ne!(a.train, c.train);
    }

    #[test]
    fn test_tiny_class_rejected() {
        let labels = labels(2, 100);
        assert!(stratified_three_way(&labels, (0.6, 0.2), 1).is_err());
    }

    #[test]
    fn test_two_way_split() {
        let labels = labels(100, 100);
        let (train, val) = stratified_two_way(&labels, 0.8, 3).unwrap();
        assert_eq!(train.len() + val.len(), 200);
        assert!(train.len() >= 155 && train.len() <= 165);
    }
}
