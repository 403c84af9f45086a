use grove::synthetic::gaussian_mixture;
use grove::{ForestBuilder, RandomCutForest};

/// try cargo test --release; these tests ingest long streams

fn trained_forest(seed: u64) -> RandomCutForest {
    let stream = gaussian_mixture(
        10_000,
        &[vec![0.0, 0.0, 0.0], vec![5.0, 5.0, 1.5]],
        &[vec![1.0, 1.0, 1.0], vec![1.5, 1.5, 1.5]],
        &[0.99, 0.01],
        seed,
    );
    let mut forest = ForestBuilder::new(3)
        .sample_size(256)
        .number_of_trees(100)
        .random_seed(123)
        .build()
        .unwrap();
    for point in stream.points.iter() {
        forest.update(point).unwrap();
    }
    forest
}

#[test]
fn outliers_score_above_inliers() {
    let forest = trained_forest(123);
    let center = forest.score(&[0.0, 0.0, 0.0]).unwrap();
    let far = forest.score(&[8.0, 8.0, 8.0]).unwrap();
    assert!(center < 1.0, "inlier scored {}", center);
    assert!(far > 1.0, "outlier scored {}", far);
}

#[test]
fn attribution_points_at_the_guilty_coordinate() {
    let forest = trained_forest(123);
    let query = [6.0f32, 0.0, 0.0];
    let score = forest.score(&query).unwrap();
    let attribution = forest.attribution(&query).unwrap();
    assert!(score > 1.0, "displaced point scored {}", score);
    assert!(
        attribution.high[0] > score / 3.0,
        "high[0] = {} vs score {}",
        attribution.high[0],
        score
    );
    assert!(attribution.low[0] < 0.2, "low[0] = {}", attribution.low[0]);
    // the attribution decomposes the score
    assert!((attribution.total() - score).abs() <= 1e-10 * score.abs().max(1.0));
}

#[test]
fn repeated_point_masks_itself() {
    let mut forest = trained_forest(123);
    let query = [-8.0f32, -8.0, 0.0];
    let fresh = forest.score(&query).unwrap();
    assert!(fresh > 1.0, "fresh outlier scored {}", fresh);
    for _ in 0..5 {
        forest.update(&query).unwrap();
        let current = forest.score(&query).unwrap();
        let attribution = forest.attribution(&query).unwrap();
        assert!((attribution.total() - current).abs() <= 1e-10 * current.abs().max(1.0));
    }
    let masked = forest.score(&query).unwrap();
    assert!(
        masked < fresh,
        "five copies should mask the point: {} vs {}",
        masked,
        fresh
    );
}

#[test]
fn imputation_recovers_the_dense_region() {
    let forest = trained_forest(123);
    let completed = forest
        .impute(&[f32::NAN, 0.02, 0.01], &[0])
        .unwrap();
    assert_eq!(completed.len(), 3);
    assert!(
        completed[0].abs() < 0.5,
        "imputed x = {} should be near zero",
        completed[0]
    );
    // observed coordinates pass through untouched
    assert_eq!(completed[1], 0.02);
    assert_eq!(completed[2], 0.01);
}

#[test]
fn duplicate_updates_dampen_scores() {
    let mut forest = ForestBuilder::new(2)
        .sample_size(128)
        .number_of_trees(30)
        .random_seed(99)
        .build()
        .unwrap();
    let stream = gaussian_mixture(
        2_000,
        &[vec![0.0, 0.0]],
        &[vec![1.0, 1.0]],
        &[1.0],
        7,
    );
    for point in stream.points.iter() {
        forest.update(point).unwrap();
    }
    let target = [4.0f32, 4.0];
    let fresh = forest.score(&target).unwrap();
    for _ in 0..64 {
        forest.update(&target).unwrap();
    }
    let damped = forest.score(&target).unwrap();
    assert!(
        damped < fresh,
        "64 duplicates should dampen the score: {} vs {}",
        damped,
        fresh
    );
}

#[test]
fn warm_up_is_quiet() {
    let mut forest = ForestBuilder::new(2)
        .sample_size(64)
        .number_of_trees(10)
        .random_seed(5)
        .build()
        .unwrap();
    assert!(!forest.is_output_ready());
    assert_eq!(forest.score(&[1.0, 1.0]).unwrap(), 0.0);
    let attribution = forest.attribution(&[1.0, 1.0]).unwrap();
    assert_eq!(attribution.total(), 0.0);
    assert_eq!(forest.density(&[1.0, 1.0]).unwrap(), 0.0);
    for i in 0..16 {
        forest.update(&[i as f32, i as f32]).unwrap();
    }
    assert!(forest.is_output_ready());
    assert!(forest.score(&[100.0, 100.0]).unwrap() > 0.0);
}

#[test]
fn zero_vectors_and_signed_zeros_are_harmless() {
    let mut forest = ForestBuilder::new(2)
        .sample_size(32)
        .number_of_trees(10)
        .output_after(1)
        .random_seed(17)
        .build()
        .unwrap();
    forest.update(&[0.0, 0.0]).unwrap();
    forest.update(&[-0.0, 0.0]).unwrap();
    forest.update(&[0.0, -0.0]).unwrap();
    for i in 0..50 {
        forest.update(&[(i % 7) as f32, (i % 3) as f32]).unwrap();
    }
    let at_zero = forest.score(&[0.0, 0.0]).unwrap();
    let at_negative_zero = forest.score(&[-0.0, 0.0]).unwrap();
    assert!(at_zero.is_finite());
    assert!(at_negative_zero.is_finite());
}

#[test]
fn density_needs_full_samplers() {
    let mut forest = ForestBuilder::new(2)
        .sample_size(64)
        .number_of_trees(10)
        .output_after(8)
        .random_seed(31)
        .build()
        .unwrap();
    let stream = gaussian_mixture(40, &[vec![0.0, 0.0]], &[vec![1.0, 1.0]], &[1.0], 2);
    for point in stream.points.iter() {
        forest.update(point).unwrap();
    }
    // ready but not full: density stays quiet
    assert!(forest.is_output_ready());
    assert_eq!(forest.density(&[0.0, 0.0]).unwrap(), 0.0);
    let more = gaussian_mixture(1000, &[vec![0.0, 0.0]], &[vec![1.0, 1.0]], &[1.0], 3);
    for point in more.points.iter() {
        forest.update(point).unwrap();
    }
    let dense = forest.density(&[0.0, 0.0]).unwrap();
    let sparse = forest.density(&[50.0, 50.0]).unwrap();
    assert!(dense > sparse);
}

#[test]
fn near_neighbors_come_back_sorted_with_sequences() {
    let mut forest = ForestBuilder::new(2)
        .sample_size(64)
        .number_of_trees(20)
        .output_after(8)
        .store_sequence_indexes(true)
        .random_seed(71)
        .build()
        .unwrap();
    let stream = gaussian_mixture(500, &[vec![0.0, 0.0]], &[vec![1.0, 1.0]], &[1.0], 13);
    for point in stream.points.iter() {
        forest.update(point).unwrap();
    }
    let neighbors = forest.near_neighbors(&[0.0, 0.0], 1.0).unwrap();
    assert!(!neighbors.is_empty());
    for pair in neighbors.windows(2) {
        assert!(pair[0].distance <= pair[1].distance);
    }
    for neighbor in neighbors.iter() {
        assert!(neighbor.distance <= 1.0);
        let sequences = neighbor
            .sequence_indexes
            .as_ref()
            .expect("sequence indexes were enabled");
        assert!(!sequences.is_empty());
    }
    assert!(forest.near_neighbors(&[500.0, 500.0], 1.0).unwrap().is_empty());
}

#[test]
fn time_decay_can_change_mid_stream() {
    let mut forest = ForestBuilder::new(2)
        .sample_size(64)
        .number_of_trees(20)
        .output_after(8)
        .random_seed(43)
        .build()
        .unwrap();
    let stream = gaussian_mixture(600, &[vec![0.0, 0.0]], &[vec![1.0, 1.0]], &[1.0], 19);
    for (i, point) in stream.points.iter().enumerate() {
        if i == 300 {
            forest.set_time_decay(forest.time_decay() * 10.0).unwrap();
        }
        forest.update(point).unwrap();
    }
    assert!(forest.score(&[0.0, 0.0]).unwrap().is_finite());
    assert!(forest.score(&[9.0, 9.0]).unwrap() > 1.0);
}
