use grove::synthetic::noisy_cosine;
use grove::ForestBuilder;

fn shingled_forest(internal_rotation: bool) -> grove::RandomCutForest {
    ForestBuilder::new(8)
        .shingle_size(8)
        .internal_shingling(true)
        .internal_rotation(internal_rotation)
        .sample_size(256)
        .number_of_trees(50)
        .random_seed(2023)
        .build()
        .unwrap()
}

#[test]
fn sine_wave_forecast_tracks_the_held_out_tail() {
    let total = 2_020;
    let horizon = 20;
    let wave = noisy_cosine(total, &[60], &[10.0], 0.3, 8);
    let mut forest = shingled_forest(false);
    for block in wave.iter().take(total - horizon) {
        forest.update(block).unwrap();
    }
    let forecast = forest.extrapolate(horizon).unwrap();
    assert_eq!(forecast.values.len(), horizon);
    assert!(forecast.values.iter().all(|v| v.is_finite()));

    let mut squared_error = 0.0f64;
    for (predicted, actual) in forecast.values.iter().zip(wave[total - horizon..].iter()) {
        squared_error += ((predicted - actual[0]) as f64).powi(2);
        // the bands bracket the prediction itself
        assert!(forecast.lower.iter().zip(&forecast.upper).all(|(l, u)| l <= u));
    }
    let rmse = (squared_error / horizon as f64).sqrt();
    assert!(rmse < 2.0, "forecast rmse {} too large", rmse);
}

#[test]
fn forecast_blocks_can_be_fed_back_in() {
    let wave = noisy_cosine(1_000, &[40], &[5.0], 0.2, 21);
    let mut forest = shingled_forest(false);
    for block in wave.iter() {
        forest.update(block).unwrap();
    }
    let forecast = forest.extrapolate(10).unwrap();
    for &value in forecast.values.iter() {
        forest.update(&[value]).unwrap();
    }
    // and the forest remains queryable
    assert!(forest.score(&[0.0]).unwrap().is_finite());
}

#[test]
fn rotated_shingles_forecast_too() {
    let wave = noisy_cosine(1_500, &[30], &[8.0], 0.2, 5);
    let mut forest = shingled_forest(true);
    for block in wave.iter() {
        forest.update(block).unwrap();
    }
    let forecast = forest.extrapolate(6).unwrap();
    assert_eq!(forecast.values.len(), 6);
    assert!(forecast.values.iter().all(|v| v.is_finite() && v.abs() < 20.0));
}

#[test]
fn extrapolation_requires_internal_shingling() {
    let mut forest = ForestBuilder::new(4)
        .sample_size(32)
        .number_of_trees(5)
        .output_after(4)
        .random_seed(1)
        .build()
        .unwrap();
    for i in 0..40 {
        let x = i as f32;
        forest.update(&[x, x + 1.0, x + 2.0, x + 3.0]).unwrap();
    }
    assert!(forest.extrapolate(3).is_err());
}
