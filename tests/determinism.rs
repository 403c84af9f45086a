use grove::synthetic::gaussian_mixture;
use grove::{ForestBuilder, RandomCutForest};

fn build(parallel: bool) -> RandomCutForest {
    let mut builder = ForestBuilder::new(2)
        .sample_size(128)
        .number_of_trees(40)
        .random_seed(4242)
        .parallel_execution(parallel);
    if parallel {
        builder = builder.thread_pool_size(3);
    }
    builder.build().unwrap()
}

#[test]
fn parallel_and_sequential_execution_agree() {
    let stream = gaussian_mixture(
        3_000,
        &[vec![0.0, 0.0], vec![10.0, -4.0]],
        &[vec![1.0, 1.0], vec![0.5, 0.5]],
        &[0.8, 0.2],
        77,
    );
    let queries = gaussian_mixture(
        50,
        &[vec![0.0, 0.0], vec![20.0, 20.0]],
        &[vec![3.0, 3.0], vec![1.0, 1.0]],
        &[0.5, 0.5],
        78,
    );

    let mut sequential = build(false);
    let mut parallel = build(true);
    for point in stream.points.iter() {
        sequential.update(point).unwrap();
        parallel.update(point).unwrap();
    }

    for query in queries.points.iter() {
        let a = sequential.score(query).unwrap();
        let b = parallel.score(query).unwrap();
        assert!((a - b).abs() < 1e-10, "scores diverged: {} vs {}", a, b);

        let attribution_a = sequential.attribution(query).unwrap();
        let attribution_b = parallel.attribution(query).unwrap();
        for d in 0..2 {
            assert!((attribution_a.high[d] - attribution_b.high[d]).abs() < 1e-10);
            assert!((attribution_a.low[d] - attribution_b.low[d]).abs() < 1e-10);
        }

        let density_a = sequential.density(query).unwrap();
        let density_b = parallel.density(query).unwrap();
        assert!((density_a - density_b).abs() < 1e-10);
    }
}

#[test]
fn identical_seeds_reproduce_identical_forests() {
    let stream = gaussian_mixture(1_000, &[vec![0.0, 0.0]], &[vec![1.0, 1.0]], &[1.0], 3);
    let mut first = build(false);
    let mut second = build(false);
    for point in stream.points.iter() {
        first.update(point).unwrap();
        second.update(point).unwrap();
    }
    for probe in [[0.0f32, 0.0], [3.0, 3.0], [-2.0, 5.0]] {
        assert_eq!(
            first.score(&probe).unwrap(),
            second.score(&probe).unwrap()
        );
    }
}

#[test]
fn approximate_score_tracks_the_full_score() {
    let stream = gaussian_mixture(
        5_000,
        &[vec![0.0, 0.0]],
        &[vec![1.0, 1.0]],
        &[1.0],
        11,
    );
    let mut forest = ForestBuilder::new(2)
        .sample_size(256)
        .number_of_trees(100)
        .random_seed(8)
        .build()
        .unwrap();
    for point in stream.points.iter() {
        forest.update(point).unwrap();
    }
    for probe in [[0.0f32, 0.0], [1.0, -1.0], [6.0, 6.0], [12.0, 0.0]] {
        let full = forest.score(&probe).unwrap();
        let approximate = forest.approximate_score(&probe).unwrap();
        // the early-stopped mean stays within the advertised precision band
        assert!(
            (full - approximate).abs() <= 0.3 * full.abs().max(1.0),
            "approximate {} strayed from {}",
            approximate,
            full
        );
    }
    // approximate attribution still decomposes its own mean
    let attribution = forest.approximate_attribution(&[6.0, 6.0]).unwrap();
    assert!(attribution.total() > 0.0);
}

#[test]
fn attribution_matches_score_everywhere() {
    let stream = gaussian_mixture(
        4_000,
        &[vec![0.0, 0.0, 0.0], vec![-6.0, 2.0, 9.0]],
        &[vec![1.0, 2.0, 0.5], vec![1.0, 1.0, 1.0]],
        &[0.7, 0.3],
        29,
    );
    let mut forest = ForestBuilder::new(3)
        .sample_size(256)
        .number_of_trees(50)
        .random_seed(1001)
        .build()
        .unwrap();
    for (i, point) in stream.points.iter().enumerate() {
        if i % 10 == 0 {
            let score = forest.score(point).unwrap();
            let attribution = forest.attribution(point).unwrap();
            assert!(
                (attribution.total() - score).abs() <= 1e-10 * score.abs().max(1.0),
                "attribution total {} vs score {}",
                attribution.total(),
                score
            );
        }
        forest.update(point).unwrap();
    }
}
