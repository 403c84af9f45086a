//! End-to-end walkthrough: score a noisy wave with injected spikes, then
//! forecast past the end of the stream.
//!
//! Run with `cargo run --release --bin walkthrough`.

use grove::synthetic::noisy_cosine;
use grove::ForestBuilder;

fn main() -> grove::Result<()> {
    let shingle_size = 8;
    let mut forest = ForestBuilder::new(shingle_size)
        .shingle_size(shingle_size)
        .internal_shingling(true)
        .sample_size(256)
        .number_of_trees(50)
        .random_seed(42)
        .build()?;

    let mut wave = noisy_cosine(4_000, &[60], &[10.0], 0.4, 17);
    // inject a handful of spikes the forest has never seen
    for &at in &[1_200usize, 2_500, 3_600] {
        wave[at][0] += 25.0;
    }

    let mut flagged = 0;
    for (i, block) in wave.iter().enumerate() {
        let score = forest.score(block)?;
        if score > 1.5 {
            flagged += 1;
            println!("step {i:>5}  value {:>8.3}  score {score:.3}", block[0]);
        }
        forest.update(block)?;
    }
    println!("flagged {flagged} of {} points", wave.len());

    let forecast = forest.extrapolate(16)?;
    println!("next {} values:", forecast.values.len());
    for (i, value) in forecast.values.iter().enumerate() {
        println!(
            "  +{:<3} {value:>8.3}  [{:.3}, {:.3}]",
            i + 1,
            forecast.lower[i],
            forecast.upper[i]
        );
    }
    println!("model size: {} bytes", forest.size_in_bytes());
    Ok(())
}
