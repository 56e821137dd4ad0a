//! Evolve duelling fighters on the toy 1-D simulation
//!
//! # Usage
//!
//! ```bash
//! cargo run --release --example duel -- [GENERATIONS] [CONFIG.json]
//! RUST_LOG=colosseum_rl=debug cargo run --example duel -- 3
//! ```

use std::time::Instant;

use anyhow::{Context, Result};
use colosseum_rl::prelude::*;
use tracing_subscriber::EnvFilter;

const DT_MS: f64 = 16.0;
const PARTS: usize = 3;

#[derive(Default)]
struct LogReporter {
    hits: usize,
}

impl Reporter for LogReporter {
    fn on_score_update(&mut self, _slot: usize, _score_a: f32, _score_b: f32) {
        self.hits += 1;
    }

    fn on_generation_stats(&mut self, stats: &GenerationStats) {
        let worst = stats.scores.first().copied().unwrap_or_default();
        tracing::info!(
            "Generation {:>3} | best {:>8.3} | mean {:>8.3} | worst {:>8.3} | scoring contacts {}",
            stats.epoch,
            stats.best,
            stats.mean,
            worst,
            self.hits
        );
        self.hits = 0;
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let generations: usize = match args.next() {
        Some(n) => n.parse().context("GENERATIONS must be a number")?,
        None => 5,
    };
    let config = match args.next() {
        Some(path) => ColosseumConfig::load_json(&path).with_context(|| format!("loading {path}"))?,
        None => ColosseumConfig::default().total_arenas(4).population_size(8).seeds_n(3).time_limit_ms(3_000.0),
    };

    tracing::info!("Duel: {} arenas, {} fighters per generation", config.total_arenas, config.population_size);
    tracing::info!("  Parts per fighter: {}", PARTS);
    tracing::info!("  Match length: {} ms", config.time_limit_ms);
    tracing::info!("  Training: {}", config.trainable);

    let mut env = DuelEnvironment::new(config.total_arenas, PARTS);
    let (obs_dim, act_dim) = (env.observation_dim(), env.action_dim());

    let mut colosseum = Colosseum::<MlpPolicy, LogReporter>::builder(config)
        .factory(move |rng| MlpPolicy::new(obs_dim, act_dim, 2, 32, rng))
        .build()?;

    let started = Instant::now();
    colosseum.start()?;
    while colosseum.history().len() < generations {
        env.step(DT_MS);
        for (slot, contact) in env.drain_contacts() {
            colosseum.on_collision(slot, &contact, &env);
        }
        colosseum.tick(DT_MS, &mut env)?;
        // Roughly real time so the throttle means what it says
        std::thread::sleep(std::time::Duration::from_millis(1));
    }

    let elapsed = started.elapsed().as_secs_f64();
    tracing::info!(
        "Done: {} matches, {} inferences, {} replay samples in {:.1}s",
        colosseum.matches_played(),
        colosseum.inferences(),
        colosseum.replay().len(),
        elapsed
    );
    colosseum.shutdown()?;
    Ok(())
}
