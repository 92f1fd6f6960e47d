use anyhow::{Context, Result};
use log::info;
use snake_evo::{Engine, EngineConfig, store};
use std::path::Path;
use std::str::FromStr;

/// Headless fixed-generation trainer. Usage:
///
///   snake-evo [generations] [population] [width] [height]
///
/// Saves the best weights every 10 generations and at the end, and dumps the
/// per-generation history as JSON.
fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let mut args = std::env::args().skip(1);
    let generations: u64 = parse_arg(args.next(), 50, "generations")?;
    let population: usize = parse_arg(args.next(), 50, "population")?;
    let width: i32 = parse_arg(args.next(), 15, "width")?;
    let height: i32 = parse_arg(args.next(), 15, "height")?;

    let config = EngineConfig {
        population_size: population,
        field_width: width,
        field_height: height,
        ..EngineConfig::default()
    };
    info!("training {generations} generations, population {population}, field {width}x{height}");

    let mut engine = Engine::new(config)?;
    for _ in 0..generations {
        let stats = engine.evolve_generation()?;
        info!(
            "generation {}: best score {} avg score {:.1} best fitness {:.1}",
            stats.cycle, stats.best_score, stats.avg_score, stats.best_fitness
        );
        if stats.cycle % 10 == 0 {
            save_best(&engine, &format!("best_gen_{}.bin", stats.cycle))?;
        }
    }

    save_best(&engine, "best.bin")?;
    let json = serde_json::to_string_pretty(engine.history())
        .context("failed to encode training history")?;
    std::fs::write("history.json", json).context("failed to write history.json")?;

    info!(
        "done: best score {} best fitness {:.1}",
        engine.best_score(),
        engine.best_fitness()
    );
    Ok(())
}

fn save_best(engine: &Engine, name: &str) -> Result<()> {
    if let Some(weights) = engine.best_weights() {
        store::save_weights(Path::new(name), &weights)?;
        info!("saved best model to {name}");
    }
    Ok(())
}

fn parse_arg<T: FromStr>(arg: Option<String>, default: T, name: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match arg {
        Some(raw) => raw
            .parse()
            .with_context(|| format!("invalid {name}: {raw:?}")),
        None => Ok(default),
    }
}
