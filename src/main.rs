use std::error::Error;
use tracing_subscriber::EnvFilter;
use write_behind::config::WriteBehindConfig;
use write_behind::queue::{run_dst_batch, summarize_batch, WriteBehindDSTConfig};

const ENV_SEEDS: &str = "WRITE_BEHIND_SEEDS";
const ENV_STEPS: &str = "WRITE_BEHIND_STEPS";
const ENV_LOG_JSON: &str = "WRITE_BEHIND_LOG_JSON";

fn env_number(name: &str, default: u64) -> Result<u64, Box<dyn Error>> {
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| format!("{} must be a number, got {:?}", name, raw).into()),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if std::env::var_os(ENV_LOG_JSON).is_some() {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let config = WriteBehindConfig::from_env()?;
    let seeds = env_number(ENV_SEEDS, 100)? as usize;
    let steps = env_number(ENV_STEPS, 500)? as usize;

    println!("=== Write-Behind Deterministic Simulation ===");
    println!(
        "cache={} coalesce={} max_batch_size={} seeds={} steps={}\n",
        config.cache_alias, config.coalesce, config.max_batch_size, seeds, steps
    );

    let policy = config.policy();
    let modes: [(&str, fn(u64) -> WriteBehindDSTConfig); 3] = [
        ("calm", WriteBehindDSTConfig::calm),
        ("moderate", WriteBehindDSTConfig::moderate),
        ("chaos", WriteBehindDSTConfig::chaos),
    ];

    let mut failed = false;
    for (name, preset) in modes {
        let results = run_dst_batch(0, seeds, steps, |seed| WriteBehindDSTConfig {
            policy,
            ..preset(seed)
        })
        .await;

        println!("--- {} ---", name);
        println!("{}", summarize_batch(&results));
        for result in results.iter().filter(|r| !r.is_success()) {
            failed = true;
            for violation in &result.invariant_violations {
                println!("  {}", violation);
            }
        }
        println!();
    }

    if failed {
        return Err("invariant violations found".into());
    }
    println!("=== All seeds passed ===");
    Ok(())
}
