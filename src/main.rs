// src/main.rs
use std::error::Error;
use std::process;

use tokio::runtime::Handle;
use tracing_subscriber::EnvFilter;

use stowage::advisor::{Advisor, HttpAdvisor, NoAdvisor};
use stowage::config::AppConfig;
use stowage::error::ConfigError;
use stowage::job::PackJob;
use stowage::optimizer::{GeneticOptimizer, OptimizerEvent};
use stowage::report::PackReport;

type BoxError = Box<dyn Error + Send + Sync>;

const USAGE: &str = "Usage: stowage <job.json> [--json]";

#[tokio::main]
async fn main() {
    if let Err(err) = dotenvy::dotenv() {
        if !matches!(err, dotenvy::Error::Io(ref io_err) if io_err.kind() == std::io::ErrorKind::NotFound)
        {
            eprintln!("⚠️ Could not load .env: {}", err);
        }
    }

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(job_path) = args.next() else {
        eprintln!("{USAGE}");
        process::exit(2);
    };
    let print_json = args.any(|arg| arg == "--json");

    if let Err(err) = run(&job_path, print_json).await {
        eprintln!("❌ {err}");
        process::exit(1);
    }
}

fn build_advisor(config: &AppConfig) -> Box<dyn Advisor> {
    let Some(url) = config.advisor.url() else {
        return Box::new(NoAdvisor);
    };
    match HttpAdvisor::new(url, config.advisor.timeout(), Handle::current()) {
        Ok(advisor) => {
            println!("🤝 Using advisory service at {}", advisor.base_url());
            Box::new(advisor)
        }
        Err(err) => {
            eprintln!("⚠️ Could not create advisory client for {}: {}. Running without advisor.", url, err);
            Box::new(NoAdvisor)
        }
    }
}

fn print_progress(event: &OptimizerEvent) {
    match event {
        OptimizerEvent::Started {
            items,
            population,
            generations,
            weights_source,
        } => println!(
            "🚀 Optimizing {} items: population {}, {} generations, {} weights",
            items, population, generations, weights_source
        ),
        OptimizerEvent::Generation {
            generation,
            best_fitness,
            best_ever,
            stagnation,
            focus,
            ..
        } => println!(
            "🧬 Generation {:>3}: best {:.4} (overall {:.4}, stagnation {}, focus {})",
            generation, best_fitness, best_ever, stagnation, focus
        ),
        OptimizerEvent::WeightsUpdated { generation, .. } => {
            println!("⚖️ Fitness weights updated at generation {}", generation)
        }
        OptimizerEvent::ItemRejected { name, reason_text, .. } => {
            println!("⚠️ {} not packed: {}", name, reason_text)
        }
        OptimizerEvent::ItemPlaced { .. } | OptimizerEvent::Finished { .. } => {}
    }
}

async fn run(job_path: &str, print_json: bool) -> Result<(), BoxError> {
    let config = AppConfig::from_env();
    let job = PackJob::from_path(job_path)?.into_validated()?;
    let settings = job.apply_to(config.optimizer.settings());
    println!("📦 Loaded {} ({} item units)", job_path, job.item_count());

    let advisor = build_advisor(&config);

    // Advisor calls block; keep construction and the run off the async workers.
    let result = tokio::task::spawn_blocking(move || {
        let mut optimizer = GeneticOptimizer::new(
            job.container,
            &job.items,
            job.route_temperature,
            job.weights.as_ref(),
            settings,
            advisor,
        )?;
        Ok::<_, ConfigError>(optimizer.run_with_progress(print_progress))
    })
    .await??;
    let report = PackReport::from_result(&result);

    println!(
        "✅ Packed {} items, {} unpacked, utilization {:.1}%, fitness {:.4}",
        report.placed.len(),
        report.unpacked.len(),
        report.metrics.volume_utilization * 100.0,
        report.fitness
    );
    println!(
        "⚖️ Total weight {:.1} kg, center of gravity ({:.2}, {:.2}, {:.2})",
        report.weight.total,
        report.weight.center_of_gravity.0,
        report.weight.center_of_gravity.1,
        report.weight.center_of_gravity.2
    );
    if !report.is_complete {
        println!("💡 {} items could not be placed", report.unpacked.len());
    }

    if print_json {
        println!("{}", report.to_json_pretty()?);
    }
    Ok(())
}
