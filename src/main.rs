//! rnaseq-tfa command-line interface

use std::path::Path;

use clap::Parser;
use log::{info, LevelFilter};

use rnaseq_tfa::cli::{Cli, Commands};
use rnaseq_tfa::io::write_count_table;
use rnaseq_tfa::prelude::*;

fn main() {
    let cli = Cli::parse();

    let log_level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(log_level)
        .format_timestamp(None)
        .init();

    let overrides = cli.command.overrides();
    let result = match cli.command {
        Commands::Run { config, .. } => run(config.as_deref(), &overrides),
        Commands::Filter { config, output } => filter(config.as_deref(), &output),
        Commands::Activity {
            results,
            network,
            name,
            min_n,
            ..
        } => activity(&results, &network, name, min_n, &overrides),
        Commands::InitConfig { output } => init_config(&output),
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>, overrides: &ConfigOverrides) -> Result<AnalysisConfig> {
    let mut config = match path {
        Some(p) => {
            info!("Loading configuration from {}", p.display());
            AnalysisConfig::load(p)?
        }
        None => AnalysisConfig::default(),
    };
    config.apply_overrides(overrides);
    config.validate()?;
    Ok(config)
}

fn configure_threads(n: usize) {
    if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(n).build_global() {
        log::warn!("Could not configure {} worker threads: {}", n, e);
    }
}

fn run(config_path: Option<&Path>, overrides: &ConfigOverrides) -> Result<()> {
    let config = load_config(config_path, overrides)?;
    configure_threads(config.n_cpus);

    let report = run_pipeline(&config)?;
    println!("{}", report.summary);
    info!(
        "Tested {} of {} genes; scored {} sources",
        report.n_tested_genes, report.n_raw_genes, report.n_sources
    );
    for path in &report.outputs {
        info!("Wrote {}", path.display());
    }
    Ok(())
}

fn filter(config_path: Option<&Path>, output: &Path) -> Result<()> {
    let config = load_config(config_path, &ConfigOverrides::default())?;
    let prepared = prepare_counts(&config)?;
    write_count_table(output, &prepared.counts, "gene_symbol")?;
    info!(
        "Wrote {} genes x {} samples to {}",
        prepared.counts.n_genes(),
        prepared.counts.n_samples(),
        output.display()
    );
    Ok(())
}

fn activity(
    results: &Path,
    network: &Path,
    name: Option<String>,
    min_n: Option<usize>,
    overrides: &ConfigOverrides,
) -> Result<()> {
    let mut config = load_config(None, overrides)?;
    if let Some(name) = name {
        config.experiment_name = name;
    }
    if let Some(n) = min_n {
        config.ulm.min_n = n;
    }
    config.validate()?;
    configure_threads(config.n_cpus);

    let estimate = run_activity(results, network, &config)?;
    for i in estimate.top_sources(10) {
        println!(
            "{}\t{:.3}\t{:.3e}",
            estimate.sources[i], estimate.scores[i], estimate.pvalues[i]
        );
    }
    info!("Wrote {} and {}", config.tf_acts_path().display(), config.tf_pvals_path().display());
    Ok(())
}

fn init_config(output: &Path) -> Result<()> {
    AnalysisConfig::default().save(output)?;
    info!("Wrote default configuration to {}", output.display());
    Ok(())
}
