//! Command-line interface for rnaseq-tfa

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::ConfigOverrides;

#[derive(Parser)]
#[command(name = "rnaseq-tfa")]
#[command(version)]
#[command(about = "RNA-seq differential expression and transcription factor activity inference")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the full analysis
    #[command(
        long_about = "Run the full analysis\n\n\
            Renames and annotates the count table, filters low-expression genes,\n\
            fits the negative binomial model, tests and shrinks the contrast, and\n\
            scores TF activity with a univariate linear model.",
        after_long_help = "\
Examples:
  # Everything from a config file
  rnaseq-tfa run --config analysis.json

  # Defaults with input paths on the command line
  rnaseq-tfa run --counts geneCounts.csv --design Study_design.csv \\
    --annotation biomart.tsv --network collectri.csv -o results"
    )]
    Run {
        /// JSON configuration file
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Gene count table (first column ENSEMBL_ID)
        #[arg(short, long, value_name = "FILE")]
        counts: Option<PathBuf>,

        /// Study design (Study_ID, New_Sample_name)
        #[arg(short, long, value_name = "FILE")]
        design: Option<PathBuf>,

        /// Ensembl ID to gene symbol table
        #[arg(short, long, value_name = "FILE")]
        annotation: Option<PathBuf>,

        /// Regulatory network (source, target, weight)
        #[arg(short, long, value_name = "FILE")]
        network: Option<PathBuf>,

        /// Output directory
        #[arg(short, long = "output-dir", value_name = "DIR")]
        output_dir: Option<PathBuf>,

        /// Number of worker threads
        #[arg(short, long, value_name = "N")]
        threads: Option<usize>,

        /// Skip all plots
        #[arg(long)]
        no_plots: bool,
    },

    /// Write the prepared and expression-filtered count matrix
    Filter {
        /// JSON configuration file
        #[arg(long, value_name = "FILE")]
        config: Option<PathBuf>,

        /// Output CSV
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Score TF activity from an existing results table
    Activity {
        /// Results CSV written by `run`
        #[arg(short, long, value_name = "FILE")]
        results: PathBuf,

        /// Regulatory network (source, target, weight)
        #[arg(short, long, value_name = "FILE")]
        network: PathBuf,

        /// Column name of the activity tables
        #[arg(long, value_name = "NAME")]
        name: Option<String>,

        /// Minimum targets per source
        #[arg(long, value_name = "N")]
        min_n: Option<usize>,

        /// Output directory
        #[arg(short, long = "output-dir", value_name = "DIR")]
        output_dir: PathBuf,

        /// Skip all plots
        #[arg(long)]
        no_plots: bool,
    },

    /// Write the default configuration as JSON
    InitConfig {
        /// Destination file
        #[arg(short, long, value_name = "FILE", default_value = "rnaseq-tfa.json")]
        output: PathBuf,
    },
}

impl Commands {
    /// Command-line values that override the configuration file
    pub fn overrides(&self) -> ConfigOverrides {
        match self {
            Commands::Run {
                counts,
                design,
                annotation,
                network,
                output_dir,
                threads,
                no_plots,
                ..
            } => ConfigOverrides {
                counts: counts.clone(),
                design: design.clone(),
                annotation: annotation.clone(),
                network: network.clone(),
                output_dir: output_dir.clone(),
                n_cpus: *threads,
                no_plots: *no_plots,
            },
            Commands::Activity {
                network,
                output_dir,
                no_plots,
                ..
            } => ConfigOverrides {
                network: Some(network.clone()),
                output_dir: Some(output_dir.clone()),
                no_plots: *no_plots,
                ..ConfigOverrides::default()
            },
            _ => ConfigOverrides::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_run_flags() {
        let cli = Cli::try_parse_from([
            "rnaseq-tfa",
            "run",
            "--counts",
            "c.csv",
            "-o",
            "out",
            "--threads",
            "4",
            "--no-plots",
            "-v",
        ])
        .unwrap();
        assert!(cli.verbose);
        let overrides = cli.command.overrides();
        assert_eq!(overrides.counts, Some(PathBuf::from("c.csv")));
        assert_eq!(overrides.output_dir, Some(PathBuf::from("out")));
        assert_eq!(overrides.n_cpus, Some(4));
        assert!(overrides.no_plots);
    }

    #[test]
    fn test_activity_requires_inputs() {
        assert!(Cli::try_parse_from(["rnaseq-tfa", "activity", "--results", "r.csv"]).is_err());
        let cli = Cli::try_parse_from([
            "rnaseq-tfa",
            "activity",
            "-r",
            "r.csv",
            "-n",
            "net.csv",
            "-o",
            "acts",
            "--min-n",
            "3",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Activity { min_n: Some(3), .. }));
    }

    #[test]
    fn test_init_config_default_path() {
        let cli = Cli::try_parse_from(["rnaseq-tfa", "init-config"]).unwrap();
        match cli.command {
            Commands::InitConfig { output } => assert_eq!(output, PathBuf::from("rnaseq-tfa.json")),
            _ => panic!("expected init-config"),
        }
    }
}
