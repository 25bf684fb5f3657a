use std::fs::File;
use std::io::{self, BufReader, BufWriter, Write};
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use log::info;

use attrition_survival::{
    load_raw_employees, open_model_store, save_training_outputs, train_attrition_model, AttritionConfig,
    EmployeeTable, Result, RiskScoreTable, RiskScorer, SurvivalCurveExtractor,
};

#[derive(Parser)]
#[command(
    name = "attrition",
    about = "Employee attrition risk from gradient-boosted survival analysis"
)]
struct Cli {
    /// TOML config file; defaults apply when omitted
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train on the raw HR export, save the model and the output tables
    Train {
        /// Raw csv; overrides the path from the config
        #[arg(long, value_name = "CSV")]
        data: Option<PathBuf>,

        /// Train and report without saving anything
        #[arg(long)]
        dry_run: bool,
    },

    /// Rank employees by predicted risk with the latest saved model
    Score {
        /// Employee csv with an EmployeeNumber column
        #[arg(value_name = "CSV")]
        input: PathBuf,

        /// Output csv (stdout when omitted)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Survival curves for the riskiest employees of a scored table
    Curves {
        /// Risk table written by `train` or `score`; defaults to the cached one
        #[arg(value_name = "CSV")]
        input: Option<PathBuf>,

        /// Number of employees to take from the top of the table
        #[arg(long, short = 'n', default_value = "10")]
        num_samples: usize,

        /// Output csv (stdout when omitted)
        #[arg(long, short)]
        output: Option<PathBuf>,
    },
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let result = load_config(cli.config).and_then(|config| match cli.command {
        Commands::Train { data, dry_run } => train(&config, data, dry_run),
        Commands::Score { input, output } => score(&config, input, output),
        Commands::Curves { input, num_samples, output } => curves(&config, input, num_samples, output),
    });

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_config(path: Option<PathBuf>) -> Result<AttritionConfig> {
    match path {
        Some(path) => AttritionConfig::load(path),
        None => Ok(AttritionConfig::default()),
    }
}

fn output_writer(path: Option<PathBuf>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(File::create(path)?)),
        None => Box::new(io::stdout().lock()),
    })
}

fn train(config: &AttritionConfig, data: Option<PathBuf>, dry_run: bool) -> Result<()> {
    let path = match data {
        Some(path) => path,
        None => config.raw_data_path()?,
    };
    info!("reading {}", path.display());
    let raw = load_raw_employees(BufReader::new(File::open(&path)?))?;

    let report = train_attrition_model(&raw, config)?;
    match report.concordance_index() {
        Some(c) => println!("validation concordance: {:.4}", c),
        None => println!("validation concordance: undefined"),
    }
    for row in report.feature_importance.rows().iter().take(10) {
        println!("{:>40} {:.4}", row.feature, row.importance);
    }

    if dry_run {
        return Ok(());
    }
    let key = open_model_store(config)?.save(&report.pipeline)?;
    save_training_outputs(&report, config)?;
    println!("model saved as {}", key);
    Ok(())
}

fn score(config: &AttritionConfig, input: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let pipeline = open_model_store(config)?.load_latest()?;
    let employees = EmployeeTable::from_csv_reader(BufReader::new(File::open(input)?))?;

    let scores = RiskScorer::new(&pipeline).score(&employees)?;
    scores.to_csv_writer(output_writer(output)?)
}

fn curves(config: &AttritionConfig, input: Option<PathBuf>, num_samples: usize, output: Option<PathBuf>) -> Result<()> {
    let pipeline = open_model_store(config)?.load_latest()?;
    let input = input.unwrap_or_else(|| config.risk_score_path());
    let scores = RiskScoreTable::from_csv_reader(BufReader::new(File::open(input)?))?;

    let (selected, curves) = SurvivalCurveExtractor::new(&pipeline).extract(&scores, num_samples)?;
    info!("{} employees selected", selected.n_rows());
    curves.to_csv_writer(output_writer(output)?)
}
