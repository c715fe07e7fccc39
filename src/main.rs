mod cli;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use nir_ingest::assay::load_assay_files;
use nir_ingest::config::{load_params, Params};
use nir_ingest::driver::{run_load, run_parse};
use nir_ingest::report::{LogSink, RunReport};
use nir_ingest::store::Store;

fn open_store(params: &Params) -> Result<Store> {
    Store::open(&params.database).context("opening the measurement store")
}

fn execute(command: &Command, params: &Params, sink: &mut LogSink<RunReport>) -> Result<()> {
    match command {
        Command::Parse => {
            let n = run_parse(&params.dx_inputs(), &params.json_file, sink)?;
            log::info!("{n} measurements written to {}", params.json_file.display());
        }
        Command::Load => {
            let mut store = open_store(params)?;
            run_load(&params.json_file, &mut store, sink)?;
        }
        Command::Assay => {
            let mut store = open_store(params)?;
            load_assay_files(&params.dumas_files, &mut store, sink)?;
        }
        Command::Run => {
            run_parse(&params.dx_inputs(), &params.json_file, sink)?;
            let mut store = open_store(params)?;
            run_load(&params.json_file, &mut store, sink)?;
            if !params.dumas_files.is_empty() {
                load_assay_files(&params.dumas_files, &mut store, sink)?;
            }
        }
        Command::History { title } => {
            let store = open_store(params)?;
            let versions = store.history(title)?;
            println!("{}", serde_json::to_string_pretty(&versions)?);
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Command::Run);
    let params = load_params(&cli.params)?;

    let mut sink = LogSink::new(RunReport::default());
    let outcome = execute(&command, &params, &mut sink);

    // The report is written even when the run stopped early.
    let report = sink.into_inner();
    let report_path = params.report_path(command.name());
    report.write_json(&report_path)?;
    log::info!(
        "{}: {} errors, {} warnings, report at {}",
        command.name(),
        report.errors().count(),
        report.warnings().count(),
        report_path.display()
    );
    outcome
}
