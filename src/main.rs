use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use tracing_subscriber::EnvFilter;

use decfan::worker::{Worker, WorkerError};

fn parse_args() -> Result<(u32, PathBuf), WorkerError> {
    let mut args = env::args().skip(1);
    let (Some(id), Some(path), None) = (args.next(), args.next(), args.next()) else {
        return Err(WorkerError::Usage);
    };

    let id: u32 = id
        .parse()
        .map_err(|_| WorkerError::BadWorkerId(id.clone()))?;

    Ok((id, PathBuf::from(path)))
}

fn run() -> Result<(), WorkerError> {
    let (id, decoder_path) = parse_args()?;
    let mut worker = Worker::start(id, &decoder_path)?;
    worker.run().map_err(WorkerError::Dispatch)?;
    Ok(())
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("decfan-worker: {e}");
            ExitCode::FAILURE
        }
    }
}
