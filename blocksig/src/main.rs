//! Block signature calculator.
//!
//! Splits a file into blocks of a given size and prints the SHA-256 digest of every block, in block order:
//!
//! ```sh
//! printf abcdef > letters.txt
//! blocksig letters.txt 3
//! ```
//! ```text
//! 1 - BA7816BF8F01CFEA414140DE5DAE2223B00361A396177A9CB410FF61F20015AD
//! 2 - ...
//! ```
//!
//! Logs go to stderr and are controlled by the `RUST_LOG` environment variable, eg. `RUST_LOG=debug`.

use std::io;
use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::process::ExitCode;

use blocksig::{BlockSource, Failure, ResultSink, Sha256Digester, Stage, Summary, Synchronizer};
use clap::Parser;

/// Calculate signature of file divided by blocks with specified size.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Name or path to source file
    source_file: PathBuf,

    /// Size of each block in bytes
    block_size: NonZeroUsize,

    /// Number of digesting workers [default: number of available CPUs]
    #[arg(short = 'j', long)]
    workers: Option<NonZeroUsize>,
}

impl Args {
    fn workers(&self) -> NonZeroUsize {
        self.workers
            .or_else(|| std::thread::available_parallelism().ok())
            .unwrap_or(NonZeroUsize::MIN)
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) => {
            let _ = err.print();

            // help and version requests are not failures
            return if err.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
        }
    };

    log_args(&args);

    match run(&args) {
        Ok(_) => ExitCode::SUCCESS,
        Err(failure) => {
            eprintln!("error: {failure}");

            if let Some(hint) = failure.hint() {
                eprintln!("hint: {hint}");
            }

            ExitCode::FAILURE
        }
    }
}

fn log_args(args: &Args) {
    tracing::info!(
        "Computing signature of `{}` by blocks of {} bytes with {} workers",
        args.source_file.display(),
        args.block_size,
        args.workers()
    );
}

fn run(args: &Args) -> Result<Summary, Failure> {
    let source = BlockSource::open(&args.source_file, args.block_size).map_err(|err| Failure::new(Stage::Source, err))?;
    let sink = ResultSink::new(io::BufWriter::new(io::stdout()));

    Synchronizer::new(args.workers(), Sha256Digester).run(source, sink)
}
