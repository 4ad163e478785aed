use atm_watch::commands::{self, Command};
use atm_watch::config::Config;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "atm_watch")]
#[command(about = "ATM camera anomaly monitoring and alert dispatch", long_about = None)]
#[command(version)]
struct Args {
    /// Verbose output (-v, -vv, -vvv)
    #[arg(short = 'v', action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let args = Args::parse();

    // Set verbosity level (0-3)
    let verbosity = args.verbose.min(3);

    Config::ensure_log_directory().ok();
    atm_watch::init_tracing(verbosity, Some(Config::log_file_path()));
    tracing::debug!(
        "atm_watch {} (built {}) starting",
        Config::version(),
        Config::build_date()
    );

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Failed to create tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(code) = rt.block_on(commands::run(args.command)) {
        std::process::exit(code);
    }
}
