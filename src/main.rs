use colored::Colorize;
use mlinzi::cli::Cli;
use mlinzi::logging::init_cli_logging;

fn main() {
    init_cli_logging();

    if let Err(e) = Cli::run() {
        eprintln!("{} {}", "✗ Error:".red().bold(), e);
        std::process::exit(1);
    }
}
