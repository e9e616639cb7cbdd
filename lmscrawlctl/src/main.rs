use clap::Parser;
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = lmscrawlctl::Cli::parse();
    init_tracing(cli.verbose);
    if let Err(err) = lmscrawlctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

// Run progress already reaches stdout as events, so the default filter only
// lets warnings through to stderr.
fn init_tracing(verbose: bool) {
    let fallback = if verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)),
        )
        .with_writer(std::io::stderr)
        .init();
}
