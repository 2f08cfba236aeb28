use clap::Parser;

fn main() {
    let cli = placebookctl::Cli::parse();
    placebookctl::init_tracing(&cli);
    if let Err(err) = placebookctl::run(cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
