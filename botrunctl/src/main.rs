use clap::Parser;

fn main() {
    let cli = botrunctl::Cli::parse();
    if let Err(err) = botrunctl::run(cli) {
        eprintln!("erro: {err}");
        std::process::exit(1);
    }
}
