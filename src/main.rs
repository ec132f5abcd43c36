mod benchmark;
mod cli;
mod config;
mod fsutil;
mod leaderboard;
mod logging;
mod model;
mod repository;
mod submission;
mod validation;

use std::process;

use config::Settings;

fn main() {
    logging::init();

    let settings = match Settings::load() {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Failed to load config: {e}");
            process::exit(1);
        }
    };

    if let Err(e) = cli::run(&settings) {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}
