use std::io::{stdin, stdout};

use clap::Command;

fn main() {
    let command = Command::new("fontgoggles-worker")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Compiler worker for the fontgoggles font loader")
        .long_about(
            "Reads one job per line on stdin and answers with the job's output \
             followed by a SUCCESS or ERROR line. Not meant to be run by hand.",
        )
        .arg(
            clap::Arg::new("verbosity")
                .short('v')
                .long("verbosity")
                .help("Set the level of verbosity")
                .action(clap::ArgAction::Count),
        );
    let args = command.get_matches();

    let mut logger = env_logger::Builder::new();
    logger.filter_level(match args.get_count("verbosity") {
        0 => log::LevelFilter::Warn,
        1 => log::LevelFilter::Info,
        2 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    });
    if let Ok(filters) = std::env::var("RUST_LOG") {
        logger.parse_filters(&filters);
    }
    // stdout carries the job protocol
    logger.target(env_logger::Target::Stderr).init();

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .worker_threads(1)
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            log::error!("Could not start runtime: {e}");
            std::process::exit(1);
        }
    };
    if let Err(e) = fontgoggles::worker::install_interrupt_handler(&runtime) {
        log::error!("Could not install interrupt handler: {e}");
        std::process::exit(1);
    }
    let mut output = stdout().lock();
    if let Err(e) = fontgoggles::worker::announce_ready(&mut output) {
        log::error!("{e}");
        std::process::exit(1);
    }
    if let Err(e) = fontgoggles::worker::serve(stdin().lock(), output) {
        log::error!("{e}");
        std::process::exit(1);
    }
}
