use std::io::Write;
use std::process::exit;

use chrono::Local;
use clap::{error::ErrorKind, Parser};
use env_logger::{Builder, Target};
use log::LevelFilter;

use app::cli::{Cli, USAGE};
use app::sampler::select_and_save;

fn main() {
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} [{}] - {}",
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                record.args()
            )
        })
        .filter(None, LevelFilter::Info)
        .target(Target::Stdout)
        .init();

    let args = match Cli::try_parse() {
        Ok(args) => args,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            e.exit()
        }
        Err(_) => {
            println!("{USAGE}");
            exit(1);
        }
    };

    log::info!("samples directory: {:?}", args.samples_dir);
    log::info!("output file: {:?}", args.output_path);
    if !args.rest.is_empty() {
        log::debug!("ignoring extra arguments: {:?}", args.rest);
    }

    let index = args.index();
    if index.is_none() {
        if let Some(raw) = &args.index {
            log::info!("index {:?} is not an integer, picking a random sample", raw);
        }
    }

    let start = std::time::Instant::now();
    match select_and_save(&args.samples_dir, &args.output_path, index) {
        Ok(index) => {
            log::info!("Elapsed: {:?}", start.elapsed());
            println!("{index}");
        }
        Err(e) => {
            log::error!("{}", e);
            exit(1);
        }
    }
}
