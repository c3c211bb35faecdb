use clap::{App, Arg, ArgMatches};
use kiln::build::{build_site, Result};
use kiln::config::{Config, Overrides};
use std::path::PathBuf;
use tracing::{info, Level};

fn app() -> App<'static, 'static> {
    let path_arg = |name: &'static str, short: &'static str, value: &'static str, help: &'static str| {
        Arg::with_name(name)
            .short(short)
            .long(name)
            .value_name(value)
            .takes_value(true)
            .help(help)
    };

    App::new(env!("CARGO_PKG_NAME"))
        .version(env!("CARGO_PKG_VERSION"))
        .about("Incrementally builds a static site from a tree of markdown documents")
        .arg(path_arg("config", "c", "FILE", "Use this configuration file instead of searching for kiln.yaml"))
        .arg(path_arg("root", "r", "DIR", "The project root"))
        .arg(path_arg("cache", "C", "FILE", "The cache database"))
        .arg(path_arg("source", "s", "DIR", "The content directory"))
        .arg(path_arg("destination", "d", "DIR", "The output directory"))
        .arg(path_arg("static", "f", "DIR", "The static asset directory"))
        .arg(path_arg("template", "t", "DIR", "The template directory"))
        .arg(
            Arg::with_name("rebuild")
                .short("R")
                .long("rebuild")
                .help("Discard the cache and regenerate everything"),
        )
        .arg(
            Arg::with_name("verbose")
                .short("v")
                .long("verbose")
                .multiple(true)
                .help("Log what is written (-v) or every decision (-vv)"),
        )
        .arg(
            Arg::with_name("files")
                .value_name("FILES")
                .multiple(true)
                .help("Process only these documents"),
        )
}

fn init_logging(verbosity: u64) {
    let level = match verbosity {
        0 => Level::WARN,
        1 => Level::INFO,
        _ => Level::DEBUG,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stdout)
        .init();
}

fn overrides(matches: &ArgMatches) -> Overrides {
    let path = |name: &str| matches.value_of_os(name).map(PathBuf::from);
    Overrides {
        config_file: path("config"),
        root: path("root"),
        cache: path("cache"),
        source: path("source"),
        destination: path("destination"),
        static_directory: path("static"),
        template_directory: path("template"),
        rebuild: matches.is_present("rebuild"),
    }
}

fn run(matches: &ArgMatches) -> Result<()> {
    let cwd = std::env::current_dir()?;
    let config = Config::load(&cwd, &overrides(matches))?;
    let files: Vec<PathBuf> = matches
        .values_of_os("files")
        .map(|values| values.map(PathBuf::from).collect())
        .unwrap_or_default();

    let summary = build_site(&config, &files)?;
    info!(
        "done: {} paths and {} tags affected",
        summary.affected_paths, summary.affected_tags
    );
    Ok(())
}

fn main() {
    let matches = app().get_matches();
    init_logging(matches.occurrences_of("verbose"));

    if let Err(err) = run(&matches) {
        eprintln!("error: {}", err);
        std::process::exit(1);
    }
}
