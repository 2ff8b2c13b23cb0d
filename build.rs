// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: recipe store root
fn store_arg() -> Arg {
    Arg::new("store").required(true).help("Recipe store root")
}

/// Common argument: configuration file
fn config_arg() -> Arg {
    Arg::new("config")
        .short('c')
        .long("config")
        .value_name("FILE")
        .help("Configuration file (default: biocook.toml in the store root)")
}

fn platform_arg() -> Arg {
    Arg::new("platform")
        .short('p')
        .long("platform")
        .action(ArgAction::Append)
        .help("Target platform (repeatable; default: the host platform)")
}

fn only_arg() -> Arg {
    Arg::new("only")
        .long("only")
        .value_delimiter(',')
        .help("Only these recipes and their build dependencies")
}

fn build_cli() -> Command {
    Command::new("biocook")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Biocook Contributors")
        .about("Recipe build orchestrator")
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::Count)
                .global(true)
                .help("More log output (repeatable)"),
        )
        .arg(
            Arg::new("quiet")
                .short('q')
                .long("quiet")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Only log warnings and errors"),
        )
        .subcommand(
            Command::new("build")
                .about("Build every recipe that is missing or stale")
                .arg(store_arg())
                .arg(config_arg())
                .arg(Arg::new("jobs").short('j').long("jobs").help("Maximum simultaneous build jobs"))
                .arg(platform_arg())
                .arg(
                    Arg::new("dry_run")
                        .long("dry-run")
                        .action(ArgAction::SetTrue)
                        .help("Show what would be built without building"),
                )
                .arg(
                    Arg::new("force")
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Rebuild up-to-date recipes too"),
                )
                .arg(only_arg())
                .arg(Arg::new("report").long("report").help("Write a JSON run report here"))
                .arg(
                    Arg::new("no_package")
                        .long("no-package")
                        .action(ArgAction::SetTrue)
                        .help("Skip image staging and upload"),
                )
                .arg(
                    Arg::new("markdown")
                        .long("markdown")
                        .action(ArgAction::SetTrue)
                        .help("Print a markdown summary instead of plain text"),
                ),
        )
        .subcommand(
            Command::new("lint")
                .about("Lint recipes without building")
                .arg(store_arg())
                .arg(config_arg())
                .arg(only_arg())
                .arg(
                    Arg::new("markdown")
                        .long("markdown")
                        .action(ArgAction::SetTrue)
                        .help("Print the report as markdown"),
                ),
        )
        .subcommand(
            Command::new("graph")
                .about("Show the build order of the recipe store")
                .arg(store_arg())
                .arg(config_arg())
                .arg(
                    Arg::new("dot")
                        .long("dot")
                        .action(ArgAction::SetTrue)
                        .help("Print Graphviz dot instead of the build order"),
                ),
        )
        .subcommand(
            Command::new("status")
                .about("Classify every task against the artifact store")
                .arg(store_arg())
                .arg(config_arg())
                .arg(platform_arg())
                .arg(only_arg()),
        )
        .subcommand(
            Command::new("bump")
                .about("Increment the build number of the named recipes")
                .arg(store_arg())
                .arg(config_arg())
                .arg(
                    Arg::new("names")
                        .required(true)
                        .action(ArgAction::Append)
                        .help("Recipe names"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = match env::var("OUT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=OUT_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = out_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("biocook.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
