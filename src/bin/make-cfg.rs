use std::path::Path;

use anyhow::Result;
use log::{debug, error, info, warn};
#[macro_use]
extern crate clap;

use make_cfg::{analysis, export, function::Function, loader, program::Program, util};

fn _main() -> Result<()> {
    better_panic::install();

    let matches = clap::clap_app!(make_cfg =>
        (about: "Recover per-function control flow graphs and the call graph from a 32-bit ELF executable")
        (@arg verbose: -v --verbose +multiple "log verbose messages")
        (@arg quiet: -q --quiet "disable informational messages")
        (@arg dot: --dot +takes_value "directory for per-function .dot files and callgraph.dot")
        (@arg vcg: --vcg +takes_value "directory for per-function .vcg files and callgraph.vcg")
        (@arg json: --json +takes_value "directory for the aggregate cfg.json")
        (@arg cfg_out: --("cfg-out") +takes_value "path for the binary program snapshot")
        (@arg input: +required "path to the program to analyze"))
    .get_matches();

    // --quiet overrides --verbose
    let log_level = if matches.is_present("quiet") {
        log::LevelFilter::Error
    } else {
        match matches.occurrences_of("verbose") {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        }
    };

    fern::Dispatch::new()
        .format(move |out, message, record| {
            out.finish(format_args!(
                "{} [{:5}] {} {}",
                chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.level(),
                if log_level == log::LevelFilter::Trace {
                    record.target()
                } else {
                    ""
                },
                message
            ))
        })
        .level(log_level)
        .chain(std::io::stderr())
        .apply()
        .expect("failed to configure logging");

    let filename = matches.value_of("input").unwrap();
    debug!("input: {}", filename);

    let buf = util::read_file(filename)?;
    let image = loader::load(&buf)?;

    let mut program = Program::new(image, filename);
    analysis::analyze(&mut program)?;

    info!(
        "found {} functions, {} call edges",
        program.functions.len(),
        program.call_graph.call_count()
    );

    for function in program.functions.values() {
        if let Function::Built { entry, name, cfg, .. } = function {
            for violation in cfg.sanity_check() {
                warn!("{} {:#010x}: {}", name, entry, violation);
            }
        }
    }

    let json = matches.value_of("json");
    if let Some(dir) = json {
        export::json::write_dir(Path::new(dir), &program)?;
    }

    // one aggregate file for json; per-function files otherwise
    if let Some(dir) = matches.value_of("dot") {
        export::dot::write_dir(Path::new(dir), &program, json.is_none())?;
    }
    if let Some(dir) = matches.value_of("vcg") {
        export::vcg::write_dir(Path::new(dir), &program, json.is_none())?;
    }

    if let Some(path) = matches.value_of("cfg_out") {
        export::snapshot::write(Path::new(path), &program)?;
    }

    Ok(())
}

fn main() {
    if let Err(e) = _main() {
        error!("{:#}", e);
        std::process::exit(1);
    }
}
