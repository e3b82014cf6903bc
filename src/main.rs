//! Command-line front end: pick a dialect, load, emit code or JSON.

use anyhow::{anyhow, bail, Context, Result};
use getopts::{Matches, Options};
use log::error;
use regwire::{codec, generator, load_str, Schema};
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process;

fn print_usage(program: &str, opts: &Options) {
    let brief = format!("Usage: {program} [options] [input]");
    print!("{}", opts.usage(&brief));
}

fn setup_logger(verbose: bool) {
    let level = if verbose { log::LevelFilter::Debug } else { log::LevelFilter::Warn };
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!("[{}] {}", record.level(), message));
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()
        .expect("the logger is initialized once");
}

fn main() {
    let args: Vec<String> = std::env::args().collect();
    let program = "regwire";
    let mut opts = Options::new();
    opts.optopt("s", "schema", "input dialect", "svd|atdf|json|dslite|xml");
    opts.optopt("o", "output_path", "write the output here instead of stdout", "PATH");
    opts.optflag("j", "json", "emit canonical JSON instead of code");
    opts.optflag("v", "verbose", "activate verbose output");
    opts.optflag("h", "help", "show this help message");
    let matches = match opts.parse(&args[1..]) {
        Ok(matches) => matches,
        Err(err) => {
            eprintln!("{program}: {err}");
            print_usage(program, &opts);
            process::exit(1);
        }
    };
    if matches.opt_present("h") {
        print_usage(program, &opts);
        return;
    }
    setup_logger(matches.opt_present("v"));
    if let Err(err) = run(&matches) {
        error!("{err:#}");
        process::exit(1);
    }
}

fn run(matches: &Matches) -> Result<()> {
    if matches.free.len() > 1 {
        bail!("expected at most one input path, got {}", matches.free.len());
    }
    let input_path = matches.free.first().map(PathBuf::from);
    let schema = match matches.opt_str("s") {
        Some(text) => text.parse()?,
        None => {
            let path = input_path
                .as_deref()
                .ok_or_else(|| anyhow!("--schema is required when reading standard input"))?;
            Schema::from_path(path)
                .ok_or_else(|| anyhow!("cannot infer a schema from `{}`", path.display()))?
        }
    };
    let text = match &input_path {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("cannot read `{}`", path.display()))?,
        None => {
            let mut text = String::new();
            std::io::stdin()
                .read_to_string(&mut text)
                .context("cannot read standard input")?;
            text
        }
    };
    let db = load_str(schema, &text)?;
    let output = if matches.opt_present("j") {
        codec::to_json_string(&db)?.into_bytes()
    } else {
        generator::generate_to_vec(&db)?
    };
    match matches.opt_str("o") {
        Some(path) => write_output(Path::new(&path), &output)?,
        None => std::io::stdout().write_all(&output).context("cannot write standard output")?,
    }
    Ok(())
}

// Create-or-truncate; parent directories are created for relative paths.
fn write_output(path: &Path, bytes: &[u8]) -> Result<()> {
    if path.is_relative() {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("cannot create `{}`", parent.display()))?;
            }
        }
    }
    fs::write(path, bytes).with_context(|| format!("cannot write `{}`", path.display()))
}
