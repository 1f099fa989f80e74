use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use retouch::{Manifest, Outcome, PatchError, WorkingTree};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The plan manifest to run.
    #[arg(long, env = "RETOUCH_MANIFEST", default_value = "retouch.toml")]
    pub manifest: PathBuf,

    /// The freshly generated source tree copies are taken from.
    #[arg(long)]
    pub source: PathBuf,

    /// The destination working tree, patched in place.
    #[arg(long)]
    pub dest: PathBuf,

    /// Extra `name=value` variables, overriding the manifest's own.
    #[arg(long = "var", value_parser = parse_var)]
    pub vars: Vec<(String, String)>,
}

fn parse_var(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(name, value)| (name.to_owned(), value.to_owned()))
        .ok_or_else(|| format!("expected name=value, got {raw:?}"))
}

fn run(cli: Cli) -> Result<Vec<Outcome>, PatchError> {
    let pipeline = Manifest::load(&cli.manifest)?
        .with_vars(cli.vars)
        .into_pipeline()?;
    let tree = WorkingTree::new(&cli.dest).map_err(|source| PatchError::Read {
        path: cli.dest.clone(),
        source,
    })?;

    let mut outcomes = Vec::new();
    for result in pipeline.run(&cli.source, &tree) {
        let outcome = result?;
        match &outcome {
            Outcome::NotApplicable { globs } => warn!(?globs, "nothing matched"),
            Outcome::Copied { path } => info!(path = %path.display(), "copied"),
            Outcome::Merged { path } => info!(path = %path.display(), "merged"),
            Outcome::Patched { path, replacements } => {
                info!(path = %path.display(), replacements, "patched");
            }
        }
        outcomes.push(outcome);
    }
    Ok(outcomes)
}

fn main() -> ExitCode {
    tracing_subscriber::fmt().with_target(false).init();
    match run(Cli::parse()) {
        Ok(_) => ExitCode::SUCCESS,
        Err(error) => {
            error!(%error, "run aborted");
            ExitCode::FAILURE
        }
    }
}
