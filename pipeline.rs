use std::{
    io,
    path::{Path, PathBuf},
};

use genawaiter::{rc::gen, yield_};
use serde::Serialize;
use thiserror::Error;

use crate::{tree::WorkingTree, CopySpec, PatchRule, Step};

/// A fatal failure. The run stops where it happened; earlier edits stay
/// on disk and rerunning against a fresh regeneration is the recovery
/// path.
#[derive(Debug, Error)]
pub enum PatchError {
    #[error("invalid glob {glob:?}")]
    BadGlob {
        glob: String,
        #[source]
        source: globset::Error,
    },
    #[error("invalid pattern {pattern:?}")]
    BadPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },
    #[error("failed to walk {path:?}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
    #[error("failed to read {path:?}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to write {path:?}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("rewrite for {pattern:?} did not reach a fixed point")]
    NoFixedPoint { pattern: String },
    #[error("failed to read manifest {path:?}")]
    ManifestRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse manifest {path:?}")]
    ManifestParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("malformed step: {reason}")]
    BadStep { reason: String },
    #[error("unknown variable {name:?}")]
    UnknownVar { name: String },
    #[error("unknown rewrite {name:?}")]
    UnknownRewrite { name: String },
}

/// One observable event of a run.
#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// A copy step wrote this file verbatim.
    Copied { path: PathBuf },
    /// A merge copy reconciled this file with its committed version.
    Merged { path: PathBuf },
    /// A patch rule rewrote this file.
    Patched { path: PathBuf, replacements: usize },
    /// A patch rule's globs matched no files.
    NotApplicable { globs: Vec<String> },
}

/// An ordered list of steps applied to a working tree, step by step,
/// glob by glob, file by file.
#[derive(Debug, Default)]
pub struct Pipeline {
    steps: Vec<Step>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_steps(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
        }
    }

    /// Append a copy step.
    pub fn copy(mut self, spec: CopySpec) -> Self {
        self.steps.push(Step::Copy(spec));
        self
    }

    /// Append a patch step.
    pub fn patch(mut self, rule: PatchRule) -> Self {
        self.steps.push(Step::Patch(rule));
        self
    }

    /// Run every step in declaration order against `tree`, copying from
    /// the freshly generated tree at `source`, and yield one item per
    /// observable event.
    ///
    /// The stream ends after the first error; there is no per-step
    /// try/continue and no rollback. A file containing no occurrence of
    /// a rule's pattern is left byte-for-byte unchanged and yields
    /// nothing.
    pub fn run<'a>(
        &'a self,
        source: &'a Path,
        tree: &'a WorkingTree,
    ) -> impl Iterator<Item = Result<Outcome, PatchError>> + 'a {
        gen!({
            for step in &self.steps {
                match step {
                    Step::Copy(spec) => match spec.apply(source, tree) {
                        Ok(outcomes) => {
                            for outcome in outcomes {
                                yield_!(Ok(outcome));
                            }
                        }
                        Err(error) => {
                            yield_!(Err(error));
                            return;
                        }
                    },
                    Step::Patch(rule) => {
                        let paths = match tree.matched(rule.globs()) {
                            Ok(paths) => paths,
                            Err(error) => {
                                yield_!(Err(error));
                                return;
                            }
                        };
                        if paths.is_empty() {
                            yield_!(Ok(Outcome::NotApplicable {
                                globs: rule.globs().to_vec(),
                            }));
                            continue;
                        }
                        for path in paths {
                            let contents = match tree.read(&path) {
                                Ok(contents) => contents,
                                Err(source) => {
                                    yield_!(Err(PatchError::Read { path, source }));
                                    return;
                                }
                            };
                            match rule.apply(&contents) {
                                Ok(None) => {}
                                Ok(Some((patched, replacements))) => {
                                    if let Err(source) = tree.write(&path, &patched) {
                                        yield_!(Err(PatchError::Write { path, source }));
                                        return;
                                    }
                                    yield_!(Ok(Outcome::Patched { path, replacements }));
                                }
                                Err(error) => {
                                    yield_!(Err(error));
                                    return;
                                }
                            }
                        }
                    }
                }
            }
        })
        .into_iter()
    }
}
