use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::{
    copy::preserve_fields, pipeline::PatchError, rule::escape_braces, CopySpec, PatchRule,
    Pipeline, Step,
};

/// The plan manifest: an options map plus one ordered step list.
///
/// `{{name}}` placeholders in globs, patterns, and replacements are
/// substituted from the options map before compilation. Values are
/// opaque pass-through strings supplied by the generation
/// orchestrator; referencing an unknown name is fatal.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    /// Named options available to steps.
    #[serde(default)]
    vars: BTreeMap<String, String>,
    /// Ordered copies and patches.
    #[serde(default, rename = "step")]
    steps: Vec<StepSpec>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StepSpec {
    /// Copy a subtree of the generated tree into the working tree.
    #[serde(default)]
    copy: Option<CopyStanza>,
    /// Carry these `name = "value"` fields over from the committed
    /// file when a copy overwrites it.
    #[serde(default)]
    preserve: Vec<String>,
    /// Globs selecting the files a patch applies to.
    #[serde(default)]
    globs: Vec<String>,
    /// Regular expression over file contents.
    #[serde(default)]
    pattern: Option<String>,
    /// Literal replacement with `$n` back-references.
    #[serde(default)]
    replace: Option<String>,
    /// Name of a built-in rewrite (`escape-braces`).
    #[serde(default)]
    rewrite: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CopyStanza {
    source: PathBuf,
    dest: PathBuf,
}

impl Manifest {
    /// Load a manifest from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PatchError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| PatchError::ManifestRead {
            path: path.to_owned(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| PatchError::ManifestParse {
            path: path.to_owned(),
            source,
        })
    }

    /// Merge orchestrator-supplied variables over the manifest's own.
    pub fn with_vars(mut self, vars: impl IntoIterator<Item = (String, String)>) -> Self {
        self.vars.extend(vars);
        self
    }

    /// Compile the manifest into a runnable pipeline. Fails on the
    /// first bad step: malformed stanza, unknown variable, unknown
    /// rewrite name, or invalid pattern.
    pub fn into_pipeline(self) -> Result<Pipeline, PatchError> {
        let mut steps = Vec::new();
        for spec in self.steps {
            steps.push(spec.compile(&self.vars)?);
        }
        Ok(Pipeline::from_steps(steps))
    }
}

impl StepSpec {
    fn compile(self, vars: &BTreeMap<String, String>) -> Result<Step, PatchError> {
        let globs = self
            .globs
            .iter()
            .map(|glob| interpolate(glob, vars))
            .collect::<Result<Vec<_>, _>>()?;
        match (self.copy, self.replace, self.rewrite) {
            (Some(copy), None, None) => {
                if self.pattern.is_some() || !globs.is_empty() {
                    return Err(PatchError::BadStep {
                        reason: "copy steps take no globs or pattern".into(),
                    });
                }
                let spec = CopySpec::new(copy.source, copy.dest);
                Ok(Step::Copy(if self.preserve.is_empty() {
                    spec
                } else {
                    spec.with_merge(preserve_fields(self.preserve))
                }))
            }
            (None, Some(replace), None) => {
                let Some(pattern) = self.pattern else {
                    return Err(PatchError::BadStep {
                        reason: "replace steps need a pattern".into(),
                    });
                };
                if !self.preserve.is_empty() {
                    return Err(PatchError::BadStep {
                        reason: "preserve only applies to copy steps".into(),
                    });
                }
                Ok(Step::Patch(PatchRule::replace(
                    globs,
                    &interpolate(&pattern, vars)?,
                    interpolate(&replace, vars)?,
                )?))
            }
            (None, None, Some(rewrite)) => {
                if self.pattern.is_some() {
                    return Err(PatchError::BadStep {
                        reason: "rewrite steps carry their own pattern".into(),
                    });
                }
                match rewrite.as_str() {
                    "escape-braces" => Ok(Step::Patch(escape_braces(globs))),
                    _ => Err(PatchError::UnknownRewrite { name: rewrite }),
                }
            }
            _ => Err(PatchError::BadStep {
                reason: "each step is exactly one of copy, replace, or rewrite".into(),
            }),
        }
    }
}

/// Substitute `{{name}}` placeholders from the options map.
fn interpolate(text: &str, vars: &BTreeMap<String, String>) -> Result<String, PatchError> {
    // Static pattern; just panic on failures to compile.
    let placeholder = regex::Regex::new(r"\{\{\s*([A-Za-z0-9_]+)\s*\}\}").unwrap();
    let mut missing = None;
    let interpolated = placeholder
        .replace_all(text, |caps: &regex::Captures<'_>| match vars.get(&caps[1]) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| caps[1].to_owned());
                String::new()
            }
        })
        .into_owned();
    match missing {
        Some(name) => Err(PatchError::UnknownVar { name }),
        None => Ok(interpolated),
    }
}
