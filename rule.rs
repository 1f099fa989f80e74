use std::fmt;

use bstr::BString;
use regex::bytes::{Captures, Regex};

use crate::pipeline::PatchError;

/// How a [`PatchRule`] rewrites each match of its pattern.
pub enum Replacement {
    /// A literal byte string; `$n` and `${name}` expand to capture
    /// groups of the pattern.
    Literal(BString),
    /// A pure function from a match of a coarser enclosing pattern to
    /// replacement bytes. The rule is re-applied to its own output
    /// until a pass changes nothing, so adjacent occurrences inside one
    /// match all get rewritten.
    Rewrite(Box<dyn Fn(&Captures<'_>) -> Vec<u8> + Send + Sync>),
}

impl fmt::Debug for Replacement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Replacement::Literal(literal) => f.debug_tuple("Literal").field(literal).finish(),
            Replacement::Rewrite(_) => f.write_str("Rewrite(..)"),
        }
    }
}

/// A single textual rewrite: globs selecting files in the working
/// tree, a pattern, and a replacement.
///
/// Applying a rule to its own output must not change the text further.
/// The rules this crate ships hold that invariant; rules built from
/// manifests carry it as a documented obligation.
#[derive(Debug)]
pub struct PatchRule {
    globs: Vec<String>,
    pattern: Regex,
    replacement: Replacement,
}

/// Passes after which a non-converging [`Replacement::Rewrite`] aborts.
const MAX_REWRITE_PASSES: usize = 16;

impl PatchRule {
    /// A literal replacement rule. Fails if the pattern is not a valid
    /// regular expression.
    pub fn replace(
        globs: impl IntoIterator<Item = impl Into<String>>,
        pattern: &str,
        replacement: impl Into<BString>,
    ) -> Result<Self, PatchError> {
        Ok(Self {
            globs: globs.into_iter().map(Into::into).collect(),
            pattern: compile(pattern)?,
            replacement: Replacement::Literal(replacement.into()),
        })
    }

    /// A function replacement rule. Fails if the pattern is not a
    /// valid regular expression.
    pub fn rewrite(
        globs: impl IntoIterator<Item = impl Into<String>>,
        pattern: &str,
        rewrite: impl Fn(&Captures<'_>) -> Vec<u8> + Send + Sync + 'static,
    ) -> Result<Self, PatchError> {
        Ok(Self {
            globs: globs.into_iter().map(Into::into).collect(),
            pattern: compile(pattern)?,
            replacement: Replacement::Rewrite(Box::new(rewrite)),
        })
    }

    pub(crate) fn globs(&self) -> &[String] {
        &self.globs
    }

    /// Apply the rule to one file's contents. Returns the rewritten
    /// bytes and the number of replacements, or `None` when the file
    /// is left untouched.
    pub(crate) fn apply(&self, contents: &[u8]) -> Result<Option<(BString, usize)>, PatchError> {
        match &self.replacement {
            Replacement::Literal(replacement) => {
                let mut replacements = 0;
                let patched = self.pattern.replace_all(contents, |caps: &Captures<'_>| {
                    replacements += 1;
                    let mut expanded = Vec::new();
                    caps.expand(replacement.as_slice(), &mut expanded);
                    expanded
                });
                if replacements == 0 {
                    Ok(None)
                } else {
                    Ok(Some((BString::from(patched.into_owned()), replacements)))
                }
            }
            Replacement::Rewrite(rewrite) => {
                let mut current = BString::from(contents);
                let mut replacements = 0;
                for _ in 0..MAX_REWRITE_PASSES {
                    let mut changed = 0;
                    let next = self.pattern.replace_all(&current, |caps: &Captures<'_>| {
                        let rewritten = rewrite(caps);
                        if rewritten.as_slice() != &caps[0] {
                            changed += 1;
                        }
                        rewritten
                    });
                    let next = BString::from(next.into_owned());
                    if changed == 0 {
                        return Ok(if replacements == 0 {
                            None
                        } else {
                            Some((current, replacements))
                        });
                    }
                    current = next;
                    replacements += changed;
                }
                Err(PatchError::NoFixedPoint {
                    pattern: self.pattern.as_str().to_owned(),
                })
            }
        }
    }
}

fn compile(pattern: &str) -> Result<Regex, PatchError> {
    Regex::new(pattern).map_err(|source| PatchError::BadPattern {
        pattern: pattern.to_owned(),
        source,
    })
}

/// Escapes unescaped `{identifier}` placeholders in documentation
/// comment lines so a downstream templating step does not misinterpret
/// them: `# uses {foo}` becomes `# uses \{foo}`. Already-escaped
/// placeholders are left alone.
pub fn escape_braces(globs: impl IntoIterator<Item = impl Into<String>>) -> PatchRule {
    // Both patterns are static; just panic on failures to compile.
    let inner = Regex::new(r"\\?\{([A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
    PatchRule::rewrite(
        globs,
        r"(?m)^(\s*(?:#|//)[^\n]*\{[A-Za-z_][A-Za-z0-9_]*\}[^\n]*)$",
        move |caps: &Captures<'_>| {
            inner
                .replace_all(&caps[0], |inner_caps: &Captures<'_>| {
                    let placeholder = &inner_caps[0];
                    if placeholder.starts_with(b"\\") {
                        placeholder.to_vec()
                    } else {
                        let mut escaped = Vec::with_capacity(placeholder.len() + 1);
                        escaped.push(b'\\');
                        escaped.extend_from_slice(placeholder);
                        escaped
                    }
                })
                .into_owned()
        },
    )
    .unwrap()
}
