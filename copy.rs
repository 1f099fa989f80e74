use std::{
    fmt, fs,
    path::{Path, PathBuf},
};

use regex::bytes::{Captures, Regex};
use walkdir::WalkDir;

use crate::{
    pipeline::{Outcome, PatchError},
    tree::WorkingTree,
};

/// Reconciles freshly generated contents with the file previously
/// committed at the same path. Must be pure: same inputs, same output.
pub type Merge = Box<dyn Fn(&[u8], &[u8], &Path) -> Vec<u8> + Send + Sync>;

/// Copies one subtree of the freshly generated tree into the working
/// tree.
///
/// The copy is additive: destination files absent from the source are
/// left untouched, never deleted.
pub struct CopySpec {
    source: PathBuf,
    dest: PathBuf,
    merge: Option<Merge>,
}

impl fmt::Debug for CopySpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CopySpec")
            .field("source", &self.source)
            .field("dest", &self.dest)
            .field("merge", &self.merge.as_ref().map(|_| ".."))
            .finish()
    }
}

impl CopySpec {
    pub fn new(source: impl Into<PathBuf>, dest: impl Into<PathBuf>) -> Self {
        Self {
            source: source.into(),
            dest: dest.into(),
            merge: None,
        }
    }

    /// Merge-copy: when the destination file already exists, `merge`
    /// decides the final contents.
    pub fn with_merge(
        mut self,
        merge: impl Fn(&[u8], &[u8], &Path) -> Vec<u8> + Send + Sync + 'static,
    ) -> Self {
        self.merge = Some(Box::new(merge));
        self
    }

    /// Copy this spec's subtree from `source_root` into `tree`,
    /// returning one outcome per file written.
    pub(crate) fn apply(
        &self,
        source_root: &Path,
        tree: &WorkingTree,
    ) -> Result<Vec<Outcome>, PatchError> {
        let from = source_root.join(&self.source);
        let mut outcomes = Vec::new();
        for entry in WalkDir::new(&from).sort_by_file_name() {
            let entry = entry.map_err(|source| PatchError::Walk {
                path: from.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry
                .path()
                .strip_prefix(&from)
                .expect("walked entries live under the subtree");
            // A spec may also name a single file; its entry is the
            // subtree root itself.
            let dest = if relative.as_os_str().is_empty() {
                self.dest.clone()
            } else {
                self.dest.join(relative)
            };
            let new = fs::read(entry.path()).map_err(|source| PatchError::Read {
                path: entry.path().to_owned(),
                source,
            })?;
            let (contents, merged) = match (&self.merge, tree.read(&dest)) {
                (Some(merge), Ok(existing)) => (merge(&new, &existing, &dest), true),
                _ => (new, false),
            };
            tree.write(&dest, &contents)
                .map_err(|source| PatchError::Write {
                    path: dest.clone(),
                    source,
                })?;
            outcomes.push(if merged {
                Outcome::Merged { path: dest }
            } else {
                Outcome::Copied { path: dest }
            });
        }
        Ok(outcomes)
    }
}

/// The canonical merge: carry hand-maintained `name = "value"`
/// assignments (version, homepage) over from the committed file into
/// the freshly generated one. A field missing on either side silently
/// falls back to the newly generated content.
pub fn preserve_fields(
    fields: impl IntoIterator<Item = impl Into<String>>,
) -> impl Fn(&[u8], &[u8], &Path) -> Vec<u8> + Send + Sync {
    let patterns = fields
        .into_iter()
        .map(|field| {
            let field = regex::escape(&field.into());
            // Line-anchored `name = "value"`. Quoting and spacing of the
            // generated file win; only the value is carried over.
            let pattern = format!(r#"(?m)^(\s*{field}\s*=\s*)(["'])(.*?)(["'])"#);
            // The field name is escaped, so the pattern always compiles.
            Regex::new(&pattern).unwrap()
        })
        .collect::<Vec<_>>();
    move |new, existing, _path| {
        let mut contents = new.to_vec();
        for pattern in &patterns {
            let Some(prior) = pattern.captures(existing) else {
                continue;
            };
            let prior_value = prior[3].to_vec();
            contents = pattern
                .replace(&contents, |caps: &Captures<'_>| {
                    let mut line = caps[1].to_vec();
                    line.extend_from_slice(&caps[2]);
                    line.extend_from_slice(&prior_value);
                    line.extend_from_slice(&caps[4]);
                    line
                })
                .into_owned();
        }
        contents
    }
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use crate::{testing::tree_test, WorkingTree};

    use super::{preserve_fields, CopySpec};

    #[test]
    fn test_copy_is_additive() {
        let (source, dest) = tree_test! {
            source: [
                "lib/client.rb" => "client",
                "lib/version.rb" => "version",
                "test/helper.rb" => "helper",
                "scratch/tmp.rb" => "scratch"
            ]
            dest: ["scratch/note.txt" => "keep me"]
        };

        let tree = WorkingTree::new(dest.path()).unwrap();
        let mut outcomes = Vec::new();
        for spec in [CopySpec::new("lib", "lib"), CopySpec::new("test", "test")] {
            outcomes.extend(spec.apply(source.path(), &tree).unwrap());
        }
        insta::assert_debug_snapshot!(outcomes, @r###"
        [
            Copied {
                path: "lib/client.rb",
            },
            Copied {
                path: "lib/version.rb",
            },
            Copied {
                path: "test/helper.rb",
            },
        ]
        "###);

        assert_eq!(tree.read("lib/client.rb").unwrap(), "client");
        assert_eq!(tree.read("test/helper.rb").unwrap(), "helper");
        // Unlisted generated content is not brought over, and unlisted
        // pre-existing content is not deleted.
        assert!(tree.read("scratch/tmp.rb").is_err());
        assert_eq!(tree.read("scratch/note.txt").unwrap(), "keep me");
    }

    #[test]
    fn test_copy_single_file() {
        let (source, dest) = tree_test! {
            source: ["Gemfile" => "gem deps"]
            dest: []
        };

        let tree = WorkingTree::new(dest.path()).unwrap();
        let outcomes = CopySpec::new("Gemfile", "Gemfile")
            .apply(source.path(), &tree)
            .unwrap();
        insta::assert_compact_json_snapshot!(outcomes, @r###"[{"copied": {"path": "Gemfile"}}]"###);
        assert_eq!(tree.read("Gemfile").unwrap(), "gem deps");
    }

    #[test]
    fn test_copy_twice_is_idempotent() {
        let (source, dest) = tree_test! {
            source: ["lib/client.rb" => "client"]
            dest: []
        };

        let tree = WorkingTree::new(dest.path()).unwrap();
        let spec = CopySpec::new("lib", "lib");
        let first = spec.apply(source.path(), &tree).unwrap();
        let second = spec.apply(source.path(), &tree).unwrap();
        assert_eq!(first, second);
        assert_eq!(tree.read("lib/client.rb").unwrap(), "client");
    }

    #[test]
    fn test_merge_preserves_prior_fields() {
        let (source, dest) = tree_test! {
            source: ["language.gemspec" => indoc!{r#"
                version = "0.0.0"
                homepage = "https://new"
                summary = "fresh summary"
            "#}]
            dest: ["language.gemspec" => indoc!{r#"
                version = "1.2.3"
                homepage = "https://old"
                summary = "stale summary"
            "#}]
        };

        let tree = WorkingTree::new(dest.path()).unwrap();
        let spec = CopySpec::new("language.gemspec", "language.gemspec")
            .with_merge(preserve_fields(["version", "homepage"]));
        let outcomes = spec.apply(source.path(), &tree).unwrap();
        insta::assert_compact_json_snapshot!(outcomes, @r###"[{"merged": {"path": "language.gemspec"}}]"###);

        // Prior values win for the preserved fields; everything else is
        // the newly generated content.
        insta::assert_snapshot!(tree.read("language.gemspec").unwrap(), @r###"
        version = "1.2.3"
        homepage = "https://old"
        summary = "fresh summary"
        "###);
    }

    #[test]
    fn test_merge_falls_back_to_new_value() {
        let (source, dest) = tree_test! {
            source: ["language.gemspec" => indoc!{r#"
                version = "0.0.0"
                homepage = "https://new"
            "#}]
            dest: ["language.gemspec" => indoc!{r#"
                summary = "no version here"
            "#}]
        };

        let tree = WorkingTree::new(dest.path()).unwrap();
        let spec = CopySpec::new("language.gemspec", "language.gemspec")
            .with_merge(preserve_fields(["version", "homepage"]));
        spec.apply(source.path(), &tree).unwrap();

        insta::assert_snapshot!(tree.read("language.gemspec").unwrap(), @r###"
        version = "0.0.0"
        homepage = "https://new"
        "###);
    }

    #[test]
    fn test_merge_without_existing_file_copies() {
        let (source, dest) = tree_test! {
            source: ["language.gemspec" => r#"version = "0.0.0""#]
            dest: []
        };

        let tree = WorkingTree::new(dest.path()).unwrap();
        let outcomes = CopySpec::new("language.gemspec", "language.gemspec")
            .with_merge(preserve_fields(["version"]))
            .apply(source.path(), &tree)
            .unwrap();
        insta::assert_compact_json_snapshot!(outcomes, @r###"[{"copied": {"path": "language.gemspec"}}]"###);
    }
}
