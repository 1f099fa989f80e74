use std::{
    fs, io,
    path::{Path, PathBuf},
};

use bstr::BString;
use globset::{Glob, GlobSetBuilder};
use walkdir::WalkDir;

use crate::pipeline::PatchError;

/// The destination directory a regeneration pass mutates in place.
///
/// Paths handed out are relative to the root. Contents are byte
/// strings; regenerated trees are not guaranteed to be valid UTF-8.
#[derive(Debug)]
pub struct WorkingTree {
    root: PathBuf,
}

impl WorkingTree {
    pub fn new(root: impl Into<PathBuf>) -> io::Result<Self> {
        Ok(Self {
            root: root.into().canonicalize()?,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a list of globs to the relative paths of every matching
    /// file, sorted so rules apply in a deterministic order.
    pub fn matched(&self, globs: &[String]) -> Result<Vec<PathBuf>, PatchError> {
        let mut builder = GlobSetBuilder::new();
        for glob in globs {
            builder.add(
                Glob::new(glob).map_err(|source| PatchError::BadGlob {
                    glob: glob.clone(),
                    source,
                })?,
            );
        }
        let set = builder.build().map_err(|source| PatchError::BadGlob {
            glob: globs.join(", "),
            source,
        })?;

        let mut paths = Vec::new();
        for entry in WalkDir::new(&self.root) {
            let entry = entry.map_err(|source| PatchError::Walk {
                path: self.root.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry
                .path()
                .strip_prefix(&self.root)
                .expect("walked entries live under the root")
                .to_owned();
            if set.is_match(&path) {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    pub fn read(&self, path: impl AsRef<Path>) -> io::Result<BString> {
        fs::read(self.root.join(path.as_ref())).map(BString::from)
    }

    pub fn write(&self, path: impl AsRef<Path>, contents: impl AsRef<[u8]>) -> io::Result<()> {
        let path = self.root.join(path.as_ref());
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, contents.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use crate::testing::tree_test;

    use super::WorkingTree;

    #[test]
    fn test_matched() {
        let (_source, dest) = tree_test! {
            dest: [
                "lib/google/cloud/language.rb" => "",
                "lib/google/cloud/language/version.rb" => "",
                "test/helper.rb" => "",
                "Gemfile" => ""
            ]
        };

        let tree = WorkingTree::new(dest.path()).unwrap();
        insta::assert_debug_snapshot!(tree.matched(&["lib/**".into()]).unwrap(), @r###"
        [
            "lib/google/cloud/language/version.rb",
            "lib/google/cloud/language.rb",
        ]
        "###);
        insta::assert_debug_snapshot!(tree.matched(&["**/*.rb".into()]).unwrap(), @r###"
        [
            "lib/google/cloud/language/version.rb",
            "lib/google/cloud/language.rb",
            "test/helper.rb",
        ]
        "###);
        insta::assert_debug_snapshot!(tree.matched(&["Gemfile".into(), "test/**".into()]).unwrap(), @r###"
        [
            "Gemfile",
            "test/helper.rb",
        ]
        "###);
    }

    #[test]
    fn test_matched_none() {
        let (_source, dest) = tree_test! {
            dest: ["lib/client.rb" => ""]
        };

        let tree = WorkingTree::new(dest.path()).unwrap();
        assert!(tree.matched(&["docs/**".into()]).unwrap().is_empty());
        assert!(tree.matched(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_matched_bad_glob() {
        let (_source, dest) = tree_test! {
            dest: ["lib/client.rb" => ""]
        };

        let tree = WorkingTree::new(dest.path()).unwrap();
        insta::assert_snapshot!(
            tree.matched(&["lib/[".into()]).unwrap_err(),
            @r###"invalid glob "lib/[""###
        );
    }

    #[test]
    fn test_read_write() {
        let (_source, dest) = tree_test! {
            dest: ["lib/client.rb" => "old"]
        };

        let tree = WorkingTree::new(dest.path()).unwrap();
        assert_eq!(tree.read("lib/client.rb").unwrap(), "old");

        tree.write("lib/nested/new.rb", "new").unwrap();
        assert_eq!(tree.read("lib/nested/new.rb").unwrap(), "new");
    }
}
