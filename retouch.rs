mod copy;
mod manifest;
mod pipeline;
mod rule;
mod tree;

pub use copy::{preserve_fields, CopySpec};
pub use manifest::Manifest;
pub use pipeline::{Outcome, PatchError, Pipeline};
pub use rule::{escape_braces, PatchRule, Replacement};
pub use tree::WorkingTree;

/// A single unit of work in a regeneration pass.
///
/// Steps execute strictly in declaration order. A patch that edits a
/// file an earlier copy produced must be declared after that copy.
#[derive(Debug)]
pub enum Step {
    Copy(CopySpec),
    Patch(PatchRule),
}

#[cfg(test)]
mod testing;
