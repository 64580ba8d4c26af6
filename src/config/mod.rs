//! Configuration fragments: merging and cascade files
//!
//! - `merge`: operator-aware merge of ordered fragments
//! - `file`: TOML cascade files describing a complete engine

mod file;
mod merge;

pub use file::{
    toml_to_json, CascadeFile, ExternalFileEntry, LoadError, LoadedFile, ModuleEntry, RuleFile,
    RuleSetFile,
};
pub use merge::{merge_fragments, merge_pair, MergeOp, OP_KEY, VALUE_KEY};
