mod attrs;
mod context;
pub mod expr;
pub mod form;
pub mod memory;
pub mod source;
mod tables;
mod types;
pub mod varint;
mod walker;

pub use context::{DwarfContext, analyze_source};
pub use memory::{MemoryDie, MemorySource};
pub use source::{DieSource, GimliSource, RawAttribute, RawValue, TYPES_SECTION_BIT, UnitSection};
pub use tables::TypeTables;
pub use types::TypeAggregator;
pub use walker::{DEFAULT_DECL_FILE, DieKind, DieWalker, WalkOptions};
