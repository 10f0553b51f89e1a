//! Routing: maps `(logical_db, logical_table)` to a sharding rule, and a
//! statement's WHERE/VALUES to the concrete set of physical targets.

pub mod resolver;
pub mod router;
pub mod rule;
pub mod sequence;

pub use resolver::{extract_scalar, resolve_where, row_shard_value, ShardSetResolution};
pub use router::{Router, RuleMatch};
pub use rule::{ShardSet, ShardTarget, TableRule};
pub use sequence::{SequenceProvider, SequenceRegistry, StepSequence};
