//! Inline expression engine.
//!
//! A sharding rule names its physical databases/tables with templates such as
//! `t_order_${0..3}` or `db_${id % 4}.t_${id}`. A template is a
//! comma-separated list of *segment groups*; each group is a sequence of
//! `(prefix, ${script})` segments. Flattening evaluates the scripts, builds
//! the cross-product of `prefix + value` within each group, and unions the
//! groups into a set.
//!
//! The `${…}` script language is closed: integer arithmetic, string
//! literals, variable references, inclusive ranges `a..b`, and comma lists.
//! No general-purpose runtime is embedded.

mod eval;
mod expr;
mod segment;

pub use eval::{Bindings, CompiledScript, Scalar};
pub use expr::InlineExpression;
pub use tessera_common::error::ScriptError;
