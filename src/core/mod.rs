pub mod constraints;
pub mod expression;
pub mod types;

pub use constraints::ConstraintResolver;
pub use expression::CompiledExpression;
pub use types::*;
