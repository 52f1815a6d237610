pub mod types;
pub mod filter;
pub mod filter_where;
pub mod error;

pub use types::*;
pub use filter::{Filter, DOCUMENTS_TABLE};
pub use filter_where::FilterWhere;
pub use error::FilterError;
