pub mod builder;
pub mod params;
pub mod row;

pub use builder::*;
pub use params::SqliteBindValue;
pub use row::row_to_json;
