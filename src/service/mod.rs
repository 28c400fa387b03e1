pub mod backup;
pub mod functions;
pub mod rows;
pub mod schema;
