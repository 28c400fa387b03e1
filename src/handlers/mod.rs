pub mod backup;
pub mod functions;
pub mod query;
pub mod rows;
pub mod settings;
pub mod tables;
