pub mod database;

pub use self::database::{AnalysisRecord, Database};
