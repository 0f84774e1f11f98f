pub mod config;
pub mod entities;
pub mod error;
pub mod infrastructure;
pub mod models;
pub mod services;
pub mod utils;

pub use config::DefenseConfig;
pub use error::{Rejection, RejectionKind, UploadError};
pub use models::{Actor, BlockSet, StoredFileRecord, WorkspaceId};
pub use services::blocklist::{BlockSetProvider, StaticBlockSets};
pub use services::records::{FileRecordSink, InMemoryFileRecords};
pub use services::upload_service::{UploadService, Verdict};
