pub use super::blocked_extensions::Entity as BlockedExtensions;
pub use super::uploaded_files::Entity as UploadedFiles;
