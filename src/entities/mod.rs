pub mod prelude;

pub mod blocked_extensions;
pub mod uploaded_files;
