pub mod archive_inspector;
pub mod blocklist;
pub mod content_signature;
pub mod extension_gate;
pub mod permissions;
pub mod records;
pub mod storage;
pub mod upload_service;
