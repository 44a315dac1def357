mod admin;
mod blobs;
mod files;
mod shared;

pub use admin::health;
pub use blobs::serve_blob;
pub use files::{delete_file, list_files, search_files, share_file, upload_file};
pub use shared::get_shared_file;
