mod json_file;
mod locks;

pub use json_file::JsonFileStore;
pub use locks::UserLocks;
