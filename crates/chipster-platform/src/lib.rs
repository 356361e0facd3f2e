// Collaborator interfaces the bootstrap core is written against.

pub mod filesystem;
pub mod process;
pub mod server;
pub mod storage;
