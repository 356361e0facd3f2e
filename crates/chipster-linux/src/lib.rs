// Unix platform implementations (desktop Linux and Android)

#[cfg(unix)]
pub mod filesystem;

#[cfg(unix)]
pub mod process;

#[cfg(unix)]
pub mod lighttpd;

pub mod storage;
