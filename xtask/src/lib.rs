use std::path::{Path, PathBuf};

pub mod tasks {
    pub mod ci;
}

pub type DynError = Box<dyn std::error::Error>;

pub fn project_root() -> PathBuf {
    Path::new(&env!("CARGO_MANIFEST_DIR"))
        .ancestors()
        .nth(1)
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}
