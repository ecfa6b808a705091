use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use tempfile::TempDir;
use toolmesh::cache::CapabilityCache;
use toolmesh::storage::MemoryStore;

#[allow(dead_code)]
pub fn temp_config_file(contents: &str) -> (TempDir, PathBuf) {
    let temp_dir = TempDir::new().expect("failed to create tempdir");
    let config_path = temp_dir.path().join("toolmesh.yaml");
    fs::write(&config_path, contents).expect("failed to write config file");
    (temp_dir, config_path)
}

#[allow(dead_code)]
pub fn memory_cache() -> Arc<CapabilityCache> {
    Arc::new(CapabilityCache::new(Arc::new(MemoryStore::new())))
}

/// Path of the `mcp_test_server` helper binary.
///
/// Cargo sets `CARGO_BIN_EXE_mcp_test_server` for integration tests; the
/// `target/debug` fallback helps when running a test binary by hand.
#[allow(dead_code)]
pub fn test_server_exe() -> PathBuf {
    if let Some(p) = option_env!("CARGO_BIN_EXE_mcp_test_server") {
        return PathBuf::from(p);
    }
    if let Ok(manifest) = std::env::var("CARGO_MANIFEST_DIR") {
        let debug = PathBuf::from(manifest)
            .join("target")
            .join("debug")
            .join("mcp_test_server");
        if debug.exists() {
            return debug;
        }
    }
    PathBuf::from("mcp_test_server")
}
