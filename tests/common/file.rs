use std::path::Path;

/// Write `content` to `relative` under `dir`, creating parent directories
pub fn write_file(dir: &Path, relative: &str, content: &str) {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directory");
    }
    std::fs::write(&path, content).expect("Failed to write file");
}

pub fn read_file(dir: &Path, relative: &str) -> String {
    std::fs::read_to_string(dir.join(relative)).expect("Failed to read file")
}

pub fn delete_path(dir: &Path, relative: &str) {
    let path = dir.join(relative);
    if path.is_dir() {
        std::fs::remove_dir_all(path).expect("Failed to remove directory");
    } else {
        std::fs::remove_file(path).expect("Failed to remove file");
    }
}

/// Deterministic, poorly compressible content of `len` bytes
pub fn noise(len: usize, seed: u64) -> Vec<u8> {
    let mut state = seed.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            (state >> 24) as u8
        })
        .collect()
}
