use std::path::Path;
use std::sync::Once;

static INIT: Once = Once::new();

pub fn setup() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

/// Write `content` to `relative_path` under `root`, creating directories as
/// needed.
pub fn write_definition(root: &Path, relative_path: &str, content: &str) {
    let path = root.join(relative_path);

    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).unwrap();
    }

    std::fs::write(path, content).unwrap();
}
