use std::sync::LazyLock;

use crate::build_info::BUILD_INFO;

/// Release version with the git commit as build metadata, e.g. `1.2.0+3f2a9c1`.
pub static VERSION: LazyLock<String> = LazyLock::new(|| {
    let mut version = env!("IMAGE_VERSION").to_string();
    if let Some(sha) = BUILD_INFO.commit_sha1 {
        version.push('+');
        version.push_str(sha.get(..7).unwrap_or(sha));
        if BUILD_INFO.git_dirty() {
            version.push_str(".dirty");
        }
    }
    version
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_starts_with_image_version() {
        assert!(VERSION.starts_with(env!("IMAGE_VERSION")));
        assert!(!VERSION.contains(' '));
    }
}
