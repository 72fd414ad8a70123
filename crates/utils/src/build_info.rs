//! Build metadata emitted by the `vergen-git2` build script.

pub(crate) struct BuildInfo {
    pub commit_sha1: Option<&'static str>,
    dirty_flag: Option<&'static str>,
}

impl BuildInfo {
    /// Whether the tree had uncommitted changes when it was built.
    pub fn git_dirty(&self) -> bool {
        self.dirty_flag == Some("true")
    }
}

pub(crate) const BUILD_INFO: BuildInfo = BuildInfo {
    commit_sha1: option_env!("VERGEN_GIT_SHA"),
    dirty_flag: option_env!("VERGEN_GIT_DIRTY"),
};
