//! Conformance image version derived from the source tree's build metadata

/// Key of the version line printed by the workspace status command
const GIT_VERSION_KEY: &str = "gitVersion";

/// Drop semver build metadata: everything from the first `+` onward.
pub fn strip_build_metadata(version: &str) -> &str {
    match version.find('+') {
        Some(idx) => &version[..idx],
        None => version,
    }
}

/// Extract the `gitVersion` value from workspace status output.
///
/// Status output is one `KEY value` pair per line.
pub fn parse_git_version(status: &str) -> Option<&str> {
    status.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        match (parts.next(), parts.next()) {
            (Some(GIT_VERSION_KEY), Some(value)) => Some(value),
            _ => None,
        }
    })
}

/// The tag for the conformance image: `gitVersion` minus build metadata.
pub fn image_version(status: &str) -> Option<String> {
    let version = strip_build_metadata(parse_git_version(status)?);
    if version.is_empty() {
        None
    } else {
        Some(version.to_string())
    }
}
