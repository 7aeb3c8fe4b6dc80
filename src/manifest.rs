//! Conformance pod manifest rendering
//!
//! The manifest template ships with the source tree and names a published
//! conformance image. Only its image reference is rewritten; the rest of the
//! document is passed through untouched.

use std::fmt;

/// Namespace the conformance manifest creates
pub const CONFORMANCE_NAMESPACE: &str = "conformance";

/// Name of the pod running the suite
pub const CONFORMANCE_POD: &str = "e2e-conformance-test";

/// Directory inside the node container where the pod writes results
pub const RESULTS_DIR: &str = "/tmp/results";

/// Leading path components dropped when extracting [`RESULTS_DIR`]
pub const RESULTS_STRIP_COMPONENTS: u32 = 2;

/// A built, versioned conformance image
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactReference {
    pub registry: String,
    pub name: String,
    pub tag: String,
}

impl ArtifactReference {
    /// `<registry>/conformance-<arch>:<version>`
    pub fn conformance(registry: &str, arch: &str, version: &str) -> Self {
        Self {
            registry: registry.trim_end_matches('/').to_string(),
            name: format!("conformance-{arch}"),
            tag: version.to_string(),
        }
    }
}

impl fmt::Display for ArtifactReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.registry.is_empty() {
            write!(f, "{}:{}", self.name, self.tag)
        } else {
            write!(f, "{}/{}:{}", self.registry, self.name, self.tag)
        }
    }
}

/// Replace the image of every `image:` line that references a conformance image.
///
/// Returns the rendered manifest and the number of lines rewritten.
pub fn rewrite_image(template: &str, image: &ArtifactReference) -> (String, usize) {
    let mut rewritten = 0;
    let mut out = String::with_capacity(template.len());

    for line in template.split_inclusive('\n') {
        let (body, newline) = match line.strip_suffix('\n') {
            Some(body) => (body, "\n"),
            None => (line, ""),
        };
        let trimmed = body.trim_start();
        let indent = &body[..body.len() - trimmed.len()];
        // Keep a list-item dash if the image is the first key of the item
        let (dash, rest) = match trimmed.strip_prefix("- ") {
            Some(rest) => ("- ", rest.trim_start()),
            None => ("", trimmed),
        };

        match rest.strip_prefix("image:") {
            Some(value) if value.contains("conformance") => {
                out.push_str(indent);
                out.push_str(dash);
                out.push_str("image: ");
                out.push_str(&image.to_string());
                out.push_str(newline);
                rewritten += 1;
            }
            _ => out.push_str(line),
        }
    }

    (out, rewritten)
}
