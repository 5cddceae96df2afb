//! Name sanitization for compose projects and image references

use regex::Regex;
use std::sync::LazyLock;

static NON_ALNUM_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new("[^a-z0-9]+").expect("valid sanitizer regex"));

/// Sanitizes a repository name into a compose project identifier
///
/// Lowercases, collapses every run of non-alphanumeric characters into a
/// single `-`, and trims leading/trailing dashes. Compose rejects most
/// other characters in `-p` project names.
pub fn sanitize_project_name(name: &str) -> String {
    let lowered = name.to_lowercase();
    let replaced = NON_ALNUM_RE.replace_all(&lowered, "-");
    replaced.trim_matches('-').to_string()
}

/// Cleans a single image-name component (project or service)
///
/// Lowercases and replaces spaces with `-`; used when composing the
/// `<registry>/<project>-<service>:<tag>` image reference.
pub fn clean_image_component(component: &str) -> String {
    component.to_lowercase().replace(' ', "-")
}
