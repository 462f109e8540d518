use std::sync::LazyLock;

const SHORT_SHA_LEN: usize = 8;

/// Defines the application version.
pub static VERSION: LazyLock<String> = LazyLock::new(|| {
    format_version(
        env!("IMAGE_VERSION"),
        option_env!("VERGEN_GIT_SHA"),
        option_env!("VERGEN_GIT_DIRTY") == Some("true"),
    )
});

fn format_version(image_version: &str, commit_sha: Option<&str>, dirty: bool) -> String {
    let sha = commit_sha
        .map(|sha| &sha[..sha.len().min(SHORT_SHA_LEN)])
        .unwrap_or("unknown");
    format!(
        "{image_version}-{sha}{}",
        if dirty { "-dirty" } else { "" }
    )
}
