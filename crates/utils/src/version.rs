use std::sync::LazyLock;

/// Defines the application version.
///
/// Git details are optional: builds outside a checkout fall back to `unknown`.
pub static VERSION: LazyLock<String> = LazyLock::new(|| {
    let dirty = matches!(option_env!("VERGEN_GIT_DIRTY"), Some("true"));
    format!(
        "{}-{}{}",
        env!("IMAGE_VERSION"),
        option_env!("VERGEN_GIT_SHA").unwrap_or("unknown"),
        if dirty { "-dirty" } else { "" }
    )
});
