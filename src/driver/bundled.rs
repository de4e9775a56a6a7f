//! Driver manifests compiled into the binary.

/// (directory name, manifest text)
pub const BUNDLED_MANIFESTS: &[(&str, &str)] = &[
    ("goose", include_str!("../../drivers/goose/mc-driver.yaml")),
    ("aider", include_str!("../../drivers/aider/mc-driver.yaml")),
    (
        "claude-code",
        include_str!("../../drivers/claude-code/mc-driver.yaml"),
    ),
];
