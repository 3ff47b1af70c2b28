/// Language name for a file, from its extension. Unknown extensions map
/// to `"text"`.
pub fn language_for_path(path: &str) -> &'static str {
    language_for_extension(extension(path).as_deref().unwrap_or(""))
}

pub fn language_for_extension(ext: &str) -> &'static str {
    match ext {
        "py" | "pyi" => "python",
        "js" | "jsx" => "javascript",
        "ts" | "tsx" => "typescript",
        "go" => "go",
        "rs" => "rust",
        "java" => "java",
        "kt" => "kotlin",
        "rb" => "ruby",
        "php" => "php",
        "c" | "h" => "c",
        "cpp" | "hpp" => "cpp",
        "cs" => "csharp",
        "swift" => "swift",
        "md" | "markdown" => "markdown",
        "rst" => "rst",
        "yaml" | "yml" => "yaml",
        "json" => "json",
        "toml" => "toml",
        _ => "text",
    }
}

/// Lower-cased extension of the last path segment, without the dot.
pub fn extension(path: &str) -> Option<String> {
    let name = path.rsplit('/').next().unwrap_or(path);
    let (stem, ext) = name.rsplit_once('.')?;
    if stem.is_empty() {
        return None;
    }
    Some(ext.to_ascii_lowercase())
}

/// File name without directory and extension.
pub fn file_stem(path: &str) -> &str {
    let name = path.rsplit('/').next().unwrap_or(path);
    match name.rsplit_once('.') {
        Some((stem, _)) if !stem.is_empty() => stem,
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_language_table() {
        assert_eq!(language_for_path("src/app.py"), "python");
        assert_eq!(language_for_path("web/App.TSX"), "typescript");
        assert_eq!(language_for_path("include/x.h"), "c");
        assert_eq!(language_for_path("notes.txt"), "text");
        assert_eq!(language_for_path("Makefile"), "text");
        assert_eq!(language_for_path(".env"), "text");
    }

    #[test]
    fn test_stem() {
        assert_eq!(file_stem("pkg/mod.py"), "mod");
        assert_eq!(file_stem("README"), "README");
        assert_eq!(file_stem("a/.gitignore"), ".gitignore");
        assert_eq!(file_stem("archive.tar.gz"), "archive.tar");
    }
}
