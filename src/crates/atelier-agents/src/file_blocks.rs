//! The file-block output contract for code generation.
//!
//! The codesmith asks the model for files in a text-only format so any
//! provider works: a `### FILE: <workspace-relative path>` header line,
//! followed by a fenced content block holding the complete file.
//!
//! The parser rejects headers whose paths are absolute or contain `..`
//! segments; the workspace writer re-checks the resolved path before
//! anything touches disk.

use regex::Regex;
use std::path::{Component, Path};
use std::sync::OnceLock;

/// One declared file.
#[derive(Debug, Clone, PartialEq)]
pub struct FileBlock {
    /// Workspace-relative path from the header line.
    pub path: String,
    pub contents: String,
}

/// A block the parser refused, with the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct RejectedBlock {
    pub path: String,
    pub reason: String,
}

fn header_regex() -> &'static Regex {
    static HEADER: OnceLock<Regex> = OnceLock::new();
    HEADER.get_or_init(|| Regex::new(r"^###\s*FILE:\s*(.+?)\s*$").expect("static regex"))
}

/// Whether a declared path is safe to hand to the workspace writer.
fn check_path(path: &str) -> Result<(), String> {
    if path.is_empty() {
        return Err("empty path".to_string());
    }
    let p = Path::new(path);
    if p.is_absolute() {
        return Err("absolute path".to_string());
    }
    for component in p.components() {
        if component == Component::ParentDir {
            return Err("path contains '..'".to_string());
        }
    }
    Ok(())
}

/// Extract every file block from model output.
///
/// Returns accepted blocks in declaration order plus the rejected ones.
/// Later blocks for the same path are kept (the writer applies
/// last-one-wins).
pub fn parse_file_blocks(text: &str) -> (Vec<FileBlock>, Vec<RejectedBlock>) {
    let mut blocks = Vec::new();
    let mut rejected = Vec::new();
    let mut lines = text.lines().peekable();

    while let Some(line) = lines.next() {
        let Some(caps) = header_regex().captures(line) else {
            continue;
        };
        let path = caps[1].trim().trim_matches('`').to_string();

        // Skip blank lines between the header and the fence.
        while lines.peek().is_some_and(|l| l.trim().is_empty()) {
            lines.next();
        }
        let Some(fence) = lines.next() else {
            rejected.push(RejectedBlock {
                path,
                reason: "missing content fence".to_string(),
            });
            break;
        };
        if !fence.trim_start().starts_with("```") {
            rejected.push(RejectedBlock {
                path,
                reason: "header not followed by a fenced block".to_string(),
            });
            continue;
        }

        let mut contents = Vec::new();
        let mut terminated = false;
        for body_line in lines.by_ref() {
            if body_line.trim_start().starts_with("```") {
                terminated = true;
                break;
            }
            contents.push(body_line);
        }
        if !terminated {
            rejected.push(RejectedBlock {
                path,
                reason: "unterminated content fence".to_string(),
            });
            break;
        }

        match check_path(&path) {
            Ok(()) => {
                let mut contents = contents.join("\n");
                if !contents.is_empty() {
                    contents.push('\n');
                }
                blocks.push(FileBlock { path, contents });
            }
            Err(reason) => rejected.push(RejectedBlock { path, reason }),
        }
    }

    (blocks, rejected)
}

/// Render the contract description embedded in the codesmith prompt.
pub fn format_instructions() -> &'static str {
    "Declare every file exactly like this, one block per file:\n\
     ### FILE: relative/path/to/file.ext\n\
     ```\n\
     <complete file contents>\n\
     ```\n\
     Paths must be relative to the workspace root. Never use absolute \
     paths or '..' segments. Always emit the complete file, never a diff."
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_block() {
        let text = "Some prose.\n### FILE: src/main.rs\n```rust\nfn main() {}\n```\nDone.";
        let (blocks, rejected) = parse_file_blocks(text);
        assert!(rejected.is_empty());
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].path, "src/main.rs");
        assert_eq!(blocks[0].contents, "fn main() {}\n");
    }

    #[test]
    fn test_multiple_blocks_keep_order() {
        let text = "### FILE: a.txt\n```\nA\n```\n### FILE: b.txt\n```\nB\n```";
        let (blocks, _) = parse_file_blocks(text);
        let paths: Vec<&str> = blocks.iter().map(|b| b.path.as_str()).collect();
        assert_eq!(paths, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_blank_line_between_header_and_fence() {
        let text = "### FILE: a.txt\n\n```\ncontents\n```";
        let (blocks, rejected) = parse_file_blocks(text);
        assert!(rejected.is_empty());
        assert_eq!(blocks[0].contents, "contents\n");
    }

    #[test]
    fn test_rejects_parent_dir_path() {
        let text = "### FILE: ../evil\n```\nhacked\n```";
        let (blocks, rejected) = parse_file_blocks(text);
        assert!(blocks.is_empty());
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].path, "../evil");
        assert!(rejected[0].reason.contains(".."));
    }

    #[test]
    fn test_rejects_absolute_path() {
        let text = "### FILE: /etc/passwd\n```\nroot\n```";
        let (blocks, rejected) = parse_file_blocks(text);
        assert!(blocks.is_empty());
        assert_eq!(rejected[0].reason, "absolute path");
    }

    #[test]
    fn test_rejects_hidden_traversal() {
        let text = "### FILE: src/../../evil.txt\n```\nx\n```";
        let (blocks, rejected) = parse_file_blocks(text);
        assert!(blocks.is_empty());
        assert_eq!(rejected.len(), 1);
    }

    #[test]
    fn test_header_without_fence_is_rejected() {
        let text = "### FILE: a.txt\nnot a fence\n### FILE: b.txt\n```\nok\n```";
        let (blocks, rejected) = parse_file_blocks(text);
        assert_eq!(rejected.len(), 1);
        assert_eq!(rejected[0].path, "a.txt");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].path, "b.txt");
    }

    #[test]
    fn test_unterminated_fence_is_rejected() {
        let text = "### FILE: a.txt\n```\nnever closed";
        let (blocks, rejected) = parse_file_blocks(text);
        assert!(blocks.is_empty());
        assert_eq!(rejected[0].reason, "unterminated content fence");
    }

    #[test]
    fn test_fenced_language_tag_allowed() {
        let text = "### FILE: calculator.py\n```python\nx = 1\n```";
        let (blocks, _) = parse_file_blocks(text);
        assert_eq!(blocks[0].contents, "x = 1\n");
    }

    #[test]
    fn test_duplicate_paths_both_kept() {
        // Later block wins at write time; the parser keeps both.
        let text = "### FILE: a.txt\n```\none\n```\n### FILE: a.txt\n```\ntwo\n```";
        let (blocks, _) = parse_file_blocks(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[1].contents, "two\n");
    }

    #[test]
    fn test_empty_file_block() {
        let text = "### FILE: empty.txt\n```\n```";
        let (blocks, _) = parse_file_blocks(text);
        assert_eq!(blocks[0].contents, "");
    }
}
