//! Applying formula patches with the system `patch` tool.

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use bk_core::PatchError;
use bk_core::formula::Patch;

const PATCH_TOOL: &str = "patch";

/// A patch whose diff text is available locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedPatch {
    pub content: String,
    pub strip: u32,
    pub attribution: String,
}

impl PreparedPatch {
    pub fn new(patch: &Patch, content: String) -> Self {
        Self {
            content,
            strip: patch.strip,
            attribution: patch.attribution.clone(),
        }
    }
}

/// Apply `patches` to `source_dir` in order, stopping at the first failure.
///
/// Each patch runs `patch -p<strip> --forward --batch` with the diff on
/// stdin. A patch that was already applied is reported as rejected. The tree
/// is not restored after a failure.
pub async fn apply(source_dir: &Path, patches: &[PreparedPatch]) -> Result<(), PatchError> {
    apply_with_tool(PATCH_TOOL, source_dir, patches).await
}

async fn apply_with_tool(tool: &str, source_dir: &Path, patches: &[PreparedPatch]) -> Result<(), PatchError> {
    for (index, patch) in patches.iter().enumerate() {
        apply_one(tool, source_dir, index, patch).await?;
        info!(index, attribution = %patch.attribution, "patch applied");
    }
    Ok(())
}

async fn apply_one(tool: &str, source_dir: &Path, index: usize, patch: &PreparedPatch) -> Result<(), PatchError> {
    debug!(index, strip = patch.strip, dir = %source_dir.display(), "running {}", tool);

    let mut child = Command::new(tool)
        .arg(format!("-p{}", patch.strip))
        .arg("--forward")
        .arg("--batch")
        .current_dir(source_dir)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| PatchError::ToolUnavailable {
            message: format!("{}: {}", tool, e),
        })?;

    if let Some(mut stdin) = child.stdin.take() {
        // The exit status decides the outcome; patch may stop reading early
        let _ = stdin.write_all(patch.content.as_bytes()).await;
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| PatchError::ToolUnavailable {
            message: format!("{}: {}", tool, e),
        })?;

    if !output.status.success() {
        let mut detail = String::from_utf8_lossy(&output.stdout).into_owned();
        detail.push_str(&String::from_utf8_lossy(&output.stderr));
        return Err(PatchError::RejectedHunk {
            patch_index: index,
            attribution: patch.attribution.clone(),
            detail,
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    const HELLO_WORLD: &str = "\
--- a/README
+++ b/README
@@ -1 +1 @@
-hello
+hello world
";

    const GOODBYE_WORLD: &str = "\
--- a/README
+++ b/README
@@ -1 +1 @@
-hello world
+goodbye world
";

    fn patch_available() -> bool {
        std::process::Command::new(PATCH_TOOL)
            .arg("--version")
            .output()
            .map(|o| o.status.success())
            .unwrap_or(false)
    }

    fn prepared(content: &str, attribution: &str) -> PreparedPatch {
        PreparedPatch {
            content: content.to_string(),
            strip: 1,
            attribution: attribution.to_string(),
        }
    }

    fn source_tree() -> TempDir {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("README"), "hello\n").unwrap();
        tmp
    }

    #[tokio::test]
    async fn patches_apply_in_order() {
        if !patch_available() {
            eprintln!("skipping: patch tool not installed");
            return;
        }
        let tmp = source_tree();

        apply(
            tmp.path(),
            &[prepared(HELLO_WORLD, "greet the world"), prepared(GOODBYE_WORLD, "say goodbye")],
        )
        .await
        .unwrap();

        assert_eq!(fs::read_to_string(tmp.path().join("README")).unwrap(), "goodbye world\n");
    }

    #[tokio::test]
    async fn reordered_patches_fail_at_first_dependent_patch() {
        if !patch_available() {
            eprintln!("skipping: patch tool not installed");
            return;
        }
        let tmp = source_tree();

        let err = apply(
            tmp.path(),
            &[prepared(GOODBYE_WORLD, "say goodbye"), prepared(HELLO_WORLD, "greet the world")],
        )
        .await
        .unwrap_err();

        match err {
            PatchError::RejectedHunk {
                patch_index,
                attribution,
                ..
            } => {
                assert_eq!(patch_index, 0);
                assert_eq!(attribution, "say goodbye");
            }
            other => panic!("expected RejectedHunk, got {:?}", other),
        }
        assert_eq!(fs::read_to_string(tmp.path().join("README")).unwrap(), "hello\n");
    }

    #[tokio::test]
    async fn reapplying_a_patch_is_rejected() {
        if !patch_available() {
            eprintln!("skipping: patch tool not installed");
            return;
        }
        let tmp = source_tree();
        let patches = [prepared(HELLO_WORLD, "greet the world")];

        apply(tmp.path(), &patches).await.unwrap();
        let err = apply(tmp.path(), &patches).await.unwrap_err();

        assert!(matches!(err, PatchError::RejectedHunk { patch_index: 0, .. }));
        assert_eq!(fs::read_to_string(tmp.path().join("README")).unwrap(), "hello world\n");
    }

    #[tokio::test]
    async fn strip_level_zero() {
        if !patch_available() {
            eprintln!("skipping: patch tool not installed");
            return;
        }
        let tmp = source_tree();
        let patch = PreparedPatch {
            content: HELLO_WORLD.replace("a/README", "README").replace("b/README", "README"),
            strip: 0,
            attribution: "p0".to_string(),
        };

        apply(tmp.path(), &[patch]).await.unwrap();
        assert_eq!(fs::read_to_string(tmp.path().join("README")).unwrap(), "hello world\n");
    }

    #[tokio::test]
    async fn missing_tool_is_reported() {
        let tmp = source_tree();
        let err = apply_with_tool(
            "brewkit-no-such-patch-tool",
            tmp.path(),
            &[prepared(HELLO_WORLD, "x")],
        )
        .await
        .unwrap_err();

        assert!(matches!(err, PatchError::ToolUnavailable { .. }));
    }

    #[tokio::test]
    async fn no_patches_is_a_no_op() {
        let tmp = source_tree();
        apply(tmp.path(), &[]).await.unwrap();
        assert_eq!(fs::read_to_string(tmp.path().join("README")).unwrap(), "hello\n");
    }
}
