//! File operations handler
//!
//! create / read / edit / delete / move / list. Relative paths resolve against
//! the workspace. Whether a path may be touched at all is the risk engine's call
//! (system directories score as dangerous); this handler only performs the I/O.

use async_trait::async_trait;
use sdk::action::{FileOperation, FileParams};
use sdk::{Action, ActionKind, HandlerError, OperationHandler, RawOutcome};
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info};

use super::resolve_path;

#[derive(Debug)]
pub struct FileOpHandler {
    workspace: PathBuf,
}

impl FileOpHandler {
    pub fn new(workspace: PathBuf) -> Self {
        Self { workspace }
    }

    async fn create(&self, path: &Path, content: &str) -> Result<RawOutcome, HandlerError> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
            }
        }

        info!("Writing {} bytes to: {}", content.len(), path.display());
        fs::write(path, content).await?;

        Ok(RawOutcome::Text {
            text: format!("File created: {} ({} bytes)", path.display(), content.len()),
        })
    }

    async fn read(&self, path: &Path) -> Result<RawOutcome, HandlerError> {
        info!("Reading file: {}", path.display());
        let content = fs::read_to_string(path)
            .await
            .map_err(|e| HandlerError::Failed(format!("Failed to read {}: {}", path.display(), e)))?;

        debug!("Read {} bytes from {}", content.len(), path.display());
        Ok(RawOutcome::Text { text: content })
    }

    async fn edit(&self, path: &Path, content: &str) -> Result<RawOutcome, HandlerError> {
        if !path.is_file() {
            return Err(HandlerError::Failed(format!(
                "File not found: {}",
                path.display()
            )));
        }

        info!("Overwriting {} with {} bytes", path.display(), content.len());
        fs::write(path, content).await?;

        Ok(RawOutcome::Text {
            text: format!("File edited: {}", path.display()),
        })
    }

    async fn delete(&self, path: &Path) -> Result<RawOutcome, HandlerError> {
        let metadata = fs::symlink_metadata(path)
            .await
            .map_err(|e| HandlerError::Failed(format!("Cannot delete {}: {}", path.display(), e)))?;

        info!("Deleting: {}", path.display());
        if metadata.is_dir() {
            fs::remove_dir_all(path).await?;
        } else {
            fs::remove_file(path).await?;
        }

        Ok(RawOutcome::Text {
            text: format!("Deleted: {}", path.display()),
        })
    }

    async fn move_to(&self, source: &Path, destination: &Path) -> Result<RawOutcome, HandlerError> {
        if !source.exists() {
            return Err(HandlerError::Failed(format!(
                "Source not found: {}",
                source.display()
            )));
        }

        // Moving into an existing directory keeps the file name
        let target = if destination.is_dir() {
            match source.file_name() {
                Some(name) => destination.join(name),
                None => destination.to_path_buf(),
            }
        } else {
            destination.to_path_buf()
        };

        if let Some(parent) = target.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await?;
            }
        }

        info!("Moving {} -> {}", source.display(), target.display());
        fs::rename(source, &target).await?;

        Ok(RawOutcome::Text {
            text: format!("Moved: {} -> {}", source.display(), target.display()),
        })
    }

    async fn list(&self, path: &Path) -> Result<RawOutcome, HandlerError> {
        info!("Listing directory: {}", path.display());

        let mut entries = fs::read_dir(path).await.map_err(|e| {
            HandlerError::Failed(format!("Failed to read directory {}: {}", path.display(), e))
        })?;

        let mut dirs = Vec::new();
        let mut files = Vec::new();
        let mut links = Vec::new();

        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name().to_string_lossy().to_string();
            let ft = entry.file_type().await?;
            if ft.is_dir() {
                dirs.push(format!("d  {}/", name));
            } else if ft.is_symlink() {
                links.push(format!("l  {}", name));
            } else {
                let size = entry.metadata().await.map(|m| m.len()).unwrap_or(0);
                files.push(format!("f  {:>8}  {}", format_size(size), name));
            }
        }

        dirs.sort();
        files.sort();
        links.sort();

        let mut out = Vec::with_capacity(dirs.len() + files.len() + links.len() + 1);
        out.push(format!(
            "{}/  ({} entries)",
            path.display(),
            dirs.len() + files.len() + links.len()
        ));
        out.extend(dirs);
        out.extend(files);
        out.extend(links);
        Ok(RawOutcome::Text {
            text: out.join("\n"),
        })
    }
}

#[async_trait]
impl OperationHandler for FileOpHandler {
    fn kind(&self) -> ActionKind {
        ActionKind::FileOp
    }

    async fn run(&self, action: &Action) -> Result<RawOutcome, HandlerError> {
        let Action::FileOp(FileParams {
            op,
            path,
            content,
            destination,
        }) = action
        else {
            return Err(HandlerError::InvalidParameters(format!(
                "file handler cannot run {}",
                action.kind()
            )));
        };

        let path = resolve_path(&self.workspace, path);
        let content = content.as_deref().unwrap_or("");

        match op {
            FileOperation::Create => self.create(&path, content).await,
            FileOperation::Read => self.read(&path).await,
            FileOperation::Edit => self.edit(&path, content).await,
            FileOperation::Delete => self.delete(&path).await,
            FileOperation::Move => {
                let destination = destination.as_deref().ok_or_else(|| {
                    HandlerError::InvalidParameters("move requires a destination".to_string())
                })?;
                let destination = resolve_path(&self.workspace, destination);
                self.move_to(&path, &destination).await
            }
            FileOperation::List => self.list(&path).await,
        }
    }
}

/// Where a move actually lands, mirroring [`FileOpHandler`]'s rule for directory targets
pub fn move_target(source: &Path, destination: &Path) -> PathBuf {
    if destination.is_dir() {
        if let Some(name) = source.file_name() {
            let nested = destination.join(name);
            if nested.exists() {
                return nested;
            }
        }
    }
    destination.to_path_buf()
}

/// Format a byte count into a human-readable size string.
fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.1} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn setup() -> (TempDir, FileOpHandler) {
        let temp = TempDir::new().unwrap();
        let handler = FileOpHandler::new(temp.path().to_path_buf());
        (temp, handler)
    }

    fn file_action(params: serde_json::Value) -> Action {
        Action::from_parts("file_op", &params).unwrap()
    }

    #[tokio::test]
    async fn test_create_and_read_relative_path() {
        let (temp, handler) = setup();

        handler
            .run(&file_action(
                json!({"op": "create", "path": "notes/hello.txt", "content": "hello world"}),
            ))
            .await
            .unwrap();
        assert!(temp.path().join("notes/hello.txt").is_file());

        let outcome = handler
            .run(&file_action(json!({"op": "read", "path": "notes/hello.txt"})))
            .await
            .unwrap();
        assert_eq!(outcome, RawOutcome::Text { text: "hello world".into() });
    }

    #[tokio::test]
    async fn test_edit_missing_file_fails() {
        let (_temp, handler) = setup();
        let result = handler
            .run(&file_action(json!({"op": "edit", "path": "nope.txt", "content": "x"})))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_delete_directory_recursively() {
        let (temp, handler) = setup();
        std::fs::create_dir_all(temp.path().join("build/out")).unwrap();
        std::fs::write(temp.path().join("build/out/a.o"), "x").unwrap();

        handler
            .run(&file_action(json!({"op": "delete", "path": "build"})))
            .await
            .unwrap();
        assert!(!temp.path().join("build").exists());
    }

    #[tokio::test]
    async fn test_move_into_directory_keeps_name() {
        let (temp, handler) = setup();
        std::fs::write(temp.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(temp.path().join("archive")).unwrap();

        handler
            .run(&file_action(
                json!({"op": "move", "path": "a.txt", "destination": "archive"}),
            ))
            .await
            .unwrap();

        assert!(!temp.path().join("a.txt").exists());
        assert!(temp.path().join("archive/a.txt").is_file());
        assert_eq!(
            move_target(&temp.path().join("a.txt"), &temp.path().join("archive")),
            temp.path().join("archive/a.txt")
        );
    }

    #[tokio::test]
    async fn test_list_dir() {
        let (temp, handler) = setup();
        std::fs::write(temp.path().join("a.txt"), "a").unwrap();
        std::fs::create_dir(temp.path().join("subdir")).unwrap();

        let outcome = handler
            .run(&file_action(json!({"op": "list", "path": "."})))
            .await
            .unwrap();
        let listing = outcome.summary();
        assert!(listing.contains("a.txt"));
        assert!(listing.contains("d  subdir/"));
    }

    #[tokio::test]
    async fn test_wrong_action_kind_rejected() {
        let (_temp, handler) = setup();
        let action = Action::from_parts("system_info", &json!({})).unwrap();
        assert!(matches!(
            handler.run(&action).await,
            Err(HandlerError::InvalidParameters(_))
        ));
    }

    #[test]
    fn test_format_size() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(2048), "2.0 KB");
    }
}
