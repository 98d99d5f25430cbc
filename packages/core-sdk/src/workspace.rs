use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::{OrganizeError, OrganizeResult};
use crate::organizer::Workspace;
use crate::telemetry;

/**
 * \brief 以磁盘文件作为活动文档的宿主实现，供 CLI 与本地服务共用。
 */
#[derive(Debug)]
pub struct FileWorkspace {
    path: Option<PathBuf>,
    echo: bool,
    busy: AtomicBool,
    notices: Mutex<Vec<String>>,
}

impl FileWorkspace {
    /**
     * \brief 静默模式：通知只记录，不输出到终端。
     */
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path,
            echo: false,
            busy: AtomicBool::new(false),
            notices: Mutex::new(Vec::new()),
        }
    }

    /**
     * \brief 终端模式：通知输出到 stdout，忙碌提示输出到 stderr。
     */
    pub fn interactive(path: Option<PathBuf>) -> Self {
        Self {
            echo: true,
            ..Self::new(path)
        }
    }

    pub fn notices(&self) -> Vec<String> {
        self.notices.lock().map(|g| g.clone()).unwrap_or_default()
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

#[async_trait]
impl Workspace for FileWorkspace {
    type Document = PathBuf;

    fn active_document(&self) -> Option<PathBuf> {
        self.path
            .as_deref()
            .filter(|p| p.is_file())
            .map(Path::to_path_buf)
    }

    async fn read(&self, doc: &PathBuf) -> OrganizeResult<String> {
        tokio::fs::read_to_string(doc)
            .await
            .map_err(|e| OrganizeError::Document(format!("read {}: {}", doc.display(), e)))
    }

    async fn overwrite(&self, doc: &PathBuf, text: &str) -> OrganizeResult<()> {
        tokio::fs::write(doc, text)
            .await
            .map_err(|e| OrganizeError::Document(format!("write {}: {}", doc.display(), e)))
    }

    fn notify(&self, message: &str) {
        telemetry::log_event("workspace.notice", message);
        if self.echo {
            println!("{}", message);
        }
        if let Ok(mut guard) = self.notices.lock() {
            guard.push(message.to_string());
        }
    }

    fn show_busy(&self) {
        self.busy.store(true, Ordering::Release);
        if self.echo {
            eprintln!("Organizing note...");
        }
    }

    fn hide_busy(&self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_is_not_active() {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = FileWorkspace::new(Some(dir.path().join("absent.md")));
        assert!(workspace.active_document().is_none());
        assert!(FileWorkspace::new(None).active_document().is_none());
    }

    #[test]
    fn test_directory_is_not_active() {
        let dir = tempfile::tempdir().expect("tempdir");
        let workspace = FileWorkspace::new(Some(dir.path().to_path_buf()));
        assert!(workspace.active_document().is_none());
    }

    #[tokio::test]
    async fn test_overwrite_replaces_file_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("note.md");
        std::fs::write(&path, "raw notes").expect("seed file");

        let workspace = FileWorkspace::new(Some(path.clone()));
        let doc = workspace.active_document().expect("active document");
        assert_eq!(workspace.read(&doc).await.expect("read"), "raw notes");

        workspace.overwrite(&doc, "# Organized").await.expect("overwrite");
        assert_eq!(std::fs::read_to_string(&path).expect("reread"), "# Organized");
    }

    #[test]
    fn test_notices_are_recorded() {
        let workspace = FileWorkspace::new(None);
        workspace.notify("first");
        workspace.notify("second");
        assert_eq!(workspace.notices(), vec!["first".to_string(), "second".to_string()]);

        workspace.show_busy();
        assert!(workspace.is_busy());
        workspace.hide_busy();
        assert!(!workspace.is_busy());
    }
}
