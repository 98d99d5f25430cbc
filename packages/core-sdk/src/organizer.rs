use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;

use crate::error::{OrganizeError, OrganizeResult};
use crate::llm::{self, Transport};
use crate::models::Settings;
use crate::{prompts, telemetry};

pub const SUCCESS_NOTICE: &str = "Note organized successfully 🚀";

/**
 * \brief 宿主协作接口：活动文档、通知与忙碌指示。
 */
#[async_trait]
pub trait Workspace: Send + Sync {
    type Document: Send + Sync;

    /** \brief 当前活动文档；没有时返回 None。 */
    fn active_document(&self) -> Option<Self::Document>;
    async fn read(&self, doc: &Self::Document) -> OrganizeResult<String>;
    async fn overwrite(&self, doc: &Self::Document, text: &str) -> OrganizeResult<()>;
    fn notify(&self, message: &str);
    fn show_busy(&self);
    fn hide_busy(&self);
}

/**
 * \brief 重入保护：同一时刻最多一个整理任务。
 */
#[derive(Debug, Clone, Default)]
pub struct RunGate {
    running: Arc<AtomicBool>,
}

impl RunGate {
    pub fn new() -> Self {
        Self::default()
    }

    /**
     * \brief 尝试获取运行许可；已被占用时返回 None。
     */
    pub fn try_acquire(&self) -> Option<RunPermit> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit {
                running: Arc::clone(&self.running),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/** \brief 释放时归还运行许可。 */
#[derive(Debug)]
pub struct RunPermit {
    running: Arc<AtomicBool>,
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}

struct BusyGuard<'a, W: Workspace + ?Sized> {
    workspace: &'a W,
}

impl<'a, W: Workspace + ?Sized> BusyGuard<'a, W> {
    fn show(workspace: &'a W) -> Self {
        workspace.show_busy();
        Self { workspace }
    }
}

impl<W: Workspace + ?Sized> Drop for BusyGuard<'_, W> {
    fn drop(&mut self) {
        self.workspace.hide_busy();
    }
}

/**
 * \brief 成功结果：写回文档的字符数。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Organized {
    pub chars: usize,
}

/**
 * \brief 整理编排器：读取 → 构造提示 → 解析 Provider → 请求 → 覆盖写回。
 */
pub struct Organizer<T: Transport> {
    settings: Settings,
    transport: T,
    gate: RunGate,
}

impl<T: Transport> Organizer<T> {
    pub fn new(settings: Settings, transport: T) -> Self {
        Self::with_gate(settings, transport, RunGate::new())
    }

    /**
     * \brief 与其他编排器共享同一重入保护。
     */
    pub fn with_gate(settings: Settings, transport: T, gate: RunGate) -> Self {
        Self {
            settings,
            transport,
            gate,
        }
    }

    /**
     * \brief 整理当前活动文档；失败时文档保持不变，忙碌指示总会关闭。
     */
    pub async fn organize_active<W: Workspace + ?Sized>(
        &self,
        workspace: &W,
    ) -> OrganizeResult<Organized> {
        let Some(_permit) = self.gate.try_acquire() else {
            let err = OrganizeError::AlreadyRunning;
            workspace.notify(&err.to_string());
            telemetry::log_event("organizer", "rejected: run already in progress");
            return Err(err);
        };

        let Some(doc) = workspace.active_document() else {
            let err = OrganizeError::NoActiveDocument;
            workspace.notify(&err.to_string());
            return Err(err);
        };

        let _busy = BusyGuard::show(workspace);

        match self.run(workspace, &doc).await {
            Ok(organized) => {
                telemetry::log_event(
                    "organizer",
                    &format!(
                        "organized provider={} chars={}",
                        self.settings.provider, organized.chars
                    ),
                );
                workspace.notify(SUCCESS_NOTICE);
                Ok(organized)
            }
            Err(err) => {
                telemetry::log_error(
                    "organizer",
                    &format!("provider={} failed: {}", self.settings.provider, err),
                );
                workspace.notify(&format!("Error: {}", err));
                Err(err)
            }
        }
    }

    async fn run<W: Workspace + ?Sized>(
        &self,
        workspace: &W,
        doc: &W::Document,
    ) -> OrganizeResult<Organized> {
        let content = workspace.read(doc).await?;
        telemetry::log_event(
            "organizer",
            &format!(
                "start provider={} model={} lang={} content_len={}",
                self.settings.provider,
                self.settings.model,
                self.settings.target_language,
                content.len()
            ),
        );

        let messages = prompts::build_messages(&content, &self.settings.target_language);
        let descriptor = llm::resolve_request(&self.settings, &messages)?;
        let organized = llm::execute(&self.transport, &descriptor).await?;

        workspace.overwrite(doc, &organized).await?;
        Ok(Organized {
            chars: organized.chars().count(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryWorkspace {
        text: Mutex<Option<String>>,
        writes: Mutex<usize>,
        notices: Mutex<Vec<String>>,
        busy: AtomicBool,
        busy_seen: AtomicBool,
        fail_read: bool,
    }

    impl MemoryWorkspace {
        fn with_text(text: &str) -> Self {
            Self {
                text: Mutex::new(Some(text.to_string())),
                ..Self::default()
            }
        }

        fn text(&self) -> Option<String> {
            self.text.lock().expect("lock text").clone()
        }

        fn notices(&self) -> Vec<String> {
            self.notices.lock().expect("lock notices").clone()
        }
    }

    #[async_trait]
    impl Workspace for MemoryWorkspace {
        type Document = ();

        fn active_document(&self) -> Option<()> {
            self.text.lock().expect("lock text").as_ref().map(|_| ())
        }

        async fn read(&self, _doc: &()) -> OrganizeResult<String> {
            if self.fail_read {
                return Err(OrganizeError::Document("permission denied".to_string()));
            }
            Ok(self.text().unwrap_or_default())
        }

        async fn overwrite(&self, _doc: &(), text: &str) -> OrganizeResult<()> {
            *self.writes.lock().expect("lock writes") += 1;
            *self.text.lock().expect("lock text") = Some(text.to_string());
            Ok(())
        }

        fn notify(&self, message: &str) {
            self.notices.lock().expect("lock notices").push(message.to_string());
        }

        fn show_busy(&self) {
            self.busy.store(true, Ordering::SeqCst);
            self.busy_seen.store(true, Ordering::SeqCst);
        }

        fn hide_busy(&self) {
            self.busy.store(false, Ordering::SeqCst);
        }
    }

    struct StubTransport {
        body: String,
        calls: Mutex<Vec<(String, Value)>>,
    }

    impl StubTransport {
        fn replying(body: &str) -> Self {
            Self {
                body: body.to_string(),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn call_count(&self) -> usize {
            self.calls.lock().expect("lock calls").len()
        }
    }

    #[async_trait]
    impl Transport for StubTransport {
        async fn post_json(
            &self,
            url: &str,
            _headers: &BTreeMap<String, String>,
            body: &Value,
        ) -> OrganizeResult<String> {
            self.calls
                .lock()
                .expect("lock calls")
                .push((url.to_string(), body.clone()));
            Ok(self.body.clone())
        }
    }

    fn openai_settings() -> Settings {
        Settings {
            provider: "openai".to_string(),
            api_key: "sk-test".to_string(),
            target_language: "es".to_string(),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_end_to_end_overwrites_document() {
        let workspace = MemoryWorkspace::with_text("a b c");
        let transport = StubTransport::replying(
            r##"{"choices":[{"message":{"content":"# Nota\n- a\n- b\n- c"}}]}"##,
        );
        let organizer = Organizer::new(openai_settings(), transport);

        let organized = organizer.organize_active(&workspace).await.expect("organize");

        assert_eq!(workspace.text().as_deref(), Some("# Nota\n- a\n- b\n- c"));
        assert_eq!(organized.chars, "# Nota\n- a\n- b\n- c".chars().count());
        assert_eq!(workspace.notices(), vec![SUCCESS_NOTICE.to_string()]);
        assert!(workspace.busy_seen.load(Ordering::SeqCst));
        assert!(!workspace.busy.load(Ordering::SeqCst));

        let calls = organizer.transport.calls.lock().expect("lock calls");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "https://api.openai.com/v1/chat/completions");
        let user = calls[0].1["messages"][1]["content"].as_str().expect("user content");
        assert!(user.contains("a b c"));
    }

    #[tokio::test]
    async fn test_no_active_document_is_side_effect_free() {
        let workspace = MemoryWorkspace::default();
        let organizer = Organizer::new(openai_settings(), StubTransport::replying("{}"));

        let err = organizer.organize_active(&workspace).await.unwrap_err();

        assert_eq!(err, OrganizeError::NoActiveDocument);
        assert_eq!(organizer.transport.call_count(), 0);
        assert_eq!(*workspace.writes.lock().expect("lock writes"), 0);
        assert!(!workspace.busy_seen.load(Ordering::SeqCst));
        assert_eq!(workspace.notices(), vec!["No active document.".to_string()]);
    }

    #[tokio::test]
    async fn test_failure_leaves_document_untouched() {
        let workspace = MemoryWorkspace::with_text("original");
        let transport = StubTransport::replying(r#"{"error":{"message":"quota exceeded"}}"#);
        let organizer = Organizer::new(openai_settings(), transport);

        let err = organizer.organize_active(&workspace).await.unwrap_err();

        assert_eq!(err, OrganizeError::UpstreamApi("quota exceeded".to_string()));
        assert_eq!(workspace.text().as_deref(), Some("original"));
        assert_eq!(*workspace.writes.lock().expect("lock writes"), 0);
        assert!(workspace.busy_seen.load(Ordering::SeqCst));
        assert!(!workspace.busy.load(Ordering::SeqCst));
        assert_eq!(
            workspace.notices(),
            vec!["Error: API error: quota exceeded".to_string()]
        );
    }

    #[tokio::test]
    async fn test_unsupported_provider_skips_network() {
        let workspace = MemoryWorkspace::with_text("original");
        let settings = Settings {
            provider: "gemini".to_string(),
            ..Settings::default()
        };
        let organizer = Organizer::new(settings, StubTransport::replying("{}"));

        let err = organizer.organize_active(&workspace).await.unwrap_err();

        assert_eq!(err, OrganizeError::UnsupportedProvider("gemini".to_string()));
        assert_eq!(organizer.transport.call_count(), 0);
        assert_eq!(workspace.text().as_deref(), Some("original"));
        assert!(!workspace.busy.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_read_failure_is_reported() {
        let workspace = MemoryWorkspace {
            fail_read: true,
            ..MemoryWorkspace::with_text("original")
        };
        let organizer = Organizer::new(openai_settings(), StubTransport::replying("{}"));

        let err = organizer.organize_active(&workspace).await.unwrap_err();

        assert!(matches!(err, OrganizeError::Document(_)));
        assert_eq!(organizer.transport.call_count(), 0);
        assert!(!workspace.busy.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_overlapping_run_is_rejected() {
        let gate = RunGate::new();
        let workspace = MemoryWorkspace::with_text("original");
        let organizer = Organizer::with_gate(
            openai_settings(),
            StubTransport::replying(r#"{"choices":[{"message":{"content":"done"}}]}"#),
            gate.clone(),
        );

        let held = gate.try_acquire().expect("acquire gate");
        let err = organizer.organize_active(&workspace).await.unwrap_err();
        assert_eq!(err, OrganizeError::AlreadyRunning);
        assert_eq!(organizer.transport.call_count(), 0);
        assert_eq!(workspace.text().as_deref(), Some("original"));

        drop(held);
        organizer.organize_active(&workspace).await.expect("organize after release");
        assert_eq!(workspace.text().as_deref(), Some("done"));
        assert!(!gate.is_running());
    }

    #[test]
    fn test_gate_releases_on_drop() {
        let gate = RunGate::new();
        let permit = gate.try_acquire().expect("first acquire");
        assert!(gate.is_running());
        assert!(gate.try_acquire().is_none());
        drop(permit);
        assert!(!gate.is_running());
        assert!(gate.try_acquire().is_some());
    }
}
