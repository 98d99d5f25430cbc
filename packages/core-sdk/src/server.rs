use std::path::PathBuf;

use anyhow::Result;
use axum::{
    routing::{get, post},
    Json, Router,
};
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::{
    db,
    llm::{HttpTransport, Provider},
    models::Settings,
    organizer::{Organizer, RunGate},
    telemetry,
    workspace::FileWorkspace,
};

/** \brief 进程级重入保护，所有请求共享。 */
static RUN_GATE: Lazy<RunGate> = Lazy::new(RunGate::new);

/**
 * \brief 构造全部 API 路由。
 */
pub fn router() -> Router {
    Router::new()
        .route("/api/settings", get(get_settings).post(update_settings))
        .route("/api/organize", post(organize))
        .route("/api/health", get(health_check))
}

/**
 * \brief 启动本地 HTTP 服务。
 * \param addr 监听地址，如 "127.0.0.1:5174"
 */
pub async fn run(addr: &str) -> Result<()> {
    {
        let conn = db::open_default_db()?;
        db::migrate(&conn)?;
    }
    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    axum::serve(listener, router()).await?;
    Ok(())
}

/**
 * \brief 配置局部更新；缺省字段保持原值。
 */
#[derive(Serialize, Deserialize, Debug, Default, Clone)]
pub struct SettingsPatch {
    #[serde(default)]
    pub provider: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub custom_url: Option<String>,
    #[serde(default)]
    pub ollama_url: Option<String>,
    #[serde(default)]
    pub target_language: Option<String>,
    #[serde(default)]
    pub telemetry_enabled: Option<bool>,
}

impl SettingsPatch {
    /**
     * \brief 把非空字段合并进配置。
     */
    pub fn apply(&self, settings: &mut Settings) {
        let fields = [
            (&self.provider, &mut settings.provider),
            (&self.api_key, &mut settings.api_key),
            (&self.model, &mut settings.model),
            (&self.custom_url, &mut settings.custom_url),
            (&self.ollama_url, &mut settings.ollama_url),
            (&self.target_language, &mut settings.target_language),
        ];
        for (patch, slot) in fields {
            if let Some(value) = patch {
                *slot = value.clone();
            }
        }
    }
}

#[derive(Serialize, Debug)]
struct SettingsState {
    settings: Settings,
    telemetry_enabled: bool,
}

#[derive(Deserialize, Debug)]
struct OrganizeRequest {
    /** \brief 待整理的文档路径 */
    path: PathBuf,
}

#[derive(Serialize, Debug)]
struct OrganizeResponse {
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    chars: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    notices: Vec<String>,
}

fn build_settings_state(conn: &rusqlite::Connection) -> Result<SettingsState> {
    let settings = db::load_settings(conn)?;
    let telemetry_enabled = db::get_telemetry_enabled(conn)?;
    telemetry::set_enabled(telemetry_enabled);
    Ok(SettingsState {
        settings: settings.masked(),
        telemetry_enabled,
    })
}

fn load_settings_with_telemetry() -> Result<Settings> {
    let conn = db::open_default_db()?;
    db::migrate(&conn)?;
    telemetry::set_enabled(db::get_telemetry_enabled(&conn)?);
    db::load_settings(&conn)
}

/**
 * \brief 获取当前配置（密钥已隐藏）。
 */
async fn get_settings() -> Result<Json<SettingsState>, (axum::http::StatusCode, String)> {
    let conn = db::open_default_db().map_err(internal_err)?;
    db::migrate(&conn).map_err(internal_err)?;
    let state = build_settings_state(&conn).map_err(internal_err)?;
    Ok(Json(state))
}

/**
 * \brief 局部更新配置。
 */
async fn update_settings(
    Json(patch): Json<SettingsPatch>,
) -> Result<Json<SettingsState>, (axum::http::StatusCode, String)> {
    let conn = db::open_default_db().map_err(internal_err)?;
    db::migrate(&conn).map_err(internal_err)?;
    let mut settings = db::load_settings(&conn).map_err(internal_err)?;
    patch.apply(&mut settings);
    db::save_settings(&conn, &settings).map_err(internal_err)?;
    if let Some(enabled) = patch.telemetry_enabled {
        db::set_telemetry_enabled(&conn, enabled).map_err(internal_err)?;
        telemetry::set_enabled(enabled);
    }
    telemetry::log_event(
        "server.settings",
        &format!(
            "update provider={} model={} lang={}",
            settings.provider, settings.model, settings.target_language
        ),
    );
    let state = build_settings_state(&conn).map_err(internal_err)?;
    Ok(Json(state))
}

/**
 * \brief 整理指定文档：POST /api/organize {"path": "..."}
 */
async fn organize(
    Json(req): Json<OrganizeRequest>,
) -> Result<Json<OrganizeResponse>, (axum::http::StatusCode, String)> {
    let settings = load_settings_with_telemetry().map_err(internal_err)?;
    let transport = HttpTransport::new().map_err(internal_err)?;
    let organizer = Organizer::with_gate(settings, transport, RunGate::clone(&RUN_GATE));

    telemetry::log_event("server.organize", &format!("path={}", req.path.display()));
    let workspace = FileWorkspace::new(Some(req.path));
    let result = organizer.organize_active(&workspace).await;

    let response = match result {
        Ok(organized) => OrganizeResponse {
            ok: true,
            chars: Some(organized.chars),
            error: None,
            notices: workspace.notices(),
        },
        Err(e) => OrganizeResponse {
            ok: false,
            chars: None,
            error: Some(e.to_string()),
            notices: workspace.notices(),
        },
    };
    Ok(Json(response))
}

/**
 * \brief 健康检查：仅校验配置能否解析出 Provider，不发起网络请求。
 */
async fn health_check() -> Result<Json<serde_json::Value>, (axum::http::StatusCode, String)> {
    let settings = load_settings_with_telemetry().map_err(internal_err)?;
    match Provider::from_settings(&settings) {
        Ok(provider) => Ok(Json(serde_json::json!({
            "ok": true,
            "provider": provider.kind().id(),
            "model": settings.model,
            "target_language": settings.target_language
        }))),
        Err(e) => Ok(Json(serde_json::json!({
            "ok": false,
            "provider": settings.provider,
            "error": e.to_string()
        }))),
    }
}

fn internal_err<E: std::fmt::Display>(e: E) -> (axum::http::StatusCode, String) {
    (axum::http::StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
