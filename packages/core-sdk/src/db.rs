use anyhow::Result;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension};
use std::{path::Path, thread, time::Duration};

use crate::models::Settings;

const DEFAULT_DB_FILE: &str = "organizer.db";

const KEY_PROVIDER: &str = "provider";
const KEY_API_KEY: &str = "api_key";
const KEY_MODEL: &str = "model";
const KEY_CUSTOM_URL: &str = "custom_url";
const KEY_OLLAMA_URL: &str = "ollama_url";
const KEY_TARGET_LANGUAGE: &str = "target_language";
const KEY_TELEMETRY: &str = "telemetry_enabled";

/**
 * \brief 打开默认数据库文件（本地目录下的 organizer.db）。
 */
pub fn open_default_db() -> Result<Connection> {
    open_db(DEFAULT_DB_FILE)
}

/**
 * \brief 打开指定路径的数据库文件。
 */
pub fn open_db(path: impl AsRef<Path>) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    Ok(conn)
}

/**
 * \brief 运行数据库迁移，创建必要表结构。
 */
pub fn migrate(conn: &Connection) -> Result<()> {
    retry_on_locked(|| {
        conn.execute_batch(
            r#"
        PRAGMA journal_mode=WAL;
        CREATE TABLE IF NOT EXISTS app_config (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        );
        "#,
        )
    })?;
    Ok(())
}

fn set_config(conn: &Connection, key: &str, value: &str) -> Result<()> {
    retry_on_locked(|| {
        conn.execute(
            "INSERT INTO app_config (key, value) VALUES (?1, ?2)
         ON CONFLICT(key) DO UPDATE SET value=excluded.value",
            params![key, value],
        )
    })?;
    Ok(())
}

fn get_config(conn: &Connection, key: &str) -> Result<Option<String>> {
    let val = conn
        .query_row(
            "SELECT value FROM app_config WHERE key=?1",
            params![key],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(val)
}

fn set_bool_config(conn: &Connection, key: &str, value: bool) -> Result<()> {
    set_config(conn, key, if value { "1" } else { "0" })
}

fn get_bool_config(conn: &Connection, key: &str, default: bool) -> Result<bool> {
    Ok(get_config(conn, key)?.map(|s| s == "1").unwrap_or(default))
}

/**
 * \brief 读取配置；未保存的字段使用默认值。
 */
pub fn load_settings(conn: &Connection) -> Result<Settings> {
    let mut settings = Settings::default();
    let fields: [(&str, &mut String); 6] = [
        (KEY_PROVIDER, &mut settings.provider),
        (KEY_API_KEY, &mut settings.api_key),
        (KEY_MODEL, &mut settings.model),
        (KEY_CUSTOM_URL, &mut settings.custom_url),
        (KEY_OLLAMA_URL, &mut settings.ollama_url),
        (KEY_TARGET_LANGUAGE, &mut settings.target_language),
    ];
    for (key, slot) in fields {
        if let Some(value) = get_config(conn, key)? {
            *slot = value;
        }
    }
    Ok(settings)
}

/**
 * \brief 保存全部配置字段。
 */
pub fn save_settings(conn: &Connection, settings: &Settings) -> Result<()> {
    let fields = [
        (KEY_PROVIDER, &settings.provider),
        (KEY_API_KEY, &settings.api_key),
        (KEY_MODEL, &settings.model),
        (KEY_CUSTOM_URL, &settings.custom_url),
        (KEY_OLLAMA_URL, &settings.ollama_url),
        (KEY_TARGET_LANGUAGE, &settings.target_language),
    ];
    for (key, value) in fields {
        set_config(conn, key, value)?;
    }
    Ok(())
}

/**
 * \brief 读取遥测开关。
 */
pub fn get_telemetry_enabled(conn: &Connection) -> Result<bool> {
    get_bool_config(conn, KEY_TELEMETRY, false)
}

/**
 * \brief 更新遥测开关。
 */
pub fn set_telemetry_enabled(conn: &Connection, enabled: bool) -> Result<()> {
    set_bool_config(conn, KEY_TELEMETRY, enabled)
}

/**
 * \brief 针对 SQLite 锁冲突的重试助手。
 * \details 捕获 `database is locked`/`database table is locked` 等错误并进行线性退避，最大尝试 6 次。
 */
fn retry_on_locked<T, F>(mut action: F) -> Result<T>
where
    F: FnMut() -> rusqlite::Result<T>,
{
    const MAX_RETRIES: usize = 5;
    for attempt in 0..=MAX_RETRIES {
        match action() {
            Ok(value) => return Ok(value),
            Err(rusqlite::Error::SqliteFailure(err, _))
                if matches!(
                    err.code,
                    ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked
                ) && attempt < MAX_RETRIES =>
            {
                let backoff = Duration::from_millis(200 * (attempt as u64 + 1));
                thread::sleep(backoff);
                continue;
            }
            Err(e) => return Err(e.into()),
        }
    }
    unreachable!("retry_on_locked should have returned within the loop");
}
