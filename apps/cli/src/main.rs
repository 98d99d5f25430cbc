use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use organizer_core_sdk::{
    db,
    llm::HttpTransport,
    models::Settings,
    organizer::Organizer,
    server::{self, SettingsPatch},
    telemetry,
    workspace::FileWorkspace,
};

/**
 * \brief CLI 程序入口：整理 Markdown 笔记并管理配置。
 */
#[derive(Parser, Debug)]
#[command(
    name = "organizer",
    version,
    about = "Reorganize chat-style notes into clean Markdown with an LLM"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 整理指定文件并覆盖写回；参数仅对本次运行生效。
     */
    Organize {
        /// Markdown file to reorganize in place
        path: PathBuf,
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        model: Option<String>,
        /// ISO 639-1 code of the output language (e.g. es, en, fr)
        #[arg(long = "lang")]
        target_language: Option<String>,
    },

    /**
     * \brief 更新持久化配置，未指定的字段保持不变。
     */
    Config {
        /// openai | openrouter | ollama | custom
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        custom_url: Option<String>,
        #[arg(long)]
        ollama_url: Option<String>,
        /// ISO 639-1 code of the output language (e.g. es, en, fr)
        #[arg(long = "lang")]
        target_language: Option<String>,
        #[arg(long)]
        enable_telemetry: Option<bool>,
    },

    /**
     * \brief 显示当前配置（密钥已隐藏）。
     */
    Show,

    /**
     * \brief 启动本地 HTTP 服务。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:5174")]
        addr: String,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let conn = db::open_default_db().context("open database failed")?;
    db::migrate(&conn).context("apply migrations failed")?;
    let telemetry_enabled = db::get_telemetry_enabled(&conn).unwrap_or(false);
    telemetry::set_enabled(telemetry_enabled);

    match cli.command {
        Commands::Organize {
            path,
            provider,
            model,
            target_language,
        } => {
            let mut settings = db::load_settings(&conn).context("load settings failed")?;
            drop(conn);
            SettingsPatch {
                provider,
                model,
                target_language,
                ..SettingsPatch::default()
            }
            .apply(&mut settings);

            telemetry::log_event(
                "cli.organize",
                &format!("path={} provider={}", path.display(), settings.provider),
            );

            let transport = HttpTransport::new().context("create http client failed")?;
            let organizer = Organizer::new(settings, transport);
            let workspace = FileWorkspace::interactive(Some(path));
            if organizer.organize_active(&workspace).await.is_err() {
                return Ok(ExitCode::FAILURE);
            }
        }
        Commands::Config {
            provider,
            api_key,
            model,
            custom_url,
            ollama_url,
            target_language,
            enable_telemetry,
        } => {
            let patch = SettingsPatch {
                provider,
                api_key,
                model,
                custom_url,
                ollama_url,
                target_language,
                telemetry_enabled: enable_telemetry,
            };
            let mut settings = db::load_settings(&conn).context("load settings failed")?;
            patch.apply(&mut settings);
            db::save_settings(&conn, &settings).context("save settings failed")?;
            if let Some(enabled) = patch.telemetry_enabled {
                db::set_telemetry_enabled(&conn, enabled).context("save telemetry failed")?;
                telemetry::set_enabled(enabled);
            }
            telemetry::log_event(
                "cli.config",
                &format!("provider={} model={}", settings.provider, settings.model),
            );
            println!("Saved settings:");
            print_settings(&settings, db::get_telemetry_enabled(&conn).unwrap_or(false));
        }
        Commands::Show => {
            let settings = db::load_settings(&conn).context("load settings failed")?;
            print_settings(&settings, telemetry_enabled);
        }
        Commands::Serve { addr } => {
            drop(conn);
            server::run(&addr).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}

fn print_settings(settings: &Settings, telemetry_enabled: bool) {
    let shown = settings.masked();
    println!("  provider        = {}", shown.provider);
    println!("  api_key         = {}", shown.api_key);
    println!("  model           = {}", shown.model);
    println!("  custom_url      = {}", shown.custom_url);
    println!("  ollama_url      = {}", shown.ollama_url);
    println!("  target_language = {}", shown.target_language);
    println!("  telemetry       = {}", telemetry_enabled);
}
