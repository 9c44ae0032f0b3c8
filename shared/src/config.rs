use std::path::PathBuf;

/// Process-wide settings, loaded once from the environment (via a `.env`
/// file if present) and handed to the [`receipt-app`] workflow as part of
/// the `Services` aggregate. Nothing here is read again after startup;
/// per-store overrides live in the store config registry instead.
#[derive(Debug, Clone)]
pub struct Settings {
    pub output_dir: PathBuf,
    pub debug_dir: PathBuf,
    pub error_dir: PathBuf,
    pub store_config_dir: PathBuf,
    pub default_llm_model: String,
    pub rate_limit_max_requests: u32,
    pub rate_limit_window_seconds: u64,
    pub ocr_text_budget_chars: usize,
    pub stage_timeout_ms: u64,
}

impl Settings {
    /// Loads settings from the environment, falling back to sensible
    /// defaults for any variable that isn't set. Calls `dotenvy::dotenv()`
    /// first so a `.env` file in the working directory is honored.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();

        let output_dir = env_path("RECEIPT_OUTPUT_DIR", "./output");
        Self {
            debug_dir: output_dir.join("debug"),
            error_dir: output_dir.join("error"),
            output_dir,
            store_config_dir: env_path("RECEIPT_STORE_CONFIG_DIR", "./store_configs"),
            default_llm_model: env_string("RECEIPT_DEFAULT_LLM_MODEL", "gpt-4o-mini"),
            rate_limit_max_requests: env_u32("RECEIPT_RATE_LIMIT_MAX_REQUESTS", 15),
            rate_limit_window_seconds: env_u64("RECEIPT_RATE_LIMIT_WINDOW_SECONDS", 60),
            ocr_text_budget_chars: env_u64("RECEIPT_OCR_TEXT_BUDGET_CHARS", 2000) as usize,
            stage_timeout_ms: env_u64("RECEIPT_STAGE_TIMEOUT_MS", 30_000),
        }
    }

    /// Ensures the output/debug/error directories exist on disk.
    pub fn ensure_output_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.output_dir)?;
        std::fs::create_dir_all(&self.debug_dir)?;
        std::fs::create_dir_all(&self.error_dir)?;
        Ok(())
    }
}

fn env_path(key: &str, default: &str) -> PathBuf {
    std::env::var(key).map(PathBuf::from).unwrap_or_else(|_| PathBuf::from(default))
}

fn env_string(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
