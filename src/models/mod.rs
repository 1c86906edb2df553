use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Listed security from the KRX directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockRecord {
    pub stock_code: String,
    pub company_name: String,
    pub isin_code: String,
    pub market: String,
    pub listing_date: String,
}

/// Stock code to DART corporate identifier mapping (listed entities only)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CorporateCodeMapping {
    pub stock_code: String,
    pub company_name: String,
    pub dart_code: String,
}

/// One fiscal year of canonical statement figures for a stock
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialStatementYear {
    pub stock_code: String,
    pub fiscal_year: i32,
    pub revenue: Option<i64>,
    pub operating_income: Option<i64>,
    pub net_income: Option<i64>,
    pub total_assets: Option<i64>,
    pub total_liabilities: Option<i64>,
    pub total_equity: Option<i64>,
    pub cash_flow_operations: Option<i64>,
    pub cash_flow_investing: Option<i64>,
    pub cash_flow_financing: Option<i64>,
    /// Verbatim statement payload for the year
    pub raw_data: serde_json::Value,
}

impl FinancialStatementYear {
    pub fn empty(stock_code: &str, fiscal_year: i32, raw_data: serde_json::Value) -> Self {
        Self {
            stock_code: stock_code.to_string(),
            fiscal_year,
            revenue: None,
            operating_income: None,
            net_income: None,
            total_assets: None,
            total_liabilities: None,
            total_equity: None,
            cash_flow_operations: None,
            cash_flow_investing: None,
            cash_flow_financing: None,
            raw_data,
        }
    }
}

/// Where a corp-code corpus came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provenance {
    Live,
    Cached,
    Seed,
}

impl Provenance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Provenance::Live => "live",
            Provenance::Cached => "cached",
            Provenance::Seed => "seed",
        }
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Credential categories held in the `credentials` table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CredentialCategory {
    /// OpenDART identifier registry key
    Dart,
}

impl CredentialCategory {
    pub fn label(&self) -> &'static str {
        match self {
            CredentialCategory::Dart => "DART",
        }
    }
}

impl fmt::Display for CredentialCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for CredentialCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DART" => Ok(CredentialCategory::Dart),
            other => Err(format!("Unknown credential category: {}", other)),
        }
    }
}

// ============================================================================
// Pipeline results
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StockListRefreshed {
    pub success: bool,
    pub message: String,
    pub count: usize,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpCodesRefreshed {
    pub success: bool,
    pub message: String,
    pub total_companies: usize,
    pub sample_companies: Vec<String>,
    pub source: Provenance,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinancialDataFetched {
    pub success: bool,
    pub message: String,
    pub data_count: usize,
    pub years: Vec<i32>,
    pub updated_at: DateTime<Utc>,
}

/// Uniform failure envelope returned by every pipeline entry point
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineFailure {
    pub success: bool,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PipelineResponse<T> {
    Success(T),
    Failure(PipelineFailure),
}

impl<T> PipelineResponse<T> {
    pub fn is_success(&self) -> bool {
        matches!(self, PipelineResponse::Success(_))
    }

    pub fn success(self) -> Option<T> {
        match self {
            PipelineResponse::Success(value) => Some(value),
            PipelineResponse::Failure(_) => None,
        }
    }

    pub fn failure(self) -> Option<PipelineFailure> {
        match self {
            PipelineResponse::Success(_) => None,
            PipelineResponse::Failure(failure) => Some(failure),
        }
    }
}

// ============================================================================
// Configuration
// ============================================================================

pub const DEFAULT_KRX_OTP_URL: &str = "http://data.krx.co.kr/comm/fileDn/GenerateOTP/generate.cmd";
pub const DEFAULT_KRX_DOWNLOAD_URL: &str = "http://data.krx.co.kr/comm/fileDn/download_csv/download.cmd";
pub const DEFAULT_DART_BASE_URL: &str = "https://opendart.fss.or.kr/api";
pub const DEFAULT_CACHE_PATHS: [&str; 4] = [
    "/tmp/corpCode.xml",
    "./corpCode.xml",
    "./data/corpCode.xml",
    "/var/tmp/corpCode.xml",
];

/// Configuration for the application
#[derive(Debug, Clone)]
pub struct Config {
    pub database_path: String,
    pub archive_dir: PathBuf,
    pub archive_bucket: String,
    pub krx_otp_url: String,
    pub krx_download_url: String,
    pub dart_base_url: String,
    /// Local corp-code archives tried in order when the live corpus fails
    pub dart_cache_paths: Vec<PathBuf>,
    pub http_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            database_path: "refdata.db".to_string(),
            archive_dir: PathBuf::from("archive"),
            archive_bucket: "dart-files".to_string(),
            krx_otp_url: DEFAULT_KRX_OTP_URL.to_string(),
            krx_download_url: DEFAULT_KRX_DOWNLOAD_URL.to_string(),
            dart_base_url: DEFAULT_DART_BASE_URL.to_string(),
            dart_cache_paths: DEFAULT_CACHE_PATHS.iter().map(PathBuf::from).collect(),
            http_timeout: Duration::from_secs(30),
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok(); // Load .env file if it exists

        let defaults = Config::default();

        Ok(Config {
            database_path: std::env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            archive_dir: std::env::var("ARCHIVE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.archive_dir),
            archive_bucket: std::env::var("ARCHIVE_BUCKET").unwrap_or(defaults.archive_bucket),
            krx_otp_url: std::env::var("KRX_OTP_URL").unwrap_or(defaults.krx_otp_url),
            krx_download_url: std::env::var("KRX_DOWNLOAD_URL").unwrap_or(defaults.krx_download_url),
            dart_base_url: std::env::var("DART_BASE_URL").unwrap_or(defaults.dart_base_url),
            dart_cache_paths: std::env::var("DART_CACHE_PATHS")
                .map(|paths| {
                    paths
                        .split(':')
                        .filter(|p| !p.trim().is_empty())
                        .map(PathBuf::from)
                        .collect()
                })
                .unwrap_or(defaults.dart_cache_paths),
            http_timeout: std::env::var("HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.http_timeout),
            retry_max_attempts: std::env::var("RETRY_MAX_ATTEMPTS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &u32| *n > 0)
                .unwrap_or(defaults.retry_max_attempts),
            retry_base_delay: std::env::var("RETRY_BASE_DELAY_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
        })
    }
}
