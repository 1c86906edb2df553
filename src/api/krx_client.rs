use encoding_rs::EUC_KR;
use reqwest::header::{CONTENT_TYPE, REFERER};
use reqwest::Client;
use tracing::{debug, info, warn};

use crate::error::{Result, SyncError};
use crate::models::{Config, StockRecord};
use crate::utils::normalize_stock_code;

/// KRX statistics screen that lists every listed security
const LISTING_BLD: &str = "dbms/MDC/STAT/standard/MDCSTAT01901";
const KRX_REFERER: &str = "http://data.krx.co.kr/contents/MDC/MDI/mdiLoader/index.cmd";

// Column positions in the MDCSTAT01901 CSV export:
// 표준코드, 단축코드, 한글 종목명, 한글 종목약명, 영문 종목명, 상장일, 시장구분, ...
const COL_ISIN: usize = 0;
const COL_STOCK_CODE: usize = 1;
const COL_COMPANY_NAME: usize = 3;
const COL_LISTING_DATE: usize = 5;
const COL_MARKET: usize = 6;
const MIN_COLUMNS: usize = 7;

/// Client for the KRX OTP-gated file download flow
pub struct KrxClient {
    client: Client,
    otp_url: String,
    download_url: String,
}

impl KrxClient {
    pub fn new(client: Client, config: &Config) -> Self {
        Self {
            client,
            otp_url: config.krx_otp_url.clone(),
            download_url: config.krx_download_url.clone(),
        }
    }

    /// Step 1: request a one-time download token for today's listing snapshot
    pub async fn generate_otp(&self, trade_date: &str) -> Result<String> {
        let form = [
            ("bld", LISTING_BLD),
            ("mktId", "ALL"),
            ("trdDd", trade_date),
            ("share", "1"),
            ("money", "1"),
            ("csvxls_isNo", "false"),
            ("name", "fileDown"),
            ("url", LISTING_BLD),
        ];

        info!("🔑 Generating OTP from KRX for trade date {}...", trade_date);
        let response = self
            .client
            .post(&self.otp_url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(REFERER, KRX_REFERER)
            .form(&form)
            .send()
            .await
            .map_err(|e| SyncError::upstream("otp", e))?;

        if !response.status().is_success() {
            return Err(SyncError::upstream("otp", format!("status {}", response.status())));
        }

        let otp = response
            .text()
            .await
            .map_err(|e| SyncError::upstream("otp", e))?
            .trim()
            .to_string();

        if otp.is_empty() {
            return Err(SyncError::MalformedResponse("KRX returned an empty OTP".to_string()));
        }

        debug!("OTP generated ({} chars)", otp.len());
        Ok(otp)
    }

    /// Step 2: exchange the token for the raw (EUC-KR) CSV bytes
    pub async fn download_csv(&self, otp: &str) -> Result<Vec<u8>> {
        info!("📥 Downloading CSV data from KRX...");
        let response = self
            .client
            .post(&self.download_url)
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(REFERER, KRX_REFERER)
            .form(&[("code", otp.trim())])
            .send()
            .await
            .map_err(|e| SyncError::upstream("download", e))?;

        if !response.status().is_success() {
            return Err(SyncError::upstream("download", format!("status {}", response.status())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| SyncError::upstream("download", e))?;

        debug!("Downloaded {} bytes of CSV", bytes.len());
        Ok(bytes.to_vec())
    }

    /// Run the full OTP -> download -> decode -> parse flow
    pub async fn fetch_stock_list(&self, trade_date: &str) -> Result<Vec<StockRecord>> {
        let otp = self.generate_otp(trade_date).await?;
        let bytes = self.download_csv(&otp).await?;
        let text = decode_krx_csv(&bytes);
        let records = parse_stock_csv(&text);
        info!("📊 Parsed {} stock records", records.len());
        Ok(records)
    }
}

/// Decode the EUC-KR body KRX serves for CSV exports
pub fn decode_krx_csv(bytes: &[u8]) -> String {
    let (decoded, _, had_errors) = EUC_KR.decode(bytes);
    if had_errors {
        warn!("Encoding errors detected while decoding EUC-KR CSV");
    }
    decoded.into_owned()
}

/// Parse the listing CSV, dropping the header and any row with fewer than seven fields
pub fn parse_stock_csv(text: &str) -> Vec<StockRecord> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    let mut dropped = 0usize;

    for row in reader.records() {
        let row = match row {
            Ok(row) => row,
            Err(e) => {
                debug!("Skipping unreadable CSV row: {}", e);
                dropped += 1;
                continue;
            }
        };

        if row.len() < MIN_COLUMNS {
            dropped += 1;
            continue;
        }

        let field = |idx: usize| row.get(idx).unwrap_or_default().trim_matches('"').trim().to_string();

        let stock_code = field(COL_STOCK_CODE);
        if stock_code.is_empty() {
            dropped += 1;
            continue;
        }

        records.push(StockRecord {
            stock_code: normalize_stock_code(&stock_code),
            company_name: field(COL_COMPANY_NAME),
            isin_code: field(COL_ISIN),
            market: field(COL_MARKET),
            listing_date: field(COL_LISTING_DATE),
        });
    }

    if dropped > 0 {
        debug!("Dropped {} short or unreadable CSV rows", dropped);
    }

    records
}
