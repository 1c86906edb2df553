use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use super::into_response;
use crate::api::dart_client::extract_statement_year;
use crate::api::DartClient;
use crate::database_sqlx::{CredentialResolver, ReferenceStore};
use crate::error::{Result, SyncError};
use crate::models::{CredentialCategory, FinancialDataFetched, FinancialStatementYear, PipelineResponse};
use crate::utils::{current_year, fiscal_years_back_from, normalize_stock_code};

/// Inbound trigger for a per-stock financial refresh
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FinancialDataRequest {
    #[serde(rename = "stockCode", default)]
    pub stock_code: Option<String>,
    #[serde(rename = "apiKey", default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
}

impl FinancialDataRequest {
    pub fn for_stock(stock_code: &str) -> Self {
        Self {
            stock_code: Some(stock_code.to_string()),
            api_key: None,
        }
    }
}

/// Per-stock DART statements -> `financial_data` table
pub struct FinancialPipeline {
    credentials: Arc<dyn CredentialResolver>,
    dart: DartClient,
    store: ReferenceStore,
    reference_year: Option<i32>,
}

impl FinancialPipeline {
    pub fn new(credentials: Arc<dyn CredentialResolver>, dart: DartClient, store: ReferenceStore) -> Self {
        Self {
            credentials,
            dart,
            store,
            reference_year: None,
        }
    }

    /// Pin "this year" instead of reading the clock
    pub fn with_reference_year(mut self, year: i32) -> Self {
        self.reference_year = Some(year);
        self
    }

    pub async fn run(&self, request: FinancialDataRequest) -> PipelineResponse<FinancialDataFetched> {
        into_response("financial-data", self.collect(request).await)
    }

    pub async fn collect(&self, request: FinancialDataRequest) -> Result<FinancialDataFetched> {
        let stock_code = request
            .stock_code
            .as_deref()
            .map(str::trim)
            .filter(|code| !code.is_empty())
            .map(normalize_stock_code)
            .ok_or_else(|| SyncError::InvalidRequest("Stock code is required".to_string()))?;

        info!("🚀 Starting financial data fetch for {}...", stock_code);

        let api_key = match request.api_key.filter(|key| !key.trim().is_empty()) {
            Some(key) => key,
            None => {
                info!("No API key provided in request. Fetching from credentials...");
                self.credentials.get_key(CredentialCategory::Dart).await?
            }
        };

        let mapping = self
            .store
            .find_corp_code(&stock_code)
            .await?
            .ok_or_else(|| SyncError::UnmappedStock(stock_code.clone()))?;
        info!("Found DART code {} for {}", mapping.dart_code, stock_code);

        let years = fiscal_years_back_from(self.reference_year.unwrap_or_else(current_year));
        let mut collected: Vec<FinancialStatementYear> = Vec::with_capacity(years.len());

        // One request at a time, newest year first
        for year in years {
            info!("Fetching data for year: {}", year);
            let payload = match self.dart.fetch_statement_year(&api_key, &mapping.dart_code, year).await {
                Ok(payload) => payload,
                Err(e) => {
                    warn!("Failed to fetch data for year {}: {}", year, e);
                    continue;
                }
            };

            match extract_statement_year(&stock_code, year, &payload) {
                Some(statement) => collected.push(statement),
                None => warn!("No usable statement data for {} in {}", stock_code, year),
            }
        }

        if collected.is_empty() {
            return Err(SyncError::NoDataAvailable(stock_code));
        }

        info!("Retrieved financial data for {} years", collected.len());
        self.store.upsert_financial_years(&collected).await?;

        let years: Vec<i32> = collected.iter().map(|s| s.fiscal_year).collect();
        Ok(FinancialDataFetched {
            success: true,
            message: format!("Financial data for {} updated successfully", stock_code),
            data_count: years.len(),
            years,
            updated_at: Utc::now(),
        })
    }
}
