use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info, warn};
use url::Url;

use super::{browser_headers, RetryingFetcher};
use crate::error::{Result, SyncError};
use crate::models::{CorporateCodeMapping, FinancialStatementYear};
use crate::utils::normalize_stock_code;

/// Annual business report
pub const ANNUAL_REPORT_CODE: &str = "11011";
/// Status sentinel DART puts on every successful JSON payload
pub const STATUS_OK: &str = "000";

const CORPUS_ROOT_MARKER: &str = "<list>";
const CORPUS_ERROR_MARKERS: [&str; 2] = ["<status>", "error"];

/// OpenDART client: bulk corp-code corpus and single-company statements
#[derive(Clone)]
pub struct DartClient {
    client: Client,
    fetcher: RetryingFetcher,
    base_url: String,
}

impl DartClient {
    pub fn new(client: Client, fetcher: RetryingFetcher, base_url: &str) -> Self {
        Self {
            client,
            fetcher,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    fn endpoint(&self, path: &str, params: &[(&str, &str)]) -> Result<Url> {
        Url::parse_with_params(&format!("{}/{}", self.base_url, path), params)
            .map_err(|e| SyncError::InvalidRequest(format!("bad DART endpoint {}: {}", path, e)))
    }

    /// Fetch the bulk corp-code XML with browser headers and exponential backoff
    pub async fn fetch_corp_code_xml(&self, api_key: &str) -> Result<String> {
        let url = self.endpoint("corpCode.xml", &[("crtfc_key", api_key)])?;
        let headers = browser_headers();

        info!("🌐 Fetching corp-code corpus from DART...");
        let response = self
            .fetcher
            .fetch(|client| client.get(url.clone()).headers(headers.clone()))
            .await?;

        let body = response
            .text()
            .await
            .map_err(|e| SyncError::upstream("corp_code", e))?;

        info!("DART corpus received: {} bytes", body.len());
        Ok(body)
    }

    /// Fetch one fiscal year of the single-company statement set.
    ///
    /// Returns the verbatim JSON payload; callers decide whether the status
    /// sentinel makes it usable.
    pub async fn fetch_statement_year(&self, api_key: &str, corp_code: &str, fiscal_year: i32) -> Result<Value> {
        let year = fiscal_year.to_string();
        let url = self.endpoint(
            "fnlttSinglAcnt.json",
            &[
                ("crtfc_key", api_key),
                ("corp_code", corp_code),
                ("bsns_year", &year),
                ("reprt_code", ANNUAL_REPORT_CODE),
            ],
        )?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SyncError::upstream("statement", e))?;

        if !response.status().is_success() {
            return Err(SyncError::upstream("statement", format!("status {}", response.status())));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| SyncError::MalformedResponse(format!("statement payload for {}: {}", fiscal_year, e)))
    }
}

/// Structural check on a corp-code payload before it is trusted
pub fn validate_corp_code_payload(xml: &str) -> Result<()> {
    if !xml.contains(CORPUS_ROOT_MARKER) {
        return Err(SyncError::MalformedResponse(
            "corp-code payload is missing the <list> marker".to_string(),
        ));
    }
    if let Some(marker) = CORPUS_ERROR_MARKERS.iter().find(|m| xml.contains(*m)) {
        return Err(SyncError::MalformedResponse(format!(
            "corp-code payload carries error marker {}",
            marker
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum CorpField {
    CorpCode,
    CorpName,
    StockCode,
}

#[derive(Debug, Default)]
struct CorpEntry {
    corp_code: Option<String>,
    corp_name: Option<String>,
    stock_code: Option<String>,
}

impl CorpEntry {
    fn push_text(&mut self, field: CorpField, text: &str) {
        let slot = match field {
            CorpField::CorpCode => &mut self.corp_code,
            CorpField::CorpName => &mut self.corp_name,
            CorpField::StockCode => &mut self.stock_code,
        };
        slot.get_or_insert_with(String::new).push_str(text);
    }

    fn into_mapping(self) -> Option<CorporateCodeMapping> {
        let dart_code = self.corp_code?.trim().to_string();
        let company_name = self.corp_name?.trim().to_string();
        let stock_code = self.stock_code?.trim().to_string();

        // Unlisted entities carry an empty stock code
        if dart_code.is_empty() || stock_code.is_empty() {
            return None;
        }

        Some(CorporateCodeMapping {
            stock_code: normalize_stock_code(&stock_code),
            company_name,
            dart_code,
        })
    }
}

/// Extract `(dart_code, name, stock_code)` triples from every `<list>` record.
///
/// Records without a stock code are unlisted and skipped, as are records
/// whose text cannot be unescaped. Structural syntax errors fail the whole
/// corpus with `MalformedResponse`.
pub fn parse_corp_codes(xml: &str) -> Result<Vec<CorporateCodeMapping>> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut mappings = Vec::new();
    let mut entry: Option<CorpEntry> = None;
    let mut field: Option<CorpField> = None;
    let mut skipped = 0usize;

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => match e.name().as_ref() {
                b"list" => {
                    entry = Some(CorpEntry::default());
                    field = None;
                }
                b"corp_code" if entry.is_some() => field = Some(CorpField::CorpCode),
                b"corp_name" if entry.is_some() => field = Some(CorpField::CorpName),
                b"stock_code" if entry.is_some() => field = Some(CorpField::StockCode),
                _ => field = None,
            },
            Ok(Event::Text(text)) => {
                if let (Some(current), Some(record)) = (field, entry.as_mut()) {
                    match text.unescape() {
                        Ok(value) => record.push_text(current, &value),
                        Err(e) => {
                            // Drop only this record; the rest of the corpus stays usable
                            debug!("Skipping corp-code record with bad text: {}", e);
                            skipped += 1;
                            entry = None;
                            field = None;
                        }
                    }
                }
            }
            Ok(Event::CData(data)) => {
                if let (Some(current), Some(record)) = (field, entry.as_mut()) {
                    record.push_text(current, &String::from_utf8_lossy(&data.into_inner()));
                }
            }
            Ok(Event::End(e)) => {
                if e.name().as_ref() == b"list" {
                    if let Some(mapping) = entry.take().and_then(CorpEntry::into_mapping) {
                        if mappings.len() < 10 {
                            debug!(
                                "Parsed: {} ({}) - {}",
                                mapping.company_name, mapping.stock_code, mapping.dart_code
                            );
                        }
                        mappings.push(mapping);
                    }
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SyncError::MalformedResponse(format!(
                    "XML error at position {}: {}",
                    reader.buffer_position(),
                    e
                )))
            }
            _ => {}
        }
    }

    if skipped > 0 {
        warn!("Skipped {} unreadable corp-code records", skipped);
    }

    Ok(mappings)
}

#[derive(Debug, Deserialize)]
struct StatementEnvelope {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    list: Option<Vec<StatementLine>>,
}

#[derive(Debug, Deserialize)]
struct StatementLine {
    #[serde(default)]
    account_nm: String,
    #[serde(default)]
    thstrm_amount: Option<String>,
    #[serde(default)]
    fs_div: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Account {
    Revenue,
    OperatingIncome,
    NetIncome,
    TotalAssets,
    TotalLiabilities,
    TotalEquity,
    OperatingCashFlow,
    InvestingCashFlow,
    FinancingCashFlow,
}

/// Account-name labels mapped onto canonical fields; matching is exact
const CANONICAL_ACCOUNTS: [(&str, Account); 9] = [
    ("매출액", Account::Revenue),
    ("영업이익", Account::OperatingIncome),
    ("당기순이익", Account::NetIncome),
    ("자산총계", Account::TotalAssets),
    ("부채총계", Account::TotalLiabilities),
    ("자본총계", Account::TotalEquity),
    ("영업활동으로인한현금흐름", Account::OperatingCashFlow),
    ("투자활동으로인한현금흐름", Account::InvestingCashFlow),
    ("재무활동으로인한현금흐름", Account::FinancingCashFlow),
];

impl Account {
    fn from_label(label: &str) -> Option<Self> {
        CANONICAL_ACCOUNTS
            .iter()
            .find(|(name, _)| *name == label)
            .map(|(_, account)| *account)
    }

    fn assign(self, year: &mut FinancialStatementYear, amount: Option<i64>) {
        let slot = match self {
            Account::Revenue => &mut year.revenue,
            Account::OperatingIncome => &mut year.operating_income,
            Account::NetIncome => &mut year.net_income,
            Account::TotalAssets => &mut year.total_assets,
            Account::TotalLiabilities => &mut year.total_liabilities,
            Account::TotalEquity => &mut year.total_equity,
            Account::OperatingCashFlow => &mut year.cash_flow_operations,
            Account::InvestingCashFlow => &mut year.cash_flow_investing,
            Account::FinancingCashFlow => &mut year.cash_flow_financing,
        };
        *slot = amount;
    }
}

/// Parse a DART amount string such as `"258,935,494,000,000"`
pub fn parse_amount(raw: &str) -> Option<i64> {
    let cleaned: String = raw.chars().filter(|c| *c != ',').collect();
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<i64>().ok()
}

/// Turn a statement payload into a canonical year, or `None` when the
/// status sentinel says the payload holds no usable data.
pub fn extract_statement_year(stock_code: &str, fiscal_year: i32, payload: &Value) -> Option<FinancialStatementYear> {
    let envelope: StatementEnvelope = match serde_json::from_value(payload.clone()) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!("Statement payload for {} is not in the expected shape: {}", fiscal_year, e);
            return None;
        }
    };

    if envelope.status != STATUS_OK {
        debug!(
            "DART status {} for {}: {}",
            envelope.status,
            fiscal_year,
            envelope.message.as_deref().unwrap_or("")
        );
        return None;
    }

    let lines = envelope.list?;
    let consolidated_only = lines.iter().any(|line| line.fs_div.as_deref() == Some("CFS"));

    let mut year = FinancialStatementYear::empty(stock_code, fiscal_year, payload.clone());
    for line in lines
        .iter()
        .filter(|line| !consolidated_only || line.fs_div.as_deref() == Some("CFS"))
    {
        if let Some(account) = Account::from_label(&line.account_nm) {
            let amount = line.thstrm_amount.as_deref().and_then(parse_amount);
            account.assign(&mut year, amount);
        }
    }

    Some(year)
}
