use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, Utc};

pub const STOCK_CODE_WIDTH: usize = 6;

/// Number of fiscal years collected per financial refresh
pub const FISCAL_YEAR_WINDOW: i32 = 5;

/// Left-pad a stock code with zeros to six characters (`"5930"` -> `"005930"`)
pub fn normalize_stock_code(raw: &str) -> String {
    let trimmed = raw.trim();
    format!("{:0>width$}", trimmed, width = STOCK_CODE_WIDTH)
}

/// Fiscal years to request, newest first: `current_year - 1` down to `current_year - 5`
pub fn fiscal_years_back_from(current_year: i32) -> Vec<i32> {
    (1..=FISCAL_YEAR_WINDOW).map(|offset| current_year - offset).collect()
}

/// Today's date on the exchange's clock (KST, UTC+9)
pub fn exchange_today(now: DateTime<Utc>) -> NaiveDate {
    FixedOffset::east_opt(9 * 3600)
        .map(|kst| now.with_timezone(&kst).date_naive())
        .unwrap_or_else(|| now.date_naive())
}

/// `YYYYMMDD`, the trade date format KRX forms expect
pub fn krx_trade_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Calendar year on the exchange's clock
pub fn exchange_year(now: DateTime<Utc>) -> i32 {
    exchange_today(now).year()
}

pub fn current_year() -> i32 {
    exchange_year(Utc::now())
}
