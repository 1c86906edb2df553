use chrono::Utc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use super::into_response;
use crate::api::KrxClient;
use crate::database_sqlx::ReferenceStore;
use crate::error::Result;
use crate::models::{PipelineResponse, StockListRefreshed};
use crate::utils::{exchange_today, krx_trade_date};

/// KRX listing -> `stocks` table
pub struct StockListPipeline {
    krx: KrxClient,
    store: ReferenceStore,
    // Serializes refreshes issued through the same pipeline instance
    refresh_lock: Mutex<()>,
}

impl StockListPipeline {
    pub fn new(krx: KrxClient, store: ReferenceStore) -> Self {
        Self {
            krx,
            store,
            refresh_lock: Mutex::new(()),
        }
    }

    pub async fn run(&self) -> PipelineResponse<StockListRefreshed> {
        into_response("stock-list", self.refresh().await)
    }

    pub async fn refresh(&self) -> Result<StockListRefreshed> {
        let _guard = self.refresh_lock.lock().await;
        info!("🚀 Starting KRX stock list update...");

        let trade_date = krx_trade_date(exchange_today(Utc::now()));
        let stocks = self.krx.fetch_stock_list(&trade_date).await?;

        if stocks.is_empty() {
            warn!("KRX returned no stock rows for {}; table will be emptied", trade_date);
        }

        info!("Replacing stock table with {} rows...", stocks.len());
        let stored = self.store.replace_stocks(&stocks).await?;

        info!("✅ Stock list update completed successfully");
        Ok(StockListRefreshed {
            success: true,
            message: format!("{} stocks updated successfully", stored),
            count: stored,
            updated_at: Utc::now(),
        })
    }
}
