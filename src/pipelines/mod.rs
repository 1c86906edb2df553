//! The three ingestion pipelines.
//!
//! Each pipeline has a fallible `refresh`/`collect` method and a `run`
//! entry point that never fails: every `SyncError` is folded into the
//! uniform `PipelineFailure` envelope at that boundary.

use chrono::Utc;
use tracing::error;

use crate::error::SyncError;
use crate::models::{PipelineFailure, PipelineResponse};

pub mod corp_codes;
pub mod financials;
pub mod stock_list;

pub use corp_codes::CorpCodePipeline;
pub use financials::{FinancialDataRequest, FinancialPipeline};
pub use stock_list::StockListPipeline;

pub(crate) fn into_response<T>(pipeline: &str, outcome: Result<T, SyncError>) -> PipelineResponse<T> {
    match outcome {
        Ok(value) => PipelineResponse::Success(value),
        Err(err) => {
            error!("❌ Error in {} pipeline: {}", pipeline, err);
            PipelineResponse::Failure(PipelineFailure {
                success: false,
                error: err.to_string(),
                step: err.step().map(str::to_string),
                timestamp: Utc::now(),
            })
        }
    }
}
