//! Per-stock financial pipeline against a mocked DART statement endpoint

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use std::sync::Arc;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use krx_dart_sync::models::{Config, CorporateCodeMapping, CredentialCategory, FinancialStatementYear};
use krx_dart_sync::pipelines::{FinancialDataRequest, FinancialPipeline};
use krx_dart_sync::SyncError;

use crate::common::{dart_client, fixtures, logging, TestEnv};

const STATEMENT_PATH: &str = "/api/fnlttSinglAcnt.json";
const REFERENCE_YEAR: i32 = 2025;

fn pipeline(env: &TestEnv, config: &Config) -> FinancialPipeline {
    FinancialPipeline::new(Arc::new(env.store.clone()), dart_client(config), env.store.clone())
        .with_reference_year(REFERENCE_YEAR)
}

async fn env_with_samsung_mapping() -> TestEnv {
    let env = TestEnv::new().await;
    env.store
        .set_credential(CredentialCategory::Dart, "stored-key")
        .await
        .unwrap();
    env.store
        .replace_corp_codes(&[CorporateCodeMapping {
            stock_code: "005930".to_string(),
            company_name: "삼성전자".to_string(),
            dart_code: "00126380".to_string(),
        }])
        .await
        .unwrap();
    env
}

/// 2024 and 2022 carry data; 2023 and 2020 fail; 2021 has no data
async fn mount_mixed_years(server: &MockServer, api_key: &str) {
    for (year, revenue) in [("2024", "300,870,903,000,000"), ("2022", "302,231,360,000,000")] {
        Mock::given(method("GET"))
            .and(path(STATEMENT_PATH))
            .and(query_param("crtfc_key", api_key))
            .and(query_param("corp_code", "00126380"))
            .and(query_param("bsns_year", year))
            .and(query_param("reprt_code", "11011"))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixtures::statement_payload(revenue, "15,487,100,000,000")))
            .mount(server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path(STATEMENT_PATH))
        .and(query_param("bsns_year", "2021"))
        .respond_with(ResponseTemplate::new(200).set_body_json(fixtures::no_data_payload()))
        .mount(server)
        .await;
    for year in ["2023", "2020"] {
        Mock::given(method("GET"))
            .and(path(STATEMENT_PATH))
            .and(query_param("bsns_year", year))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(server)
            .await;
    }
}

#[test_log::test(tokio::test)]
async fn test_partial_years_are_stored() {
    logging::init_test_logging();
    logging::log_test_step("Five-year window with gaps");

    let env = env_with_samsung_mapping().await;
    let server = MockServer::start().await;
    let config = env.config(&server.uri());
    mount_mixed_years(&server, "stored-key").await;

    let result = pipeline(&env, &config)
        .run(FinancialDataRequest::for_stock("005930"))
        .await
        .success()
        .expect("partial data is still a success");

    assert_eq!(result.years, vec![2024, 2022]);
    assert_eq!(result.data_count, 2);
    assert_eq!(result.message, "Financial data for 005930 updated successfully");

    let stored = env.store.get_financial_years("005930").await.unwrap();
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[0].fiscal_year, 2024);
    assert_eq!(stored[0].revenue, Some(300_870_903_000_000));
    assert_eq!(stored[0].net_income, Some(15_487_100_000_000));
    assert_eq!(stored[0].total_assets, Some(455_905_980_000_000));
    assert_eq!(stored[0].operating_income, None);
    assert_eq!(stored[0].raw_data["status"], "000");
}

#[test_log::test(tokio::test)]
async fn test_rerun_updates_in_place_and_keeps_older_years() {
    let env = env_with_samsung_mapping().await;
    let server = MockServer::start().await;
    let config = env.config(&server.uri());

    let mut outside_window = FinancialStatementYear::empty("005930", 2019, serde_json::json!({"status": "000"}));
    outside_window.revenue = Some(230_400_881_000_000);
    env.store.upsert_financial_years(&[outside_window.clone()]).await.unwrap();

    for year in ["2024", "2023", "2022", "2021", "2020"] {
        Mock::given(method("GET"))
            .and(path(STATEMENT_PATH))
            .and(query_param("bsns_year", year))
            .respond_with(ResponseTemplate::new(200).set_body_json(fixtures::statement_payload("1,000", "100")))
            .expect(2)
            .mount(&server)
            .await;
    }

    let pipeline = pipeline(&env, &config);
    pipeline.collect(FinancialDataRequest::for_stock("005930")).await.unwrap();
    let second = pipeline.collect(FinancialDataRequest::for_stock("005930")).await.unwrap();
    assert_eq!(second.years, vec![2024, 2023, 2022, 2021, 2020]);

    let stored = env.store.get_financial_years("005930").await.unwrap();
    assert_eq!(stored.len(), 6);
    assert_eq!(stored.last(), Some(&outside_window));
}

#[test_log::test(tokio::test)]
async fn test_short_stock_code_is_normalized_before_lookup() {
    let env = env_with_samsung_mapping().await;
    let server = MockServer::start().await;
    let config = env.config(&server.uri());
    mount_mixed_years(&server, "stored-key").await;

    let result = pipeline(&env, &config)
        .collect(FinancialDataRequest::for_stock("5930"))
        .await
        .unwrap();

    assert_eq!(result.data_count, 2);
    assert_eq!(env.store.get_financial_years("005930").await.unwrap().len(), 2);
}

#[test_log::test(tokio::test)]
async fn test_unmapped_stock_fails_without_fetching() {
    let env = TestEnv::new().await;
    env.store
        .set_credential(CredentialCategory::Dart, "stored-key")
        .await
        .unwrap();
    let server = MockServer::start().await;
    let config = env.config(&server.uri());

    Mock::given(method("GET"))
        .and(path(STATEMENT_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let failure = pipeline(&env, &config)
        .run(FinancialDataRequest::for_stock("005930"))
        .await
        .failure()
        .expect("unmapped stock should fail");

    assert_eq!(failure.error, "DART code not found for stock: 005930");
    assert_eq!(failure.step, None);
}

#[test_log::test(tokio::test)]
async fn test_every_year_failing_is_no_data() {
    let env = env_with_samsung_mapping().await;
    let server = MockServer::start().await;
    let config = env.config(&server.uri());

    Mock::given(method("GET"))
        .and(path(STATEMENT_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(fixtures::no_data_payload()))
        .expect(5)
        .mount(&server)
        .await;

    let outcome = pipeline(&env, &config)
        .collect(FinancialDataRequest::for_stock("005930"))
        .await;

    assert_matches!(outcome, Err(SyncError::NoDataAvailable(code)) if code == "005930");
    assert!(env.store.get_financial_years("005930").await.unwrap().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_request_key_overrides_stored_credential() {
    let env = TestEnv::new().await;
    env.store
        .replace_corp_codes(&[CorporateCodeMapping {
            stock_code: "005930".to_string(),
            company_name: "삼성전자".to_string(),
            dart_code: "00126380".to_string(),
        }])
        .await
        .unwrap();
    let server = MockServer::start().await;
    let config = env.config(&server.uri());
    mount_mixed_years(&server, "request-key").await;

    let request = FinancialDataRequest {
        stock_code: Some("005930".to_string()),
        api_key: Some("request-key".to_string()),
    };
    let result = pipeline(&env, &config).collect(request).await.unwrap();

    assert_eq!(result.years, vec![2024, 2022]);
}

#[test_log::test(tokio::test)]
async fn test_missing_credential_without_request_key() {
    let env = TestEnv::new().await;
    let server = MockServer::start().await;
    let config = env.config(&server.uri());

    let failure = pipeline(&env, &config)
        .run(FinancialDataRequest::for_stock("005930"))
        .await
        .failure()
        .expect("missing key should fail");

    assert_eq!(failure.step.as_deref(), Some("credentials"));
    assert_eq!(failure.error, "DART API key not found in credentials table");
}
