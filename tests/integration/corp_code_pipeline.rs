//! Corp-code pipeline: live download, cached fallbacks and the seed

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use std::path::PathBuf;
use std::sync::Arc;
use wiremock::matchers::{header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use krx_dart_sync::archive::{ArchiveStore, LocalArchiveStore};
use krx_dart_sync::models::{Config, CredentialCategory, Provenance};
use krx_dart_sync::pipelines::CorpCodePipeline;
use krx_dart_sync::SyncError;

use crate::common::{dart_client, fixtures, logging, TestEnv};

const CORP_CODE_PATH: &str = "/api/corpCode.xml";

fn pipeline(env: &TestEnv, config: &Config) -> CorpCodePipeline {
    CorpCodePipeline::new(
        Arc::new(env.store.clone()),
        dart_client(config),
        Arc::new(LocalArchiveStore::new(&config.archive_dir)),
        config.archive_bucket.clone(),
        config.dart_cache_paths.clone(),
        env.store.clone(),
    )
}

async fn env_with_key() -> TestEnv {
    let env = TestEnv::new().await;
    env.store
        .set_credential(CredentialCategory::Dart, "test-dart-key")
        .await
        .unwrap();
    env
}

fn write_cache(env: &TestEnv, name: &str, xml: &str) -> PathBuf {
    let path = env.path().join(name);
    std::fs::write(&path, xml).unwrap();
    path
}

#[test_log::test(tokio::test)]
async fn test_live_corpus_is_stored_and_archived() {
    logging::init_test_logging();
    logging::log_test_step("Live corp-code refresh");

    let env = env_with_key().await;
    let server = MockServer::start().await;
    let config = env.config(&server.uri());

    let xml = fixtures::corp_code_xml(&[
        ("00126380", "삼성전자", "5930"),
        ("00164779", "SK하이닉스", "000660"),
        ("00434003", "다코", ""),
        ("00258801", "카카오", "035720"),
    ]);
    Mock::given(method("GET"))
        .and(path(CORP_CODE_PATH))
        .and(query_param("crtfc_key", "test-dart-key"))
        .and(header("sec-fetch-mode", "navigate"))
        .respond_with(ResponseTemplate::new(200).set_body_string(xml))
        .expect(1)
        .mount(&server)
        .await;

    let result = pipeline(&env, &config).run().await.success().expect("refresh should succeed");

    assert_eq!(result.source, Provenance::Live);
    assert_eq!(result.total_companies, 3);
    assert_eq!(result.message, "3 companies updated successfully");
    assert_eq!(result.sample_companies, vec!["삼성전자", "SK하이닉스", "카카오"]);

    let samsung = env.store.find_corp_code("005930").await.unwrap().expect("padded mapping");
    assert_eq!(samsung.dart_code, "00126380");
    assert_eq!(env.store.count_corp_codes().await.unwrap(), 3);

    let archive = LocalArchiveStore::new(&config.archive_dir);
    let snapshots = archive.list("dart-files", 10).await.unwrap();
    assert_eq!(snapshots.len(), 1);
    assert!(snapshots[0].starts_with("corpCode_") && snapshots[0].ends_with(".xml"));
}

#[test_log::test(tokio::test)]
async fn test_unreadable_record_is_skipped_in_live_corpus() {
    logging::log_test_step("Live corpus with one record carrying a bare ampersand");

    let env = env_with_key().await;
    let server = MockServer::start().await;
    let config = env.config(&server.uri());

    // The fixture writes names verbatim, so "A & B" reaches the parser unescaped
    let xml = fixtures::corp_code_xml(&[("00126380", "삼성전자", "005930"), ("00999999", "A & B", "123456")]);
    Mock::given(method("GET"))
        .and(path(CORP_CODE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(xml))
        .expect(1)
        .mount(&server)
        .await;

    let result = pipeline(&env, &config).run().await.success().expect("refresh should succeed");

    assert_eq!(result.source, Provenance::Live);
    assert_eq!(result.total_companies, 1);
    assert_eq!(result.sample_companies, vec!["삼성전자"]);
    assert_eq!(env.store.count_corp_codes().await.unwrap(), 1);
    assert!(env.store.find_corp_code("123456").await.unwrap().is_none());
}

#[test_log::test(tokio::test)]
async fn test_unparseable_live_corpus_falls_back_to_cache() {
    let env = env_with_key().await;
    let server = MockServer::start().await;
    let mut config = env.config(&server.uri());

    Mock::given(method("GET"))
        .and(path(CORP_CODE_PATH))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("<result><list><corp_code>1</corp_name></list></result>"),
        )
        .mount(&server)
        .await;
    config.dart_cache_paths = vec![write_cache(
        &env,
        "corpCode.xml",
        &fixtures::corp_code_xml(&[("00164779", "SK하이닉스", "000660")]),
    )];

    let result = pipeline(&env, &config).refresh().await.unwrap();

    assert_eq!(result.source, Provenance::Cached);
    assert_eq!(env.store.find_corp_code("000660").await.unwrap().unwrap().dart_code, "00164779");

    // Only a corpus that parsed is archived
    let archive = LocalArchiveStore::new(&config.archive_dir);
    assert!(archive.list("dart-files", 10).await.unwrap().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_marker_check_falls_through_to_first_readable_cache() {
    let env = env_with_key().await;
    let server = MockServer::start().await;
    let mut config = env.config(&server.uri());

    Mock::given(method("GET"))
        .and(path(CORP_CODE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string("<result><status>020</status></result>"))
        .expect(1)
        .mount(&server)
        .await;

    let first = write_cache(&env, "cache_a.xml", &fixtures::corp_code_xml(&[("00126380", "삼성전자", "005930")]));
    let second = write_cache(
        &env,
        "cache_b.xml",
        &fixtures::corp_code_xml(&[("00164779", "SK하이닉스", "000660"), ("00258801", "카카오", "035720")]),
    );
    config.dart_cache_paths = vec![env.path().join("missing.xml"), first, second];

    let result = pipeline(&env, &config).refresh().await.unwrap();

    assert_eq!(result.source, Provenance::Cached);
    assert_eq!(result.total_companies, 1);
    assert!(env.store.find_corp_code("000660").await.unwrap().is_none());

    // Nothing is archived unless the live download succeeded
    let archive = LocalArchiveStore::new(&config.archive_dir);
    assert!(archive.list("dart-files", 10).await.unwrap().is_empty());
}

#[test_log::test(tokio::test)]
async fn test_server_errors_retry_then_use_cache() {
    let env = env_with_key().await;
    let server = MockServer::start().await;
    let mut config = env.config(&server.uri());

    Mock::given(method("GET"))
        .and(path(CORP_CODE_PATH))
        .respond_with(ResponseTemplate::new(503))
        .expect(3)
        .mount(&server)
        .await;

    config.dart_cache_paths = vec![write_cache(
        &env,
        "corpCode.xml",
        &fixtures::corp_code_xml(&[("00126380", "삼성전자", "005930")]),
    )];

    let result = pipeline(&env, &config).refresh().await.unwrap();
    assert_eq!(result.source, Provenance::Cached);
    assert_eq!(result.sample_companies, vec!["삼성전자"]);
}

#[test_log::test(tokio::test)]
async fn test_seed_is_last_resort() {
    let env = env_with_key().await;
    let server = MockServer::start().await;
    let config = env.config(&server.uri());

    Mock::given(method("GET"))
        .and(path(CORP_CODE_PATH))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let result = pipeline(&env, &config).refresh().await.unwrap();

    assert_eq!(result.source, Provenance::Seed);
    assert_eq!(result.total_companies, 15);
    assert_eq!(result.sample_companies.len(), 5);
    assert!(env.store.find_corp_code("005930").await.unwrap().is_some());
}

#[test_log::test(tokio::test)]
async fn test_corpus_without_listed_entities_keeps_previous_table() {
    let env = env_with_key().await;
    let server = MockServer::start().await;
    let config = env.config(&server.uri());

    // Seed the table through a successful refresh first
    Mock::given(method("GET"))
        .and(path(CORP_CODE_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_string(fixtures::corp_code_xml(&[(
            "00126380",
            "삼성전자",
            "005930",
        )])))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path(CORP_CODE_PATH))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_string(fixtures::corp_code_xml(&[("00434003", "다코", ""), ("00430964", "굿앤엘에스", " ")])),
        )
        .mount(&server)
        .await;

    let pipeline = pipeline(&env, &config);
    pipeline.refresh().await.unwrap();

    let outcome = pipeline.refresh().await;
    assert_matches!(outcome, Err(SyncError::EmptyDataset(_)));
    assert_eq!(env.store.count_corp_codes().await.unwrap(), 1);
}

#[test_log::test(tokio::test)]
async fn test_missing_credential_is_fatal() {
    let env = TestEnv::new().await;
    let server = MockServer::start().await;
    let config = env.config(&server.uri());

    Mock::given(method("GET"))
        .and(path(CORP_CODE_PATH))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let failure = pipeline(&env, &config).run().await.failure().expect("refresh should fail");
    assert_eq!(failure.step.as_deref(), Some("credentials"));
    assert_eq!(env.store.count_corp_codes().await.unwrap(), 0);
}
