use async_trait::async_trait;
use chrono::Utc;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::into_response;
use crate::api::dart_client::{parse_corp_codes, validate_corp_code_payload};
use crate::api::DartClient;
use crate::archive::{snapshot_name, ArchiveStore};
use crate::database_sqlx::{CredentialResolver, ReferenceStore};
use crate::error::{Result, SyncError};
use crate::models::{CorpCodesRefreshed, CorporateCodeMapping, CredentialCategory, PipelineResponse, Provenance};
use crate::utils::exchange_today;

const SAMPLE_SIZE: usize = 5;

/// Parsed mappings together with the tier that supplied them
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedCorpus {
    pub provenance: Provenance,
    pub mappings: Vec<CorporateCodeMapping>,
}

/// One interchangeable way of obtaining the corp-code corpus.
///
/// `load` only succeeds with a corpus that parsed; an unreadable payload is a
/// failed tier and the chain moves on.
#[async_trait]
pub trait CorpusSource: Send + Sync {
    fn provenance(&self) -> Provenance;

    fn describe(&self) -> String;

    async fn load(&self) -> Result<Vec<CorporateCodeMapping>>;
}

/// Live DART bulk download, archived best-effort on success
pub struct LiveCorpusSource {
    dart: DartClient,
    api_key: String,
    archive: Arc<dyn ArchiveStore>,
    bucket: String,
}

impl LiveCorpusSource {
    pub fn new(dart: DartClient, api_key: String, archive: Arc<dyn ArchiveStore>, bucket: String) -> Self {
        Self {
            dart,
            api_key,
            archive,
            bucket,
        }
    }

    async fn archive_snapshot(&self, xml: &str) -> Result<()> {
        if self.archive.ensure_bucket(&self.bucket).await? {
            info!("Created archive bucket {}", self.bucket);
        }
        let name = snapshot_name(exchange_today(Utc::now()));
        self.archive.upload(&self.bucket, &name, xml.as_bytes(), true).await?;
        let stored = self.archive.list(&self.bucket, usize::MAX).await?;
        info!("🗄️  Saved {} ({} snapshots archived)", name, stored.len());
        Ok(())
    }
}

#[async_trait]
impl CorpusSource for LiveCorpusSource {
    fn provenance(&self) -> Provenance {
        Provenance::Live
    }

    fn describe(&self) -> String {
        "DART corpCode.xml".to_string()
    }

    async fn load(&self) -> Result<Vec<CorporateCodeMapping>> {
        let xml = self.dart.fetch_corp_code_xml(&self.api_key).await?;
        validate_corp_code_payload(&xml)?;
        let mappings = parse_corp_codes(&xml)?;

        if let Err(e) = self.archive_snapshot(&xml).await {
            warn!("Failed to archive corpus snapshot, continuing: {}", e);
        }

        Ok(mappings)
    }
}

/// Previously saved corpus file at a fixed local path
pub struct CachedFileSource {
    path: PathBuf,
}

impl CachedFileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

#[async_trait]
impl CorpusSource for CachedFileSource {
    fn provenance(&self) -> Provenance {
        Provenance::Cached
    }

    fn describe(&self) -> String {
        format!("cached file {}", self.path.display())
    }

    async fn load(&self) -> Result<Vec<CorporateCodeMapping>> {
        let xml = tokio::fs::read_to_string(&self.path).await?;
        validate_corp_code_payload(&xml)?;
        info!("Read cached corpus from {} ({} bytes)", self.path.display(), xml.len());
        parse_corp_codes(&xml)
    }
}

/// Fixed list of well-known listed companies, used when nothing else is reachable
pub struct SeedSource;

#[async_trait]
impl CorpusSource for SeedSource {
    fn provenance(&self) -> Provenance {
        Provenance::Seed
    }

    fn describe(&self) -> String {
        "built-in seed list".to_string()
    }

    async fn load(&self) -> Result<Vec<CorporateCodeMapping>> {
        Ok(seed_mappings())
    }
}

/// Degraded-mode seed. Identifiers are placeholders; a live or cached
/// refresh replaces them.
pub fn seed_mappings() -> Vec<CorporateCodeMapping> {
    const SEED: [(&str, &str, &str); 15] = [
        ("005930", "삼성전자", "00126380"),
        ("000660", "SK하이닉스", "00164779"),
        ("035420", "NAVER", "00266961"),
        ("051910", "LG화학", "00356361"),
        ("006400", "삼성SDI", "00126362"),
        ("005380", "현대차", "00164742"),
        ("000270", "기아", "00106641"),
        ("051900", "LG생활건강", "00356370"),
        ("068270", "셀트리온", "00413046"),
        ("207940", "삼성바이오로직스", "00877059"),
        ("323410", "카카오뱅크", "01133217"),
        ("035720", "카카오", "00258801"),
        ("017670", "SK텔레콤", "00159023"),
        ("015760", "한국전력", "00159193"),
        ("034020", "두산에너빌리티", "00159616"),
    ];

    SEED.iter()
        .map(|(stock_code, company_name, dart_code)| CorporateCodeMapping {
            stock_code: stock_code.to_string(),
            company_name: company_name.to_string(),
            dart_code: dart_code.to_string(),
        })
        .collect()
}

/// Try each source in order; the first that loads wins
pub async fn resolve_corpus(sources: &[Box<dyn CorpusSource>]) -> Result<ResolvedCorpus> {
    for source in sources {
        match source.load().await {
            Ok(mappings) => {
                info!("📦 Corpus supplied by {} ({})", source.describe(), source.provenance());
                return Ok(ResolvedCorpus {
                    provenance: source.provenance(),
                    mappings,
                });
            }
            Err(e) => warn!("{} unavailable, falling back: {}", source.describe(), e),
        }
    }

    Err(SyncError::upstream("corp_code", "every corpus source failed"))
}

/// DART corp-code corpus -> `dart_codes` table
pub struct CorpCodePipeline {
    credentials: Arc<dyn CredentialResolver>,
    dart: DartClient,
    archive: Arc<dyn ArchiveStore>,
    bucket: String,
    cache_paths: Vec<PathBuf>,
    store: ReferenceStore,
    refresh_lock: Mutex<()>,
}

impl CorpCodePipeline {
    pub fn new(
        credentials: Arc<dyn CredentialResolver>,
        dart: DartClient,
        archive: Arc<dyn ArchiveStore>,
        bucket: String,
        cache_paths: Vec<PathBuf>,
        store: ReferenceStore,
    ) -> Self {
        Self {
            credentials,
            dart,
            archive,
            bucket,
            cache_paths,
            store,
            refresh_lock: Mutex::new(()),
        }
    }

    /// Live first, then every cached path in declared order, then the seed
    pub fn sources(&self, api_key: String) -> Vec<Box<dyn CorpusSource>> {
        let mut sources: Vec<Box<dyn CorpusSource>> = Vec::with_capacity(self.cache_paths.len() + 2);
        sources.push(Box::new(LiveCorpusSource::new(
            self.dart.clone(),
            api_key,
            Arc::clone(&self.archive),
            self.bucket.clone(),
        )));
        for path in &self.cache_paths {
            sources.push(Box::new(CachedFileSource::new(path.clone())));
        }
        sources.push(Box::new(SeedSource));
        sources
    }

    pub async fn run(&self) -> PipelineResponse<CorpCodesRefreshed> {
        into_response("corp-code", self.refresh().await)
    }

    pub async fn refresh(&self) -> Result<CorpCodesRefreshed> {
        let _guard = self.refresh_lock.lock().await;
        info!("🚀 Starting DART codes update...");

        let api_key = self.credentials.get_key(CredentialCategory::Dart).await?;
        debug!("DART API key loaded");

        let ResolvedCorpus { provenance, mappings } = resolve_corpus(&self.sources(api_key)).await?;

        if mappings.is_empty() {
            return Err(SyncError::EmptyDataset(format!(
                "no listed companies found in {} corpus",
                provenance
            )));
        }
        info!("Total companies parsed: {}", mappings.len());

        let stored = self.store.replace_corp_codes(&mappings).await?;

        info!("✅ DART codes update completed successfully ({})", provenance);
        Ok(CorpCodesRefreshed {
            success: true,
            message: format!("{} companies updated successfully", stored),
            total_companies: stored,
            sample_companies: mappings
                .iter()
                .take(SAMPLE_SIZE)
                .map(|m| m.company_name.clone())
                .collect(),
            source: provenance,
            updated_at: Utc::now(),
        })
    }
}
