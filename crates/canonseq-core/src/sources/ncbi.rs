//! NCBI E-utilities adapter (authority A).

use super::{GeneAuthority, GeneRecord};
use crate::config::{ApiSettings, NetworkConfig, Services};
use crate::error::{CanonError, Result};
use crate::network::{build_url, HttpClient, RateLimiters};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// Shared E-utilities plumbing: credentials, rate limiting, URL building.
#[derive(Debug, Clone)]
pub struct EUtils {
    http: HttpClient,
    limiters: Arc<RateLimiters>,
    base_url: String,
    api_key: Option<String>,
    email: Option<String>,
}

impl EUtils {
    pub fn new(http: HttpClient, limiters: Arc<RateLimiters>, settings: &ApiSettings) -> Self {
        Self {
            http,
            limiters,
            base_url: settings.ncbi_base_url.clone(),
            api_key: settings.ncbi_api_key.clone(),
            email: settings.email.clone(),
        }
    }

    fn url(&self, endpoint: &str, params: &[(&str, &str)]) -> String {
        let mut all: Vec<(&str, &str)> = params.to_vec();
        all.push(("tool", "canonseq"));
        if let Some(key) = &self.api_key {
            all.push(("api_key", key.as_str()));
        }
        if let Some(email) = &self.email {
            all.push(("email", email.as_str()));
        }
        build_url(&self.base_url, endpoint, &all)
    }

    /// Run esearch and return the id list.
    ///
    /// `idtype = Some("acc")` returns versioned accessions for sequence databases.
    pub async fn esearch(
        &self,
        db: &str,
        term: &str,
        retmax: u32,
        idtype: Option<&str>,
    ) -> Result<Vec<String>> {
        let retmax = retmax.to_string();
        let mut params = vec![
            ("db", db),
            ("term", term),
            ("retmax", retmax.as_str()),
            ("retmode", "json"),
        ];
        if let Some(idtype) = idtype {
            params.push(("idtype", idtype));
        }
        let url = self.url("esearch.fcgi", &params);

        self.limiters.acquire(Services::NCBI).await;
        let body = self.http.get_text(&url).await?;
        parse_esearch(&body)
    }

    /// Run esummary and return the raw JSON body.
    pub async fn esummary(&self, db: &str, ids: &[String]) -> Result<String> {
        let ids = ids.join(",");
        let url = self.url(
            "esummary.fcgi",
            &[("db", db), ("id", ids.as_str()), ("retmode", "json")],
        );

        self.limiters.acquire(Services::NCBI).await;
        self.http.get_text(&url).await
    }

    /// Run efetch and return the raw text body.
    pub async fn efetch(&self, db: &str, ids: &[String], rettype: &str) -> Result<String> {
        let ids = ids.join(",");
        let url = self.url(
            "efetch.fcgi",
            &[
                ("db", db),
                ("id", ids.as_str()),
                ("rettype", rettype),
                ("retmode", "text"),
            ],
        );

        self.limiters.acquire(Services::NCBI).await;
        self.http.get_text(&url).await
    }
}

#[derive(Deserialize)]
struct ESearchResponse {
    esearchresult: ESearchResult,
}

#[derive(Deserialize)]
struct ESearchResult {
    #[serde(default)]
    idlist: Vec<String>,
    #[serde(rename = "ERROR")]
    error: Option<String>,
}

/// Parse an esearch JSON body into its id list.
pub fn parse_esearch(body: &str) -> Result<Vec<String>> {
    let response: ESearchResponse = serde_json::from_str(body)?;
    let result = response.esearchresult;
    if let Some(error) = result.error {
        if result.idlist.is_empty() {
            return Err(CanonError::Other(format!("esearch failed: {}", error)));
        }
        warn!("esearch reported an error alongside results: {}", error);
    }
    Ok(result.idlist)
}

#[derive(Deserialize)]
struct RawGeneSummary {
    #[serde(default)]
    uid: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    otheraliases: String,
    error: Option<String>,
}

/// Parse a gene esummary JSON body, keeping the order of the `uids` list.
pub fn parse_gene_summaries(body: &str) -> Result<Vec<GeneRecord>> {
    let value: serde_json::Value = serde_json::from_str(body)?;
    let Some(result) = value.get("result") else {
        return Ok(Vec::new());
    };

    let uids: Vec<String> = result
        .get("uids")
        .and_then(|u| u.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let mut records = Vec::with_capacity(uids.len());
    for uid in uids {
        let Some(raw) = result.get(&uid) else {
            continue;
        };
        let raw: RawGeneSummary = serde_json::from_value(raw.clone())?;
        if let Some(error) = raw.error {
            debug!("Skipping gene {}: {}", uid, error);
            continue;
        }
        if raw.name.is_empty() {
            continue;
        }

        let aliases = raw
            .otheraliases
            .split(',')
            .map(str::trim)
            .filter(|a| !a.is_empty())
            .map(str::to_string)
            .collect();

        records.push(GeneRecord {
            gene_id: if raw.uid.is_empty() { uid } else { raw.uid },
            symbol: raw.name,
            description: raw.description,
            aliases,
        });
    }
    Ok(records)
}

/// NCBI Gene client.
#[derive(Debug, Clone)]
pub struct NcbiGeneClient {
    eutils: EUtils,
}

impl NcbiGeneClient {
    pub fn new(eutils: EUtils) -> Self {
        Self { eutils }
    }

    fn search_term(term: &str) -> String {
        let term = term.replace('"', "");
        format!(
            "\"{t}\"[Gene Name] OR \"{t}\"[All Fields] AND human[organism]",
            t = term
        )
    }
}

#[async_trait]
impl GeneAuthority for NcbiGeneClient {
    async fn search(&self, term: &str) -> Result<Vec<String>> {
        let ids = self
            .eutils
            .esearch(
                "gene",
                &Self::search_term(term),
                NetworkConfig::NCBI_SEARCH_RETMAX,
                None,
            )
            .await?;
        debug!("NCBI Gene search {:?} returned {} ids", term, ids.len());
        Ok(ids)
    }

    async fn fetch_details(&self, ids: &[String]) -> Result<Vec<GeneRecord>> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }
        let body = self.eutils.esummary("gene", ids).await?;
        parse_gene_summaries(&body)
    }
}
