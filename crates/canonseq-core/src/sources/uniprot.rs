//! UniProtKB REST adapter (authority B and canonical reference).

use super::{CanonicalReference, ProteinAuthority, ProteinRecord, RefSeqXref};
use crate::config::{ApiSettings, NetworkConfig, Services};
use crate::error::Result;
use crate::models::GeneIdentity;
use crate::network::{build_url, HttpClient, RateLimiters};
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use tracing::debug;

const SEARCH_FIELDS: &str = "accession,gene_names,protein_name,xref_geneid";
const CANONICAL_FIELDS: &str = "accession,gene_primary,xref_geneid,xref_refseq";

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<RawEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEntry {
    primary_accession: String,
    #[serde(default)]
    genes: Vec<RawGene>,
    protein_description: Option<RawProteinDescription>,
    #[serde(default, rename = "uniProtKBCrossReferences")]
    cross_references: Vec<RawXref>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawGene {
    gene_name: Option<RawValue>,
    #[serde(default)]
    synonyms: Vec<RawValue>,
}

#[derive(Deserialize)]
struct RawValue {
    value: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawProteinDescription {
    recommended_name: Option<RawName>,
    #[serde(default)]
    submission_names: Vec<RawName>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawName {
    full_name: RawValue,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawXref {
    database: String,
    id: String,
    #[serde(default)]
    properties: Vec<RawProperty>,
    isoform_id: Option<String>,
}

#[derive(Deserialize)]
struct RawProperty {
    key: String,
    value: String,
}

impl From<RawEntry> for ProteinRecord {
    fn from(entry: RawEntry) -> Self {
        let (primary_name, synonyms) = match entry.genes.into_iter().next() {
            Some(gene) => (
                gene.gene_name.map(|n| n.value).unwrap_or_default(),
                gene.synonyms.into_iter().map(|s| s.value).collect(),
            ),
            None => (String::new(), Vec::new()),
        };

        let protein_name = entry
            .protein_description
            .and_then(|d| {
                d.recommended_name
                    .or_else(|| d.submission_names.into_iter().next())
            })
            .map(|n| n.full_name.value)
            .unwrap_or_default();

        let mut gene_ids = Vec::new();
        let mut refseq = Vec::new();
        for xref in entry.cross_references {
            match xref.database.as_str() {
                "GeneID" => gene_ids.push(xref.id),
                "RefSeq" => {
                    let nucleotide = xref
                        .properties
                        .into_iter()
                        .find(|p| p.key == "NucleotideSequenceId")
                        .map(|p| p.value);
                    refseq.push(RefSeqXref {
                        protein: xref.id,
                        nucleotide,
                        isoform: xref.isoform_id,
                    });
                }
                _ => {}
            }
        }

        ProteinRecord {
            accession: entry.primary_accession,
            primary_name,
            synonyms,
            protein_name,
            gene_ids,
            refseq,
        }
    }
}

/// Parse a UniProtKB search JSON body.
pub fn parse_uniprot_search(body: &str) -> Result<Vec<ProteinRecord>> {
    let response: SearchResponse = serde_json::from_str(body)?;
    Ok(response.results.into_iter().map(ProteinRecord::from).collect())
}

/// Nucleotide accession of the RefSeq cross-reference on the canonical isoform.
///
/// UniProt's canonical isoform is `{accession}-1`. Entries with a single
/// isoform carry no isoform id, in which case the first RefSeq nucleotide
/// cross-reference is used.
pub fn canonical_refseq(record: &ProteinRecord) -> Option<String> {
    let canonical_isoform = format!("{}-1", record.accession);
    let with_nucleotide = || record.refseq.iter().filter(|x| x.nucleotide.is_some());

    with_nucleotide()
        .find(|x| x.isoform.as_deref() == Some(canonical_isoform.as_str()))
        .or_else(|| with_nucleotide().find(|x| x.isoform.is_none()))
        .and_then(|x| x.nucleotide.clone())
}

/// Strip characters that would break the query syntax and quote multi-word terms.
fn query_term(term: &str) -> String {
    let cleaned: String = term
        .chars()
        .filter(|c| !matches!(c, '"' | '(' | ')' | ':'))
        .collect();
    if cleaned.contains(char::is_whitespace) {
        format!("\"{}\"", cleaned)
    } else {
        cleaned
    }
}

/// UniProtKB REST client, restricted to reviewed human entries.
#[derive(Debug, Clone)]
pub struct UniProtClient {
    http: HttpClient,
    limiters: Arc<RateLimiters>,
    base_url: String,
}

impl UniProtClient {
    pub fn new(http: HttpClient, limiters: Arc<RateLimiters>, settings: &ApiSettings) -> Self {
        Self {
            http,
            limiters,
            base_url: settings.uniprot_base_url.clone(),
        }
    }

    async fn query(&self, query: &str, fields: &str, size: u32) -> Result<Vec<ProteinRecord>> {
        let size = size.to_string();
        let url = build_url(
            &self.base_url,
            "search",
            &[
                ("query", query),
                ("format", "json"),
                ("fields", fields),
                ("size", size.as_str()),
            ],
        );

        self.limiters.acquire(Services::UNIPROT).await;
        let body = self.http.get_text(&url).await?;
        parse_uniprot_search(&body)
    }

    fn human_reviewed(clause: &str) -> String {
        format!(
            "{} AND organism_id:{} AND reviewed:true",
            clause,
            NetworkConfig::HUMAN_TAXON_ID
        )
    }
}

#[async_trait]
impl ProteinAuthority for UniProtClient {
    async fn search(&self, term: &str) -> Result<Vec<ProteinRecord>> {
        let term = query_term(term);
        let query = Self::human_reviewed(&format!("(gene:{t} OR gene_exact:{t})", t = term));
        let records = self
            .query(&query, SEARCH_FIELDS, NetworkConfig::UNIPROT_SEARCH_SIZE)
            .await?;
        debug!("UniProt search {:?} returned {} entries", term, records.len());
        Ok(records)
    }

    async fn fetch_details(&self, accessions: &[String]) -> Result<Vec<ProteinRecord>> {
        if accessions.is_empty() {
            return Ok(Vec::new());
        }
        let clause = accessions
            .iter()
            .map(|a| format!("accession:{}", query_term(a)))
            .collect::<Vec<_>>()
            .join(" OR ");
        self.query(&format!("({})", clause), SEARCH_FIELDS, accessions.len() as u32)
            .await
    }
}

#[async_trait]
impl CanonicalReference for UniProtClient {
    async fn canonical_transcript(&self, identity: &GeneIdentity) -> Result<Option<String>> {
        let query = Self::human_reviewed(&format!(
            "gene_exact:{}",
            query_term(&identity.official_symbol)
        ));
        let records = self.query(&query, CANONICAL_FIELDS, 5).await?;

        let entry = records
            .iter()
            .find(|r| r.gene_ids.contains(&identity.stable_id))
            .or_else(|| records.first());

        let canonical = entry.and_then(canonical_refseq);
        debug!(
            "UniProt canonical transcript for {}: {:?}",
            identity.official_symbol, canonical
        );
        Ok(canonical)
    }
}
