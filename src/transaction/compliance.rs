//! Compliance Gate
//!
//! Required-document checks. A rule names a document tag that must be present
//! for a model; it is satisfied by any document with that tag on the record
//! that is either verified or explicitly overridden. Overrides always carry a
//! reason and the identity that authorized them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use super::adapters::ComplianceSource;
use super::error::TransactionError;
use super::types::{Actor, ComplianceContext};

/// Required-document rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRule {
    pub tag_code: String,
    /// Model the rule applies to (e.g. `transaction`)
    pub model: String,
    pub required_for_close: bool,
    pub active: bool,
}

impl DocumentRule {
    pub fn required(tag_code: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            tag_code: tag_code.into(),
            model: model.into(),
            required_for_close: true,
            active: true,
        }
    }
}

/// Recorded exception to a document requirement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceOverride {
    pub reason: String,
    pub actor: Actor,
    pub at: DateTime<Utc>,
}

/// A tagged supporting document attached to a record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComplianceDocument {
    pub tag_code: String,
    pub verified: bool,
    pub override_record: Option<ComplianceOverride>,
}

impl ComplianceDocument {
    #[inline]
    pub fn satisfies(&self, tag_code: &str) -> bool {
        self.tag_code == tag_code && (self.verified || self.override_record.is_some())
    }
}

/// In-process rule and document registry
#[derive(Default)]
pub struct ComplianceRegistry {
    /// Keyed by (model, tag_code)
    rules: DashMap<(String, String), DocumentRule>,
    documents: DashMap<ComplianceContext, Vec<ComplianceDocument>>,
}

impl ComplianceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&self, rule: DocumentRule) {
        self.rules
            .insert((rule.model.clone(), rule.tag_code.clone()), rule);
    }

    pub fn deactivate_rule(&self, model: &str, tag_code: &str) {
        if let Some(mut rule) = self
            .rules
            .get_mut(&(model.to_string(), tag_code.to_string()))
        {
            rule.active = false;
        }
    }

    /// Attach an unverified document
    pub fn attach(&self, context: &ComplianceContext, tag_code: &str) {
        self.documents
            .entry(context.clone())
            .or_default()
            .push(ComplianceDocument {
                tag_code: tag_code.to_string(),
                verified: false,
                override_record: None,
            });
    }

    /// Mark every document with `tag_code` on `context` as verified.
    /// Returns the number of documents touched.
    pub fn verify(&self, context: &ComplianceContext, tag_code: &str) -> usize {
        let Some(mut docs) = self.documents.get_mut(context) else {
            return 0;
        };
        let mut touched = 0;
        for doc in docs.iter_mut().filter(|d| d.tag_code == tag_code) {
            doc.verified = true;
            touched += 1;
        }
        touched
    }

    /// Documents currently attached to `context`
    pub fn documents(&self, context: &ComplianceContext) -> Vec<ComplianceDocument> {
        self.documents
            .get(context)
            .map(|docs| docs.clone())
            .unwrap_or_default()
    }

    /// Rule codes not yet satisfied, sorted
    pub fn missing(&self, context: &ComplianceContext) -> Vec<String> {
        let docs = self.documents(context);
        let mut missing: Vec<String> = self
            .rules
            .iter()
            .filter(|r| r.active && r.required_for_close && r.model == context.model)
            .filter(|r| !docs.iter().any(|d| d.satisfies(&r.tag_code)))
            .map(|r| r.tag_code.clone())
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }
}

#[async_trait]
impl ComplianceSource for ComplianceRegistry {
    async fn missing_compliance(&self, context: &ComplianceContext) -> Vec<String> {
        self.missing(context)
    }

    async fn record_override(
        &self,
        context: &ComplianceContext,
        tag_code: &str,
        record: ComplianceOverride,
    ) -> Result<(), TransactionError> {
        let mut docs = self.documents.entry(context.clone()).or_default();
        match docs.iter().position(|d| d.tag_code == tag_code) {
            Some(idx) => docs[idx].override_record = Some(record),
            None => docs.push(ComplianceDocument {
                tag_code: tag_code.to_string(),
                verified: false,
                override_record: Some(record),
            }),
        }
        Ok(())
    }
}

/// Read-only gate over a [`ComplianceSource`]
///
/// May be called speculatively for previews; only the call made inside the
/// close critical section is authoritative.
#[derive(Clone)]
pub struct ComplianceGate {
    source: Arc<dyn ComplianceSource>,
}

impl ComplianceGate {
    pub fn new(source: Arc<dyn ComplianceSource>) -> Self {
        Self { source }
    }

    pub async fn missing(&self, context: &ComplianceContext) -> Vec<String> {
        self.source.missing_compliance(context).await
    }

    pub async fn is_compliant(&self, context: &ComplianceContext) -> bool {
        self.missing(context).await.is_empty()
    }

    /// `Err(Compliance)` naming every missing tag
    pub async fn ensure_compliant(&self, context: &ComplianceContext) -> Result<(), TransactionError> {
        let missing = self.missing(context).await;
        if missing.is_empty() {
            Ok(())
        } else {
            Err(TransactionError::Compliance { missing })
        }
    }

    pub(crate) fn source(&self) -> &Arc<dyn ComplianceSource> {
        &self.source
    }
}
