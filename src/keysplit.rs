//! Policy driven key splitting
//!
//! Attribute values are grouped into one clause per attribute definition.
//! Each clause reduces to one or more disjunctions of key access server URLs
//! and every disjunction becomes an independent XOR share of the data
//! encryption key:
//!
//! - `anyOf`: one disjunction holding every custodian of every value, so any
//!   one of them can release the share
//! - `allOf` (and unspecified): one single-custodian disjunction per
//!   custodian, so all of them are needed
//! - `hierarchy`: only the highest ranked supplied value's custodians
//!
//! With no clauses at all the default KAS receives the whole key.

use crate::crypto::KEY_SIZE;
use crate::policy::{AttributeDefinition, AttributeRule, AttributeValue, FqnError, Grant, KasPublicKey};
use rand::{rngs::OsRng, RngCore};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;
use zeroize::Zeroizing;

#[derive(Debug, Error)]
pub enum SplitError {
    #[error("DEK cannot be empty")]
    EmptyDek,

    #[error("invalid DEK length: expected {expected}, got {got}")]
    InvalidDek { expected: usize, got: usize },

    #[error("no default KAS configured and no attribute grants found")]
    NoDefaultKas,

    #[error("invalid attribute FQN: {0}")]
    InvalidAttribute(#[from] FqnError),
}

/// Values sharing one attribute definition
#[derive(Debug, Clone)]
pub struct AttributeClause {
    pub definition: AttributeDefinition,
    pub values: Vec<AttributeValue>,
}

impl AttributeClause {
    pub fn rule(&self) -> AttributeRule {
        self.definition.rule
    }

    /// Custodian disjunctions this clause contributes
    fn disjunctions(&self) -> Vec<Vec<String>> {
        match self.rule() {
            AttributeRule::AnyOf => {
                let terms = sorted_no_dupes(self.values.iter().flat_map(|v| v.effective_grants()));
                if terms.is_empty() {
                    Vec::new()
                } else {
                    vec![terms]
                }
            }
            AttributeRule::Hierarchy => {
                let highest = self
                    .values
                    .iter()
                    .min_by_key(|v| self.definition.rank_of(&v.fqn).unwrap_or(usize::MAX));
                match highest {
                    Some(value) => {
                        let terms = sorted_no_dupes(value.effective_grants());
                        if terms.is_empty() {
                            Vec::new()
                        } else {
                            vec![terms]
                        }
                    }
                    None => Vec::new(),
                }
            }
            AttributeRule::AllOf | AttributeRule::Unspecified => {
                sorted_no_dupes(self.values.iter().flat_map(|v| v.effective_grants()))
                    .into_iter()
                    .map(|kas| vec![kas])
                    .collect()
            }
        }
    }
}

impl std::fmt::Display for AttributeClause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.values.as_slice() {
            [] => f.write_str(&self.definition.fqn),
            [single] => f.write_str(&single.fqn),
            values => {
                let names: Vec<String> = values.iter().map(AttributeValue::value_name).collect();
                write!(
                    f,
                    "{}({}: {{{}}})",
                    self.rule(),
                    self.definition.fqn,
                    names.join(", ")
                )
            }
        }
    }
}

/// Conjunction of attribute clauses, ordered by definition FQN
#[derive(Debug, Clone, Default)]
pub struct BooleanExpression {
    pub clauses: Vec<AttributeClause>,
}

impl BooleanExpression {
    /// Reduce to a conjunction of distinct custodian disjunctions
    pub fn reduce(&self) -> Vec<Vec<String>> {
        let mut conjunction: Vec<Vec<String>> = Vec::new();
        for clause in &self.clauses {
            for terms in clause.disjunctions() {
                if !conjunction.contains(&terms) {
                    conjunction.push(terms);
                }
            }
        }
        conjunction
    }
}

impl std::fmt::Display for BooleanExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.clauses.is_empty() {
            return f.write_str("∅");
        }
        for (i, clause) in self.clauses.iter().enumerate() {
            if i > 0 {
                f.write_str(" ∧ ")?;
            }
            write!(f, "{}", clause)?;
        }
        Ok(())
    }
}

/// Group values by attribute definition
///
/// Definitions are compared case-insensitively and emitted in sorted order,
/// so the result does not depend on input order.
pub fn build_boolean_expression(values: &[AttributeValue]) -> Result<BooleanExpression, SplitError> {
    let mut by_definition: BTreeMap<String, AttributeClause> = BTreeMap::new();
    for value in values {
        crate::policy::validate_attribute_fqn(&value.fqn)?;
        by_definition
            .entry(value.definition.fqn.to_lowercase())
            .or_insert_with(|| AttributeClause {
                definition: value.definition.clone(),
                values: Vec::new(),
            })
            .values
            .push(value.clone());
    }
    Ok(BooleanExpression {
        clauses: by_definition.into_values().collect(),
    })
}

fn sorted_no_dupes<'a>(grants: impl IntoIterator<Item = &'a Grant>) -> Vec<String> {
    let mut urls: Vec<String> = grants
        .into_iter()
        .filter(|g| !g.uri.is_empty())
        .map(|g| g.uri.clone())
        .collect();
    urls.sort();
    urls.dedup();
    urls
}

/// One XOR share of the data encryption key
#[derive(Clone)]
pub struct Split {
    pub id: String,
    pub data: Zeroizing<Vec<u8>>,
    /// Key access servers that may each unwrap this exact share
    pub kas_urls: Vec<String>,
}

impl std::fmt::Debug for Split {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Split")
            .field("id", &self.id)
            .field("data", &"[REDACTED]")
            .field("kas_urls", &self.kas_urls)
            .finish()
    }
}

/// Splits plus the public keys known for their key access servers
#[derive(Debug, Clone, Default)]
pub struct SplitResult {
    pub splits: Vec<Split>,
    pub kas_public_keys: BTreeMap<String, KasPublicKey>,
}

/// XOR secret sharing over policy derived custodian sets
#[derive(Debug, Clone, Default)]
pub struct XorSplitter {
    default_kas: Option<Grant>,
}

impl XorSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Custodian used when the policy yields no grants; its key also fills
    /// in URI-only grants for the same URL
    #[must_use]
    pub fn with_default_kas(mut self, default_kas: Option<Grant>) -> Self {
        self.default_kas = default_kas;
        self
    }

    pub fn generate_splits(
        &self,
        values: &[AttributeValue],
        dek: &[u8],
    ) -> Result<SplitResult, SplitError> {
        if dek.is_empty() {
            return Err(SplitError::EmptyDek);
        }
        if dek.len() != KEY_SIZE {
            return Err(SplitError::InvalidDek {
                expected: KEY_SIZE,
                got: dek.len(),
            });
        }

        let expression = build_boolean_expression(values)?;
        let mut conjunction = expression.reduce();
        if conjunction.is_empty() {
            let default = self.default_kas.as_ref().ok_or(SplitError::NoDefaultKas)?;
            conjunction.push(vec![default.uri.clone()]);
        }

        let mut kas_public_keys = BTreeMap::new();
        for grant in values.iter().flat_map(|v| v.effective_grants()) {
            if let Some(key) = &grant.public_key {
                kas_public_keys
                    .entry(grant.uri.clone())
                    .or_insert_with(|| key.clone());
            }
        }
        if let Some(Grant {
            uri,
            public_key: Some(key),
        }) = &self.default_kas
        {
            let referenced = conjunction.iter().any(|d| d.contains(uri));
            if referenced {
                kas_public_keys.entry(uri.clone()).or_insert_with(|| key.clone());
            }
        }

        let shares = xor_split(dek, conjunction.len());
        let splits: Vec<Split> = shares
            .into_iter()
            .zip(conjunction)
            .map(|(data, kas_urls)| Split {
                id: Uuid::new_v4().to_string(),
                data,
                kas_urls,
            })
            .collect();

        debug!(
            expression = %expression,
            splits = splits.len(),
            known_keys = kas_public_keys.len(),
            "generated key splits"
        );

        Ok(SplitResult {
            splits,
            kas_public_keys,
        })
    }
}

/// `n` shares whose XOR is `dek`; a single share is the key itself
fn xor_split(dek: &[u8], n: usize) -> Vec<Zeroizing<Vec<u8>>> {
    if n <= 1 {
        return vec![Zeroizing::new(dek.to_vec())];
    }
    let mut last = Zeroizing::new(dek.to_vec());
    let mut shares = Vec::with_capacity(n);
    for _ in 0..n - 1 {
        let mut share = Zeroizing::new(vec![0u8; dek.len()]);
        OsRng.fill_bytes(&mut share);
        for (acc, b) in last.iter_mut().zip(share.iter()) {
            *acc ^= b;
        }
        shares.push(share);
    }
    shares.push(last);
    shares
}
