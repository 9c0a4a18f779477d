//! Access Boundary: long-lived, least-privilege credentials for query
//! consumers.
//!
//! A grant allows catalog reads, query execution in one workgroup,
//! read/write in the consumer's own results area and reads of the output
//! zone. Writes to the landing and output zones are denied explicitly so no
//! later policy can widen them.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use base64::Engine as _;
use rand::Rng;
use sha2::{Digest, Sha256};

use strata_core::arn::{self, ArnScope};
use strata_core::audit::{emit_with, AuditAction, AuditEvent, AuditSink};
use strata_core::guarded::Authorizer;
use strata_core::observability::Redacted;
use strata_core::policy::{
    actions, ExecutionIdentity, PolicyDocument, PolicyStatement, PrincipalKind, ResourcePattern,
};
use strata_core::Error as CoreError;

use crate::error::Result;
use crate::workgroup::ResultsLocation;

const KEY_ID_PREFIX: &str = "AKIA";
const KEY_ID_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ234567";
const KEY_ID_LEN: usize = 16;
const SECRET_BYTES: usize = 30;

/// An access-key pair. The secret is only readable through
/// [`AccessKey::secret`] and never printed.
#[derive(Clone)]
pub struct AccessKey {
    access_key_id: String,
    secret_access_key: Redacted<String>,
}

impl AccessKey {
    fn generate() -> Self {
        let mut rng = rand::thread_rng();
        let id: String = (0..KEY_ID_LEN)
            .map(|_| char::from(KEY_ID_ALPHABET[rng.gen_range(0..KEY_ID_ALPHABET.len())]))
            .collect();
        let mut secret = [0u8; SECRET_BYTES];
        rng.fill(&mut secret[..]);
        Self {
            access_key_id: format!("{KEY_ID_PREFIX}{id}"),
            secret_access_key: Redacted::new(
                base64::engine::general_purpose::STANDARD.encode(secret),
            ),
        }
    }

    /// Public key identifier.
    #[must_use]
    pub fn access_key_id(&self) -> &str {
        &self.access_key_id
    }

    /// The secret. Shown to the consumer once at issuance.
    #[must_use]
    pub fn secret(&self) -> &str {
        self.secret_access_key.expose()
    }
}

impl fmt::Debug for AccessKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessKey")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &self.secret_access_key)
            .finish()
    }
}

/// What a consumer receives from [`AccessBoundary::issue`].
#[derive(Debug, Clone)]
pub struct AccessGrant {
    /// Consumer name.
    pub consumer: String,
    /// Credential pair.
    pub credential: AccessKey,
    /// Identity the credential acts as.
    pub identity: Arc<ExecutionIdentity>,
    /// Workgroup the consumer may query in.
    pub workgroup: String,
    /// The consumer's results area.
    pub results: ResultsLocation,
}

/// Zones and workgroup an access boundary is drawn around.
#[derive(Debug, Clone)]
pub struct BoundaryScope {
    /// Region/account of catalog and workgroup ARNs.
    pub arns: ArnScope,
    /// Workgroup consumers query in.
    pub workgroup: String,
    /// Where the workgroup writes results.
    pub results: ResultsLocation,
    /// Output zone bucket (read-only for consumers).
    pub output_bucket: String,
    /// Landing zone bucket (no access for consumers).
    pub landing_bucket: String,
}

impl BoundaryScope {
    /// The policy attached to a consumer's identity.
    #[must_use]
    pub fn policy(&self, policy_name: &str, consumer: &str) -> PolicyDocument {
        let s = self;
        let own_results = s.results.consumer_prefix(consumer);
        PolicyDocument::builder(policy_name)
            .statement(PolicyStatement::allow(
                "QueryExecute",
                [
                    actions::QUERY_START_QUERY_EXECUTION,
                    actions::QUERY_STOP_QUERY_EXECUTION,
                    actions::QUERY_GET_QUERY_EXECUTION,
                    actions::QUERY_GET_QUERY_RESULTS,
                    actions::QUERY_GET_WORK_GROUP,
                ],
                [s.arns.query_workgroup(&s.workgroup)],
            ))
            .statement(PolicyStatement::allow(
                "QueryDiscovery",
                [
                    actions::QUERY_LIST_WORK_GROUPS,
                    actions::QUERY_LIST_DATA_CATALOGS,
                    actions::QUERY_GET_DATA_CATALOG,
                    actions::QUERY_LIST_DATABASES,
                    actions::QUERY_GET_DATABASE,
                    actions::QUERY_LIST_TABLE_METADATA,
                    actions::QUERY_GET_TABLE_METADATA,
                ],
                [ResourcePattern::any()],
            ))
            .statement(PolicyStatement::allow(
                "CatalogRead",
                [
                    actions::CATALOG_GET_DATABASE,
                    actions::CATALOG_GET_DATABASES,
                    actions::CATALOG_GET_TABLE,
                    actions::CATALOG_GET_TABLES,
                    actions::CATALOG_GET_PARTITION,
                    actions::CATALOG_GET_PARTITIONS,
                    actions::CATALOG_BATCH_GET_PARTITION,
                ],
                [
                    s.arns.catalog(),
                    s.arns.catalog_database("*"),
                    s.arns.catalog_table("*", "*"),
                ],
            ))
            .statement(PolicyStatement::allow(
                "ResultsBucket",
                [actions::STORAGE_GET_BUCKET_LOCATION],
                [arn::storage_bucket(&s.results.bucket)],
            ))
            .statement(
                PolicyStatement::allow(
                    "ListOwnResults",
                    [
                        actions::STORAGE_LIST_BUCKET,
                        actions::STORAGE_LIST_BUCKET_MULTIPART_UPLOADS,
                    ],
                    [arn::storage_bucket(&s.results.bucket)],
                )
                .with_prefix_condition([format!("{own_results}*")]),
            )
            .statement(PolicyStatement::allow(
                "OwnResults",
                [
                    actions::STORAGE_GET_OBJECT,
                    actions::STORAGE_PUT_OBJECT,
                    actions::STORAGE_LIST_MULTIPART_UPLOAD_PARTS,
                    actions::STORAGE_ABORT_MULTIPART_UPLOAD,
                ],
                [arn::storage_objects(&s.results.bucket, &own_results)],
            ))
            .statement(PolicyStatement::allow(
                "OutputReadOnly",
                [actions::STORAGE_GET_OBJECT, actions::STORAGE_LIST_BUCKET],
                [
                    arn::storage_bucket(&s.output_bucket),
                    arn::storage_objects(&s.output_bucket, ""),
                ],
            ))
            .statement(PolicyStatement::deny(
                "DenyDataZoneWrites",
                [actions::STORAGE_PUT_OBJECT, actions::STORAGE_DELETE_OBJECT],
                [
                    arn::storage_objects(&s.landing_bucket, ""),
                    arn::storage_objects(&s.output_bucket, ""),
                ],
            ))
            .build()
    }
}

#[derive(Debug)]
struct IssuedKey {
    secret_digest: SecretDigest,
    identity: Arc<ExecutionIdentity>,
}

/// Issues and verifies consumer credentials.
pub struct AccessBoundary {
    scope: BoundaryScope,
    audit: Arc<dyn AuditSink>,
    issued: Mutex<HashMap<String, IssuedKey>>,
}

impl fmt::Debug for AccessBoundary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessBoundary")
            .field("scope", &self.scope)
            .finish_non_exhaustive()
    }
}

impl AccessBoundary {
    /// Creates a boundary.
    #[must_use]
    pub fn new(scope: BoundaryScope, audit: Arc<dyn AuditSink>) -> Self {
        Self {
            scope,
            audit,
            issued: Mutex::new(HashMap::new()),
        }
    }

    /// The zones and workgroup this boundary covers.
    #[must_use]
    pub fn scope(&self) -> &BoundaryScope {
        &self.scope
    }

    /// Issues a credential for `consumer`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` if the consumer name could escape its results
    /// area (empty, or containing anything but ASCII alphanumerics, `-`,
    /// `_` and `.`).
    pub async fn issue(&self, consumer: &str, policy_name: &str) -> Result<AccessGrant> {
        validate_consumer(consumer)?;
        let identity = Arc::new(ExecutionIdentity::new(
            consumer,
            self.scope.arns.user(consumer),
            PrincipalKind::User,
            vec![self.scope.policy(policy_name, consumer)],
        ));
        let credential = AccessKey::generate();
        self.issued_keys().insert(
            credential.access_key_id.clone(),
            IssuedKey {
                secret_digest: digest(credential.secret()),
                identity: Arc::clone(&identity),
            },
        );

        tracing::info!(
            consumer,
            access_key_id = credential.access_key_id(),
            workgroup = %self.scope.workgroup,
            "issued access credential"
        );
        emit_with(
            self.audit.as_ref(),
            AuditEvent::builder()
                .action(AuditAction::CredentialIssued)
                .actor(identity.actor())
                .resource(identity.arn())
                .decision_reason(format!("access_key_id={}", credential.access_key_id())),
        )
        .await;

        Ok(AccessGrant {
            consumer: consumer.to_string(),
            credential,
            identity,
            workgroup: self.scope.workgroup.clone(),
            results: ResultsLocation {
                bucket: self.scope.results.bucket.clone(),
                prefix: self.scope.results.consumer_prefix(consumer),
            },
        })
    }

    /// Exchanges a key pair for an authorizer acting as its identity.
    ///
    /// # Errors
    ///
    /// Returns `AccessDenied` for an unknown key or a wrong secret.
    pub fn authenticate(&self, access_key_id: &str, secret: &str) -> Result<Authorizer> {
        let issued = self.issued_keys();
        match issued.get(access_key_id) {
            Some(key) if digests_match(&key.secret_digest, &digest(secret)) => Ok(Authorizer::new(
                Arc::clone(&key.identity),
                Arc::clone(&self.audit),
            )),
            _ => {
                tracing::warn!(access_key_id, "rejected access credential");
                Err(CoreError::AccessDenied {
                    principal: access_key_id.to_string(),
                    action: "identity:Authenticate".to_string(),
                    resource: self.scope.arns.query_workgroup(&self.scope.workgroup),
                }
                .into())
            }
        }
    }

    /// Revokes a key; returns false if it was unknown.
    pub fn revoke(&self, access_key_id: &str) -> bool {
        self.issued_keys().remove(access_key_id).is_some()
    }

    fn issued_keys(&self) -> std::sync::MutexGuard<'_, HashMap<String, IssuedKey>> {
        self.issued.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

type SecretDigest = [u8; 32];

fn digest(secret: &str) -> SecretDigest {
    Sha256::digest(secret.as_bytes()).into()
}

/// Compares every byte; the time taken does not depend on where the
/// digests first differ.
fn digests_match(a: &SecretDigest, b: &SecretDigest) -> bool {
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

fn validate_consumer(consumer: &str) -> Result<()> {
    let valid = !consumer.is_empty()
        && !consumer.starts_with('.')
        && consumer
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(CoreError::InvalidInput(format!("invalid consumer name: {consumer:?}")).into())
    }
}
