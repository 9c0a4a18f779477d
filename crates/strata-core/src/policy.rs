//! Policy documents and execution identities.
//!
//! Every component runs under an [`ExecutionIdentity`] that carries one or
//! more immutable [`PolicyDocument`]s. A document is a list of
//! [`PolicyStatement`]s, each granting (or denying) a set of [`Action`]s on a
//! set of [`ResourcePattern`]s. A statement may carry a [`Condition`] that
//! the request's [`RequestContext`] must meet. Evaluation is default-deny and
//! an explicit deny always wins.
//!
//! ```rust
//! use strata_core::policy::{actions, PolicyDocument, PolicyStatement};
//!
//! let policy = PolicyDocument::builder("reader")
//!     .statement(PolicyStatement::allow(
//!         "ReadLake",
//!         [actions::STORAGE_GET_OBJECT],
//!         ["arn:storage:::lake/*"],
//!     ))
//!     .build();
//!
//! assert!(policy
//!     .evaluate(&actions::STORAGE_GET_OBJECT, "arn:storage:::lake/a.parquet")
//!     .is_allowed());
//! assert!(!policy
//!     .evaluate(&actions::STORAGE_PUT_OBJECT, "arn:storage:::lake/a.parquet")
//!     .is_allowed());
//! ```

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// An action a principal can perform, rendered as `service:Name`.
///
/// The name may end in `*` to cover every action with that prefix.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Action {
    service: Cow<'static, str>,
    name: Cow<'static, str>,
}

impl Action {
    /// Creates an action from static parts.
    #[must_use]
    pub const fn from_static(service: &'static str, name: &'static str) -> Self {
        Self {
            service: Cow::Borrowed(service),
            name: Cow::Borrowed(name),
        }
    }

    /// Returns the service part.
    #[must_use]
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Returns the action name part.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns true if this action (used as a pattern) covers `requested`.
    #[must_use]
    pub fn covers(&self, requested: &Self) -> bool {
        if self.service != requested.service && self.service != "*" {
            return false;
        }
        match self.name.strip_suffix('*') {
            Some(prefix) => requested.name.starts_with(prefix),
            None => self.name == requested.name,
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.service, self.name)
    }
}

impl FromStr for Action {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let (service, name) = s
            .split_once(':')
            .ok_or_else(|| Error::InvalidInput(format!("action must be service:Name: {s}")))?;
        if service.is_empty() || name.is_empty() || name.contains(':') {
            return Err(Error::InvalidInput(format!(
                "action must be service:Name: {s}"
            )));
        }
        Ok(Self {
            service: Cow::Owned(service.to_string()),
            name: Cow::Owned(name.to_string()),
        })
    }
}

impl From<Action> for String {
    fn from(action: Action) -> Self {
        action.to_string()
    }
}

impl TryFrom<String> for Action {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

/// Well-known actions.
pub mod actions {
    use super::Action;

    /// Read an object.
    pub const STORAGE_GET_OBJECT: Action = Action::from_static("storage", "GetObject");
    /// Write an object.
    pub const STORAGE_PUT_OBJECT: Action = Action::from_static("storage", "PutObject");
    /// Delete an object.
    pub const STORAGE_DELETE_OBJECT: Action = Action::from_static("storage", "DeleteObject");
    /// List keys in a bucket.
    pub const STORAGE_LIST_BUCKET: Action = Action::from_static("storage", "ListBucket");
    /// Resolve a bucket's location.
    pub const STORAGE_GET_BUCKET_LOCATION: Action =
        Action::from_static("storage", "GetBucketLocation");
    /// List in-progress multipart uploads.
    pub const STORAGE_LIST_BUCKET_MULTIPART_UPLOADS: Action =
        Action::from_static("storage", "ListBucketMultipartUploads");
    /// List parts of a multipart upload.
    pub const STORAGE_LIST_MULTIPART_UPLOAD_PARTS: Action =
        Action::from_static("storage", "ListMultipartUploadParts");
    /// Abandon a multipart upload.
    pub const STORAGE_ABORT_MULTIPART_UPLOAD: Action =
        Action::from_static("storage", "AbortMultipartUpload");

    /// Describe a database.
    pub const CATALOG_GET_DATABASE: Action = Action::from_static("catalog", "GetDatabase");
    /// List databases.
    pub const CATALOG_GET_DATABASES: Action = Action::from_static("catalog", "GetDatabases");
    /// Describe a table.
    pub const CATALOG_GET_TABLE: Action = Action::from_static("catalog", "GetTable");
    /// List tables of a database.
    pub const CATALOG_GET_TABLES: Action = Action::from_static("catalog", "GetTables");
    /// Describe one partition.
    pub const CATALOG_GET_PARTITION: Action = Action::from_static("catalog", "GetPartition");
    /// List partitions of a table.
    pub const CATALOG_GET_PARTITIONS: Action = Action::from_static("catalog", "GetPartitions");
    /// Fetch several partitions by value.
    pub const CATALOG_BATCH_GET_PARTITION: Action =
        Action::from_static("catalog", "BatchGetPartition");
    /// Create a database.
    pub const CATALOG_CREATE_DATABASE: Action = Action::from_static("catalog", "CreateDatabase");
    /// Replace a database's tables.
    pub const CATALOG_UPDATE_DATABASE: Action = Action::from_static("catalog", "UpdateDatabase");
    /// Create or replace a table.
    pub const CATALOG_UPDATE_TABLE: Action = Action::from_static("catalog", "UpdateTable");
    /// Register partitions.
    pub const CATALOG_BATCH_CREATE_PARTITION: Action =
        Action::from_static("catalog", "BatchCreatePartition");
    /// Start a catalog builder job run.
    pub const CATALOG_START_JOB_RUN: Action = Action::from_static("catalog", "StartJobRun");

    /// List data catalogs visible to the query engine.
    pub const QUERY_LIST_DATA_CATALOGS: Action = Action::from_static("query", "ListDataCatalogs");
    /// Describe a data catalog.
    pub const QUERY_GET_DATA_CATALOG: Action = Action::from_static("query", "GetDataCatalog");
    /// List databases through the query engine.
    pub const QUERY_LIST_DATABASES: Action = Action::from_static("query", "ListDatabases");
    /// Describe a database through the query engine.
    pub const QUERY_GET_DATABASE: Action = Action::from_static("query", "GetDatabase");
    /// List table metadata.
    pub const QUERY_LIST_TABLE_METADATA: Action =
        Action::from_static("query", "ListTableMetadata");
    /// Describe table metadata.
    pub const QUERY_GET_TABLE_METADATA: Action = Action::from_static("query", "GetTableMetadata");
    /// List workgroups.
    pub const QUERY_LIST_WORK_GROUPS: Action = Action::from_static("query", "ListWorkGroups");
    /// Describe a workgroup.
    pub const QUERY_GET_WORK_GROUP: Action = Action::from_static("query", "GetWorkGroup");
    /// Submit a query.
    pub const QUERY_START_QUERY_EXECUTION: Action =
        Action::from_static("query", "StartQueryExecution");
    /// Cancel a query.
    pub const QUERY_STOP_QUERY_EXECUTION: Action =
        Action::from_static("query", "StopQueryExecution");
    /// Read a query's state.
    pub const QUERY_GET_QUERY_EXECUTION: Action =
        Action::from_static("query", "GetQueryExecution");
    /// Read a query's results.
    pub const QUERY_GET_QUERY_RESULTS: Action = Action::from_static("query", "GetQueryResults");

    /// Invoke a transform function.
    pub const COMPUTE_INVOKE_FUNCTION: Action = Action::from_static("compute", "InvokeFunction");

    /// Create a log group.
    pub const LOGS_CREATE_LOG_GROUP: Action = Action::from_static("logs", "CreateLogGroup");
    /// Create a log stream.
    pub const LOGS_CREATE_LOG_STREAM: Action = Action::from_static("logs", "CreateLogStream");
    /// Append log events.
    pub const LOGS_PUT_LOG_EVENTS: Action = Action::from_static("logs", "PutLogEvents");
    /// Describe log streams.
    pub const LOGS_DESCRIBE_LOG_STREAMS: Action =
        Action::from_static("logs", "DescribeLogStreams");

    /// Read metric statistics.
    pub const METRICS_GET_METRIC_STATISTICS: Action =
        Action::from_static("metrics", "GetMetricStatistics");
    /// List metrics.
    pub const METRICS_LIST_METRICS: Action = Action::from_static("metrics", "ListMetrics");

    /// Read resource tags.
    pub const NETWORK_DESCRIBE_TAGS: Action = Action::from_static("network", "DescribeTags");
    /// Attach a network interface.
    pub const NETWORK_CREATE_NETWORK_INTERFACE: Action =
        Action::from_static("network", "CreateNetworkInterface");
    /// Describe network interfaces.
    pub const NETWORK_DESCRIBE_NETWORK_INTERFACES: Action =
        Action::from_static("network", "DescribeNetworkInterfaces");
    /// Detach a network interface.
    pub const NETWORK_DELETE_NETWORK_INTERFACE: Action =
        Action::from_static("network", "DeleteNetworkInterface");

    /// Read a registry parameter.
    pub const PARAMETERS_GET_PARAMETER: Action = Action::from_static("parameters", "GetParameter");
}

/// A resource pattern; `*` matches any (possibly empty) run of characters.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourcePattern(String);

impl ResourcePattern {
    /// Creates a pattern.
    #[must_use]
    pub fn new(pattern: impl Into<String>) -> Self {
        Self(pattern.into())
    }

    /// Pattern matching every resource.
    #[must_use]
    pub fn any() -> Self {
        Self("*".into())
    }

    /// Returns the raw pattern.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if `resource` matches this pattern.
    #[must_use]
    pub fn matches(&self, resource: &str) -> bool {
        glob_match(self.0.as_bytes(), resource.as_bytes())
    }
}

impl From<&str> for ResourcePattern {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for ResourcePattern {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ResourcePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    let (mut p, mut t) = (0usize, 0usize);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        match pattern.get(p) {
            Some(b'*') => {
                backtrack = Some((p, t));
                p += 1;
            }
            Some(c) if *c == text[t] => {
                p += 1;
                t += 1;
            }
            _ => match backtrack {
                Some((star, matched)) => {
                    p = star + 1;
                    t = matched + 1;
                    backtrack = Some((star, matched + 1));
                }
                None => return false,
            },
        }
    }

    pattern[p..].iter().all(|c| *c == b'*')
}

/// Whether a statement grants or revokes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Effect {
    /// Grants the listed actions.
    Allow,
    /// Revokes the listed actions, overriding any allow.
    Deny,
}

/// One immutable grant: an effect over actions and resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyStatement {
    sid: String,
    effect: Effect,
    #[serde(rename = "Action")]
    actions: Vec<Action>,
    #[serde(rename = "Resource")]
    resources: Vec<ResourcePattern>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    condition: Option<Condition>,
}

impl PolicyStatement {
    /// Creates an allow statement.
    pub fn allow<A, R>(
        sid: impl Into<String>,
        actions: impl IntoIterator<Item = A>,
        resources: impl IntoIterator<Item = R>,
    ) -> Self
    where
        A: Into<Action>,
        R: Into<ResourcePattern>,
    {
        Self::new(sid, Effect::Allow, actions, resources)
    }

    /// Creates a deny statement.
    pub fn deny<A, R>(
        sid: impl Into<String>,
        actions: impl IntoIterator<Item = A>,
        resources: impl IntoIterator<Item = R>,
    ) -> Self
    where
        A: Into<Action>,
        R: Into<ResourcePattern>,
    {
        Self::new(sid, Effect::Deny, actions, resources)
    }

    fn new<A, R>(
        sid: impl Into<String>,
        effect: Effect,
        actions: impl IntoIterator<Item = A>,
        resources: impl IntoIterator<Item = R>,
    ) -> Self
    where
        A: Into<Action>,
        R: Into<ResourcePattern>,
    {
        Self {
            sid: sid.into(),
            effect,
            actions: actions.into_iter().map(Into::into).collect(),
            resources: resources.into_iter().map(Into::into).collect(),
            condition: None,
        }
    }

    /// Restricts the statement to listings whose prefix matches one of
    /// `patterns`.
    #[must_use]
    pub fn with_prefix_condition<P>(mut self, patterns: impl IntoIterator<Item = P>) -> Self
    where
        P: Into<ResourcePattern>,
    {
        self.condition = Some(Condition::prefix_like(patterns));
        self
    }

    /// Statement identifier.
    #[must_use]
    pub fn sid(&self) -> &str {
        &self.sid
    }

    /// Statement effect.
    #[must_use]
    pub const fn effect(&self) -> Effect {
        self.effect
    }

    /// Actions covered by this statement.
    #[must_use]
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Resources covered by this statement.
    #[must_use]
    pub fn resources(&self) -> &[ResourcePattern] {
        &self.resources
    }

    /// Condition the request must meet, if any.
    #[must_use]
    pub fn condition(&self) -> Option<&Condition> {
        self.condition.as_ref()
    }

    /// Returns true if this statement applies to the request.
    #[must_use]
    pub fn applies_to(&self, action: &Action, resource: &str, request: &RequestContext<'_>) -> bool {
        self.actions.iter().any(|a| a.covers(action))
            && self.resources.iter().any(|r| r.matches(resource))
            && self.condition.as_ref().map_or(true, |c| c.is_met(request))
    }
}

/// Attributes of a request that conditions test.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RequestContext<'a> {
    /// Key prefix of a listing request.
    pub prefix: Option<&'a str>,
}

impl<'a> RequestContext<'a> {
    /// Context of a listing under `prefix`.
    #[must_use]
    pub const fn listing(prefix: &'a str) -> Self {
        Self {
            prefix: Some(prefix),
        }
    }
}

/// A statement condition, rendered as
/// `{"StringLike": {"storage:prefix": [...]}}`.
///
/// A condition whose key is absent from the request is not met.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Condition {
    #[serde(rename = "StringLike")]
    string_like: StringLike,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct StringLike {
    #[serde(rename = "storage:prefix")]
    prefix: Vec<ResourcePattern>,
}

impl Condition {
    /// Met when the request's prefix matches one of `patterns`.
    pub fn prefix_like<P>(patterns: impl IntoIterator<Item = P>) -> Self
    where
        P: Into<ResourcePattern>,
    {
        Self {
            string_like: StringLike {
                prefix: patterns.into_iter().map(Into::into).collect(),
            },
        }
    }

    /// Prefix patterns of the condition.
    #[must_use]
    pub fn prefixes(&self) -> &[ResourcePattern] {
        &self.string_like.prefix
    }

    /// Returns true if the request meets the condition.
    #[must_use]
    pub fn is_met(&self, request: &RequestContext<'_>) -> bool {
        request
            .prefix
            .is_some_and(|prefix| self.string_like.prefix.iter().any(|p| p.matches(prefix)))
    }
}

/// Outcome of evaluating a request against policies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// An allow statement matched and no deny did.
    Allow {
        /// Statement that granted the request.
        sid: String,
    },
    /// A deny statement matched.
    ExplicitDeny {
        /// Statement that denied the request.
        sid: String,
    },
    /// No statement matched.
    ImplicitDeny,
}

impl Decision {
    /// Returns true if the request is allowed.
    #[must_use]
    pub const fn is_allowed(&self) -> bool {
        matches!(self, Self::Allow { .. })
    }

    /// Short reason code for logs and audit records.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Allow { sid } => format!("allow:{sid}"),
            Self::ExplicitDeny { sid } => format!("explicit_deny:{sid}"),
            Self::ImplicitDeny => "implicit_deny".to_string(),
        }
    }
}

/// A named, immutable list of statements.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    name: String,
    version: String,
    statement: Vec<PolicyStatement>,
}

/// Policy document version written into every document.
pub const POLICY_VERSION: &str = "2012-10-17";

impl PolicyDocument {
    /// Starts building a document.
    #[must_use]
    pub fn builder(name: impl Into<String>) -> PolicyDocumentBuilder {
        PolicyDocumentBuilder {
            name: name.into(),
            statements: Vec::new(),
        }
    }

    /// Document name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Statements in declaration order.
    #[must_use]
    pub fn statements(&self) -> &[PolicyStatement] {
        &self.statement
    }

    /// Evaluates a request against this document alone.
    #[must_use]
    pub fn evaluate(&self, action: &Action, resource: &str) -> Decision {
        self.evaluate_request(action, resource, &RequestContext::default())
    }

    /// Like [`Self::evaluate`], with request attributes for conditions.
    #[must_use]
    pub fn evaluate_request(
        &self,
        action: &Action,
        resource: &str,
        request: &RequestContext<'_>,
    ) -> Decision {
        evaluate(std::slice::from_ref(self), action, resource, request)
    }
}

/// Builder for [`PolicyDocument`]; documents cannot change once built.
#[derive(Debug)]
pub struct PolicyDocumentBuilder {
    name: String,
    statements: Vec<PolicyStatement>,
}

impl PolicyDocumentBuilder {
    /// Appends a statement.
    #[must_use]
    pub fn statement(mut self, statement: PolicyStatement) -> Self {
        self.statements.push(statement);
        self
    }

    /// Finishes the document.
    #[must_use]
    pub fn build(self) -> PolicyDocument {
        PolicyDocument {
            name: self.name,
            version: POLICY_VERSION.to_string(),
            statement: self.statements,
        }
    }
}

fn evaluate(
    documents: &[PolicyDocument],
    action: &Action,
    resource: &str,
    request: &RequestContext<'_>,
) -> Decision {
    let mut allowed_by = None;
    for statement in documents.iter().flat_map(|d| d.statement.iter()) {
        if !statement.applies_to(action, resource, request) {
            continue;
        }
        match statement.effect {
            Effect::Deny => {
                return Decision::ExplicitDeny {
                    sid: statement.sid.clone(),
                }
            }
            Effect::Allow => {
                allowed_by.get_or_insert_with(|| statement.sid.clone());
            }
        }
    }
    allowed_by.map_or(Decision::ImplicitDeny, |sid| Decision::Allow { sid })
}

/// Kind of principal an identity represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrincipalKind {
    /// A role assumed by a pipeline component.
    ServiceRole,
    /// A human or external consumer holding long-lived credentials.
    User,
}

/// A principal and the policies attached to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionIdentity {
    name: String,
    arn: String,
    kind: PrincipalKind,
    policies: Vec<PolicyDocument>,
}

impl ExecutionIdentity {
    /// Creates an identity with its attached policies.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        arn: impl Into<String>,
        kind: PrincipalKind,
        policies: Vec<PolicyDocument>,
    ) -> Self {
        Self {
            name: name.into(),
            arn: arn.into(),
            kind,
            policies,
        }
    }

    /// Identity name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Identity ARN.
    #[must_use]
    pub fn arn(&self) -> &str {
        &self.arn
    }

    /// Principal kind.
    #[must_use]
    pub const fn kind(&self) -> PrincipalKind {
        self.kind
    }

    /// Attached policies.
    #[must_use]
    pub fn policies(&self) -> &[PolicyDocument] {
        &self.policies
    }

    /// Actor string for audit records (`role:{name}` or `user:{name}`).
    #[must_use]
    pub fn actor(&self) -> String {
        match self.kind {
            PrincipalKind::ServiceRole => format!("role:{}", self.name),
            PrincipalKind::User => format!("user:{}", self.name),
        }
    }

    /// Evaluates a request against every attached policy.
    #[must_use]
    pub fn evaluate(&self, action: &Action, resource: &str) -> Decision {
        self.evaluate_request(action, resource, &RequestContext::default())
    }

    /// Like [`Self::evaluate`], with request attributes for conditions.
    #[must_use]
    pub fn evaluate_request(
        &self,
        action: &Action,
        resource: &str,
        request: &RequestContext<'_>,
    ) -> Decision {
        evaluate(&self.policies, action, resource, request)
    }

    /// Checks a request, returning `AccessDenied` unless it is allowed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::AccessDenied`] when the request is not allowed.
    pub fn check(&self, action: &Action, resource: &str) -> Result<()> {
        if self.evaluate(action, resource).is_allowed() {
            Ok(())
        } else {
            Err(Error::AccessDenied {
                principal: self.arn.clone(),
                action: action.to_string(),
                resource: resource.to_string(),
            })
        }
    }
}
