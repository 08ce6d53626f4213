use serde_json::{json, Map as JsonMap, Value as Json};

/// Statement id that marks the one statement this tool owns in a bucket policy.
pub const MANAGED_SID: &str = "S3CloudflarePolicyWriterManagedStatement";
pub const POLICY_VERSION: &str = "2012-10-17";

const STATEMENT: &str = "Statement";

/// Canonical managed statement for `bucket`, allowing `s3:GetObject` only from `ranges`.
///
/// Range order is kept as given and duplicates are not removed.
pub fn managed_statement(bucket: &str, ranges: &[String]) -> Json {
    json!({
        "Sid": MANAGED_SID,
        "Effect": "Allow",
        "Action": "s3:GetObject",
        "Principal": "*",
        "Resource": format!("arn:aws:s3:::{bucket}/*"),
        "Condition": {
            "IpAddress": { "aws:SourceIp": ranges }
        }
    })
}

/// Empty policy document used when a bucket has no policy yet.
pub fn skeleton() -> JsonMap<String, Json> {
    let mut doc = JsonMap::new();
    doc.insert("Version".to_string(), json!(POLICY_VERSION));
    doc.insert(STATEMENT.to_string(), json!([]));
    doc
}

fn is_managed(statement: &Json) -> bool {
    statement.get("Sid").and_then(Json::as_str) == Some(MANAGED_SID)
}

/// A bucket's policy as fetched, before any structured access.
#[derive(Debug)]
pub enum CurrentPolicy {
    Absent,
    Unparsable(serde_json::Error),
    Parsed(Json),
}

impl CurrentPolicy {
    /// `None` and the empty string both mean the bucket has no policy.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw {
            None => CurrentPolicy::Absent,
            Some(text) if text.is_empty() => CurrentPolicy::Absent,
            Some(text) => match serde_json::from_str(text) {
                Ok(doc) => CurrentPolicy::Parsed(doc),
                Err(err) => CurrentPolicy::Unparsable(err),
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiffReason {
    /// No policy attached to the bucket.
    Missing,
    /// Document has no `Statement` array.
    NoStatementList,
    NotFound,
    /// Managed statement present but not equal to the canonical one.
    Stale,
    /// More than one statement carries the managed sid.
    Duplicated(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diff {
    InSync,
    Differs(DiffReason),
}

impl Diff {
    pub fn differs(&self) -> bool {
        matches!(self, Diff::Differs(_))
    }
}

/// Compare a parsed policy document against the canonical statement.
pub fn diff_document(doc: &Json, expected: &Json) -> Diff {
    let Some(statements) = doc.get(STATEMENT).and_then(Json::as_array) else {
        return Diff::Differs(DiffReason::NoStatementList);
    };
    let managed: Vec<&Json> = statements.iter().filter(|s| is_managed(s)).collect();
    match managed.as_slice() {
        [] => Diff::Differs(DiffReason::NotFound),
        [only] if *only == expected => Diff::InSync,
        [_] => Diff::Differs(DiffReason::Stale),
        many => Diff::Differs(DiffReason::Duplicated(many.len())),
    }
}

/// Insert `statement` into `current`, dropping any earlier managed statement.
///
/// Foreign statements and other top-level keys keep their content and order.
/// A missing or non-object document starts from [`skeleton`].
pub fn apply_managed_statement(current: Option<Json>, statement: Json) -> Json {
    let mut doc = match current {
        Some(Json::Object(map)) => map,
        _ => skeleton(),
    };
    match doc.get_mut(STATEMENT) {
        Some(Json::Array(list)) => list.retain(|s| !is_managed(s)),
        _ => {
            doc.insert(STATEMENT.to_string(), json!([]));
        }
    }
    if let Some(Json::Array(list)) = doc.get_mut(STATEMENT) {
        list.push(statement);
    }
    Json::Object(doc)
}

/// The managed statement for one IP range snapshot, applied bucket by bucket.
#[derive(Debug, Clone)]
pub struct ManagedPolicy {
    ranges: Vec<String>,
}

impl ManagedPolicy {
    pub fn new(ranges: Vec<String>) -> Self {
        Self { ranges }
    }

    pub fn ranges(&self) -> &[String] {
        &self.ranges
    }

    pub fn statement_for(&self, bucket: &str) -> Json {
        managed_statement(bucket, &self.ranges)
    }

    /// `None` when the current policy could not be parsed and must not be touched.
    pub fn diff(&self, bucket: &str, current: &CurrentPolicy) -> Option<Diff> {
        match current {
            CurrentPolicy::Absent => Some(Diff::Differs(DiffReason::Missing)),
            CurrentPolicy::Unparsable(_) => None,
            CurrentPolicy::Parsed(doc) => Some(diff_document(doc, &self.statement_for(bucket))),
        }
    }

    pub fn apply(&self, bucket: &str, current: Option<Json>) -> Json {
        apply_managed_statement(current, self.statement_for(bucket))
    }
}
