//! Domain model: virtual hosts, path mappings and the value objects they are
//! built from.
//!
//! Value objects validate on construction, including when they are
//! deserialized from the durable store, so a `VirtualHost` or `Mapping` in
//! hand is always well formed. [`HostingModel`] is the immutable snapshot of
//! the whole configuration that queries, the resolver and the synthesizer
//! operate on.
use std::{collections::BTreeMap, fmt, str::FromStr};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

static DNS_LABEL: Lazy<regex::Regex> = Lazy::new(|| {
    regex::Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("DNS label regex is valid")
});

/// A value object rejected its input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    /// The offending input field
    pub field: &'static str,
    /// Human readable reason
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

pub type ValidationResult<T> = Result<T, ValidationError>;

/// A lowercase fully qualified domain name, optionally in wildcard form
/// (`*.example.com`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Fqdn(String);

impl Fqdn {
    pub const MAX_LEN: usize = 253;

    /// Parse and normalize a hostname.
    ///
    /// A trailing root dot is dropped and the name is lowercased. At least two
    /// labels are required; a single leading `*` label marks a wildcard name.
    pub fn new(raw: &str) -> ValidationResult<Self> {
        let name = raw.trim().trim_end_matches('.').to_ascii_lowercase();
        if name.is_empty() {
            return Err(ValidationError::new("hostname", "must not be empty"));
        }
        if name.len() > Self::MAX_LEN {
            return Err(ValidationError::new(
                "hostname",
                format!("exceeds {} characters", Self::MAX_LEN),
            ));
        }

        let labels = name.strip_prefix("*.").unwrap_or(&name);
        if !labels.contains('.') {
            return Err(ValidationError::new(
                "hostname",
                format!("'{name}' must contain at least two labels"),
            ));
        }
        if let Some(label) = labels.split('.').find(|label| !DNS_LABEL.is_match(label)) {
            return Err(ValidationError::new(
                "hostname",
                format!("'{label}' is not a valid DNS label"),
            ));
        }

        Ok(Self(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_wildcard(&self) -> bool {
        self.0.starts_with("*.")
    }

    /// The wildcard name that would cover this host: `*.example.com` for
    /// `api.example.com`. `None` for wildcard names and for names whose
    /// remainder would be a single label.
    pub fn covering_wildcard(&self) -> Option<Fqdn> {
        if self.is_wildcard() {
            return None;
        }
        let (_, rest) = self.0.split_once('.')?;
        rest.contains('.').then(|| Fqdn(format!("*.{rest}")))
    }
}

impl TryFrom<String> for Fqdn {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Fqdn::new(&value)
    }
}

impl From<Fqdn> for String {
    fn from(value: Fqdn) -> Self {
        value.0
    }
}

impl FromStr for Fqdn {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Fqdn::new(s)
    }
}

impl fmt::Display for Fqdn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A normalized absolute request-path pattern.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MappingPath(String);

impl MappingPath {
    pub const MAX_LEN: usize = 1024;

    /// Normalize a path: repeated slashes collapse, a trailing slash is kept.
    /// `.` and `..` segments, whitespace, control characters and characters
    /// that would break out of a rendered `location` directive are rejected.
    pub fn new(raw: &str) -> ValidationResult<Self> {
        let raw = raw.trim();
        if !raw.starts_with('/') {
            return Err(ValidationError::new(
                "path",
                format!("'{raw}' must be an absolute path starting with '/'"),
            ));
        }
        if raw.len() > Self::MAX_LEN {
            return Err(ValidationError::new(
                "path",
                format!("exceeds {} characters", Self::MAX_LEN),
            ));
        }
        if let Some(c) = raw.chars().find(|c| {
            c.is_whitespace()
                || c.is_control()
                || matches!(c, '"' | '\'' | ';' | '{' | '}' | '\\' | '#')
        }) {
            return Err(ValidationError::new(
                "path",
                format!("contains forbidden character {c:?}"),
            ));
        }

        let mut normalized = String::with_capacity(raw.len());
        for segment in raw.split('/').filter(|s| !s.is_empty()) {
            if segment == "." || segment == ".." {
                return Err(ValidationError::new(
                    "path",
                    "relative segments ('.' or '..') are not allowed",
                ));
            }
            normalized.push('/');
            normalized.push_str(segment);
        }
        if normalized.is_empty() || (raw.len() > 1 && raw.ends_with('/')) {
            normalized.push('/');
        }

        Ok(Self(normalized))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl TryFrom<String> for MappingPath {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        MappingPath::new(&value)
    }
}

impl From<MappingPath> for String {
    fn from(value: MappingPath) -> Self {
        value.0
    }
}

impl FromStr for MappingPath {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MappingPath::new(s)
    }
}

impl fmt::Display for MappingPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// How a mapping's path is compared against a request path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MatchPattern {
    Equals,
    #[default]
    BeginsWith,
    Contains,
    EndsWith,
}

impl MatchPattern {
    /// Most specific first; the order rendered configuration is emitted in.
    pub const ALL: [MatchPattern; 4] = [
        MatchPattern::Equals,
        MatchPattern::BeginsWith,
        MatchPattern::Contains,
        MatchPattern::EndsWith,
    ];

    pub fn matches(self, pattern: &str, path: &str) -> bool {
        match self {
            MatchPattern::Equals => path == pattern,
            MatchPattern::BeginsWith => path.starts_with(pattern),
            MatchPattern::Contains => path.contains(pattern),
            MatchPattern::EndsWith => path.ends_with(pattern),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MatchPattern::Equals => "equals",
            MatchPattern::BeginsWith => "begins-with",
            MatchPattern::Contains => "contains",
            MatchPattern::EndsWith => "ends-with",
        }
    }
}

impl FromStr for MatchPattern {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MatchPattern::ALL
            .into_iter()
            .find(|pattern| pattern.as_str() == s.trim())
            .ok_or_else(|| {
                ValidationError::new(
                    "match pattern",
                    format!("'{s}' is not one of equals, begins-with, contains, ends-with"),
                )
            })
    }
}

impl fmt::Display for MatchPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An HTTP status code in the 100-599 range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub struct HttpResponseCode(u16);

impl HttpResponseCode {
    pub fn new(code: u16) -> ValidationResult<Self> {
        if (100..=599).contains(&code) {
            Ok(Self(code))
        } else {
            Err(ValidationError::new(
                "response code",
                format!("{code} is not a valid HTTP status (100-599)"),
            ))
        }
    }

    pub fn as_u16(self) -> u16 {
        self.0
    }
}

impl TryFrom<u16> for HttpResponseCode {
    type Error = ValidationError;

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        HttpResponseCode::new(value)
    }
}

impl From<HttpResponseCode> for u16 {
    fn from(value: HttpResponseCode) -> Self {
        value.0
    }
}

impl FromStr for HttpResponseCode {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let code = s.trim().parse::<u16>().map_err(|_| {
            ValidationError::new("response code", format!("'{s}' is not a number"))
        })?;
        HttpResponseCode::new(code)
    }
}

impl fmt::Display for HttpResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which kind of response a mapping produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TargetType {
    Url,
    InlineResponse,
    Redirect,
    ResponseCode,
}

impl TargetType {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetType::Url => "url",
            TargetType::InlineResponse => "inline-response",
            TargetType::Redirect => "redirect",
            TargetType::ResponseCode => "response-code",
        }
    }
}

impl FromStr for TargetType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "url" => Ok(TargetType::Url),
            "inline-response" => Ok(TargetType::InlineResponse),
            "redirect" => Ok(TargetType::Redirect),
            "response-code" => Ok(TargetType::ResponseCode),
            other => Err(ValidationError::new(
                "target type",
                format!("'{other}' is not one of url, inline-response, redirect, response-code"),
            )),
        }
    }
}

impl fmt::Display for TargetType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An installed service referenced by a `service://name[:port]` target.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceRef {
    pub name: String,
    pub port: Option<u16>,
}

/// Target of a `url` mapping: an `http(s)` URL or a `service://` reference.
///
/// The original text is kept verbatim for rendering, since normalizing would
/// change proxy semantics (a trailing slash on `proxy_pass` rewrites the URI).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TargetUrl {
    raw: String,
    service: Option<ServiceRef>,
}

impl TargetUrl {
    pub fn new(raw: &str) -> ValidationResult<Self> {
        let raw = raw.trim();
        // Url::parse tolerates these (and drops tabs and newlines), but they
        // would end the rendered `proxy_pass` directive early.
        if raw
            .chars()
            .any(|c| c.is_whitespace() || c.is_control() || matches!(c, '"' | '\'' | ';' | '{' | '}'))
        {
            return Err(ValidationError::new("target value", "URL contains forbidden characters"));
        }
        let url = Url::parse(raw)
            .map_err(|e| ValidationError::new("target value", format!("'{raw}' is not a URL: {e}")))?;

        let service = match url.scheme() {
            "http" | "https" => {
                if url.host_str().is_none_or(str::is_empty) {
                    return Err(ValidationError::new("target value", "URL must name a host"));
                }
                None
            }
            "service" => {
                let name = url
                    .host_str()
                    .filter(|name| !name.is_empty())
                    .ok_or_else(|| {
                        ValidationError::new("target value", "service URL must name a service")
                    })?;
                Some(ServiceRef {
                    name: name.to_string(),
                    port: url.port(),
                })
            }
            other => {
                return Err(ValidationError::new(
                    "target value",
                    format!("unsupported URL scheme '{other}' (use http, https or service)"),
                ));
            }
        };

        Ok(Self {
            raw: raw.to_string(),
            service,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn service(&self) -> Option<&ServiceRef> {
        self.service.as_ref()
    }
}

impl TryFrom<String> for TargetUrl {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        TargetUrl::new(&value)
    }
}

impl From<TargetUrl> for String {
    fn from(value: TargetUrl) -> Self {
        value.raw
    }
}

/// Literal body returned by an `inline-response` mapping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct InlineBody(String);

impl InlineBody {
    pub const MAX_LEN: usize = 64 * 1024;

    pub fn new(raw: &str) -> ValidationResult<Self> {
        if raw.trim().is_empty() {
            return Err(ValidationError::new("target value", "inline response must not be empty"));
        }
        if raw.len() > Self::MAX_LEN {
            return Err(ValidationError::new(
                "target value",
                format!("inline response exceeds {} bytes", Self::MAX_LEN),
            ));
        }
        if raw.chars().any(|c| c.is_control() && !matches!(c, '\n' | '\r' | '\t')) {
            return Err(ValidationError::new(
                "target value",
                "inline response contains control characters",
            ));
        }
        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for InlineBody {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        InlineBody::new(&value)
    }
}

impl From<InlineBody> for String {
    fn from(value: InlineBody) -> Self {
        value.0
    }
}

/// Where a `redirect` mapping sends the client: an absolute `http(s)` URL or
/// an absolute path on the same host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RedirectLocation(String);

impl RedirectLocation {
    pub fn new(raw: &str) -> ValidationResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ValidationError::new("target value", "redirect location must not be empty"));
        }
        if raw.chars().any(|c| c.is_whitespace() || c.is_control() || matches!(c, '"' | ';' | '{' | '}')) {
            return Err(ValidationError::new(
                "target value",
                "redirect location contains forbidden characters",
            ));
        }
        if raw.starts_with('/') && !raw.starts_with("//") {
            return Ok(Self(raw.to_string()));
        }
        match Url::parse(raw) {
            Ok(url) if matches!(url.scheme(), "http" | "https") && url.host_str().is_some() => {
                Ok(Self(raw.to_string()))
            }
            _ => Err(ValidationError::new(
                "target value",
                format!("'{raw}' is neither an absolute path nor an http(s) URL"),
            )),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for RedirectLocation {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        RedirectLocation::new(&value)
    }
}

impl From<RedirectLocation> for String {
    fn from(value: RedirectLocation) -> Self {
        value.0
    }
}

/// What a mapping dispatches to. Exactly one payload, selected by the tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "target_type", rename_all = "kebab-case")]
pub enum MappingTarget {
    Url { url: TargetUrl },
    InlineResponse { body: InlineBody },
    Redirect { location: RedirectLocation },
    ResponseCode { code: HttpResponseCode },
}

impl MappingTarget {
    /// Build a target from the loosely typed administrative input.
    ///
    /// `response-code` takes only `response_code`; every other type takes
    /// only `value`. Anything else is rejected.
    pub fn new(
        target_type: TargetType,
        value: Option<&str>,
        response_code: Option<u16>,
    ) -> ValidationResult<Self> {
        match (target_type, value, response_code) {
            (TargetType::ResponseCode, None, Some(code)) => Ok(MappingTarget::ResponseCode {
                code: HttpResponseCode::new(code)?,
            }),
            (TargetType::ResponseCode, Some(_), _) => Err(ValidationError::new(
                "target value",
                "response-code targets take no value",
            )),
            (TargetType::ResponseCode, None, None) => Err(ValidationError::new(
                "target response code",
                "required for response-code targets",
            )),
            (other, _, Some(_)) => Err(ValidationError::new(
                "target response code",
                format!("not accepted for {other} targets"),
            )),
            (other, None, None) => Err(ValidationError::new(
                "target value",
                format!("required for {other} targets"),
            )),
            (TargetType::Url, Some(value), None) => Ok(MappingTarget::Url {
                url: TargetUrl::new(value)?,
            }),
            (TargetType::InlineResponse, Some(value), None) => Ok(MappingTarget::InlineResponse {
                body: InlineBody::new(value)?,
            }),
            (TargetType::Redirect, Some(value), None) => Ok(MappingTarget::Redirect {
                location: RedirectLocation::new(value)?,
            }),
        }
    }

    pub fn target_type(&self) -> TargetType {
        match self {
            MappingTarget::Url { .. } => TargetType::Url,
            MappingTarget::InlineResponse { .. } => TargetType::InlineResponse,
            MappingTarget::Redirect { .. } => TargetType::Redirect,
            MappingTarget::ResponseCode { .. } => TargetType::ResponseCode,
        }
    }

    /// The installed service this target depends on, if any.
    pub fn service(&self) -> Option<&ServiceRef> {
        match self {
            MappingTarget::Url { url } => url.service(),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VirtualHostType {
    #[default]
    TopLevel,
    Alias,
    Wildcard,
}

impl VirtualHostType {
    pub fn as_str(self) -> &'static str {
        match self {
            VirtualHostType::TopLevel => "top-level",
            VirtualHostType::Alias => "alias",
            VirtualHostType::Wildcard => "wildcard",
        }
    }
}

impl FromStr for VirtualHostType {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "top-level" => Ok(VirtualHostType::TopLevel),
            "alias" => Ok(VirtualHostType::Alias),
            "wildcard" => Ok(VirtualHostType::Wildcard),
            other => Err(ValidationError::new(
                "type",
                format!("'{other}' is not one of top-level, alias, wildcard"),
            )),
        }
    }
}

impl fmt::Display for VirtualHostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A servable hostname. Aliases hold their parent's hostname as a lookup key
/// only; the parent does not point back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "VirtualHostRecord")]
pub struct VirtualHost {
    hostname: Fqdn,
    #[serde(rename = "type")]
    kind: VirtualHostType,
    #[serde(skip_serializing_if = "Option::is_none")]
    parent_hostname: Option<Fqdn>,
}

#[derive(Deserialize)]
struct VirtualHostRecord {
    hostname: Fqdn,
    #[serde(rename = "type")]
    kind: VirtualHostType,
    #[serde(default)]
    parent_hostname: Option<Fqdn>,
}

impl TryFrom<VirtualHostRecord> for VirtualHost {
    type Error = ValidationError;

    fn try_from(record: VirtualHostRecord) -> Result<Self, Self::Error> {
        VirtualHost::new(record.hostname, record.kind, record.parent_hostname)
    }
}

impl VirtualHost {
    /// Build a virtual host, checking the shape constraints that do not need
    /// the rest of the configuration: a parent is present iff the host is an
    /// alias, and only wildcard hosts carry wildcard names.
    pub fn new(
        hostname: Fqdn,
        kind: VirtualHostType,
        parent_hostname: Option<Fqdn>,
    ) -> ValidationResult<Self> {
        match (kind, &parent_hostname) {
            (VirtualHostType::Alias, None) => {
                return Err(ValidationError::new(
                    "parent hostname",
                    "required for alias virtual hosts",
                ));
            }
            (VirtualHostType::Alias, Some(parent)) if *parent == hostname => {
                return Err(ValidationError::new(
                    "parent hostname",
                    "an alias cannot be its own parent",
                ));
            }
            (VirtualHostType::TopLevel | VirtualHostType::Wildcard, Some(_)) => {
                return Err(ValidationError::new(
                    "parent hostname",
                    format!("only alias virtual hosts have a parent, not {kind}"),
                ));
            }
            _ => {}
        }

        if (kind == VirtualHostType::Wildcard) != hostname.is_wildcard() {
            return Err(ValidationError::new(
                "hostname",
                "wildcard names ('*.') are reserved for wildcard virtual hosts",
            ));
        }
        if parent_hostname.as_ref().is_some_and(Fqdn::is_wildcard) {
            return Err(ValidationError::new(
                "parent hostname",
                "an alias cannot point at a wildcard name",
            ));
        }

        Ok(Self {
            hostname,
            kind,
            parent_hostname,
        })
    }

    pub fn top_level(hostname: Fqdn) -> ValidationResult<Self> {
        Self::new(hostname, VirtualHostType::TopLevel, None)
    }

    pub fn alias(hostname: Fqdn, parent: Fqdn) -> ValidationResult<Self> {
        Self::new(hostname, VirtualHostType::Alias, Some(parent))
    }

    pub fn hostname(&self) -> &Fqdn {
        &self.hostname
    }

    pub fn kind(&self) -> VirtualHostType {
        self.kind
    }

    pub fn parent_hostname(&self) -> Option<&Fqdn> {
        self.parent_hostname.as_ref()
    }

    pub fn is_alias(&self) -> bool {
        self.kind == VirtualHostType::Alias
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MappingId(u64);

impl MappingId {
    pub fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn get(self) -> u64 {
        self.0
    }
}

impl FromStr for MappingId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u64>()
            .map(MappingId)
            .map_err(|_| ValidationError::new("mapping id", format!("'{s}' is not a valid id")))
    }
}

impl fmt::Display for MappingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A mapping before the store has assigned it an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingDraft {
    pub hostname: Fqdn,
    pub path: MappingPath,
    pub match_pattern: MatchPattern,
    pub target: MappingTarget,
}

impl MappingDraft {
    pub fn into_mapping(self, id: MappingId) -> Mapping {
        Mapping {
            id,
            hostname: self.hostname,
            path: self.path,
            match_pattern: self.match_pattern,
            target: self.target,
        }
    }
}

/// A path rule routing requests on a virtual host to a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub id: MappingId,
    pub hostname: Fqdn,
    pub path: MappingPath,
    #[serde(default)]
    pub match_pattern: MatchPattern,
    #[serde(flatten)]
    pub target: MappingTarget,
}

impl Mapping {
    pub fn matches(&self, request_path: &str) -> bool {
        self.match_pattern.matches(self.path.as_str(), request_path)
    }
}

/// Read view: a top-level or wildcard host with its aliases and every mapping
/// of its server block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VirtualHostWithMappings {
    #[serde(flatten)]
    pub virtual_host: VirtualHost,
    pub is_primary: bool,
    pub aliases: Vec<VirtualHost>,
    pub mappings: Vec<Mapping>,
}

/// Current on-disk document version.
pub const MODEL_DOCUMENT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct ModelDocument {
    version: u32,
    next_mapping_id: u64,
    virtual_hosts: Vec<VirtualHost>,
    mappings: Vec<Mapping>,
}

/// Immutable snapshot of every virtual host and mapping.
///
/// Serializes to a deterministic document (hosts sorted by name, mappings by
/// id), so restoring a snapshot reproduces the stored bytes exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ModelDocument", into = "ModelDocument")]
pub struct HostingModel {
    virtual_hosts: BTreeMap<Fqdn, VirtualHost>,
    mappings: BTreeMap<MappingId, Mapping>,
    next_mapping_id: u64,
}

impl Default for HostingModel {
    fn default() -> Self {
        Self {
            virtual_hosts: BTreeMap::new(),
            mappings: BTreeMap::new(),
            next_mapping_id: 1,
        }
    }
}

impl TryFrom<ModelDocument> for HostingModel {
    type Error = ValidationError;

    fn try_from(document: ModelDocument) -> Result<Self, Self::Error> {
        if document.version != MODEL_DOCUMENT_VERSION {
            return Err(ValidationError::new(
                "store document",
                format!("unsupported version {}", document.version),
            ));
        }

        let mut model = HostingModel {
            next_mapping_id: document.next_mapping_id.max(1),
            ..HostingModel::default()
        };
        for vhost in document.virtual_hosts {
            if model.virtual_hosts.contains_key(vhost.hostname()) {
                return Err(ValidationError::new(
                    "store document",
                    format!("duplicate virtual host {}", vhost.hostname()),
                ));
            }
            model.insert_virtual_host(vhost);
        }
        for mapping in document.mappings {
            if mapping.id.get() >= model.next_mapping_id {
                return Err(ValidationError::new(
                    "store document",
                    format!("mapping id {} is not below next_mapping_id", mapping.id),
                ));
            }
            if model.mappings.contains_key(&mapping.id) {
                return Err(ValidationError::new(
                    "store document",
                    format!("duplicate mapping id {}", mapping.id),
                ));
            }
            model.insert_mapping(mapping);
        }
        Ok(model)
    }
}

impl From<HostingModel> for ModelDocument {
    fn from(model: HostingModel) -> Self {
        ModelDocument {
            version: MODEL_DOCUMENT_VERSION,
            next_mapping_id: model.next_mapping_id,
            virtual_hosts: model.virtual_hosts.into_values().collect(),
            mappings: model.mappings.into_values().collect(),
        }
    }
}

impl HostingModel {
    pub fn is_empty(&self) -> bool {
        self.virtual_hosts.is_empty() && self.mappings.is_empty()
    }

    pub fn virtual_host(&self, hostname: &Fqdn) -> Option<&VirtualHost> {
        self.virtual_hosts.get(hostname)
    }

    /// All hosts, ordered by hostname.
    pub fn virtual_hosts(&self) -> impl Iterator<Item = &VirtualHost> {
        self.virtual_hosts.values()
    }

    pub fn virtual_host_count(&self) -> usize {
        self.virtual_hosts.len()
    }

    pub fn mapping(&self, id: MappingId) -> Option<&Mapping> {
        self.mappings.get(&id)
    }

    /// All mappings, ordered by id.
    pub fn mappings(&self) -> impl Iterator<Item = &Mapping> {
        self.mappings.values()
    }

    /// Mappings owned directly by `hostname`, ordered by id.
    pub fn mappings_of<'a>(&'a self, hostname: &'a Fqdn) -> impl Iterator<Item = &'a Mapping> + 'a {
        self.mappings.values().filter(move |m| &m.hostname == hostname)
    }

    pub fn aliases_of<'a>(&'a self, parent: &'a Fqdn) -> impl Iterator<Item = &'a VirtualHost> + 'a {
        self.virtual_hosts
            .values()
            .filter(move |vh| vh.parent_hostname() == Some(parent))
    }

    /// The host whose server block serves `hostname`: the parent for an
    /// alias, the host itself otherwise.
    pub fn block_root(&self, hostname: &Fqdn) -> Option<&VirtualHost> {
        let vhost = self.virtual_hosts.get(hostname)?;
        match vhost.parent_hostname() {
            Some(parent) => self.virtual_hosts.get(parent),
            None => Some(vhost),
        }
    }

    /// Every mapping served by the block rooted at `root` (the root and its
    /// aliases), ordered by id.
    pub fn block_mappings<'a>(&'a self, root: &'a Fqdn) -> impl Iterator<Item = &'a Mapping> + 'a {
        self.mappings.values().filter(move |m| {
            &m.hostname == root
                || self
                    .virtual_hosts
                    .get(&m.hostname)
                    .and_then(VirtualHost::parent_hostname)
                    == Some(root)
        })
    }

    /// Hosts that get their own server block, ordered by hostname.
    pub fn block_roots(&self) -> impl Iterator<Item = &VirtualHost> {
        self.virtual_hosts.values().filter(|vh| !vh.is_alias())
    }

    pub fn next_mapping_id(&self) -> MappingId {
        MappingId(self.next_mapping_id)
    }

    /// Reserve the next mapping id. Ids are never handed out twice, even after
    /// the mapping that used one is deleted.
    pub fn allocate_mapping_id(&mut self) -> MappingId {
        let id = MappingId(self.next_mapping_id);
        self.next_mapping_id += 1;
        id
    }

    pub fn insert_virtual_host(&mut self, vhost: VirtualHost) -> Option<VirtualHost> {
        self.virtual_hosts.insert(vhost.hostname().clone(), vhost)
    }

    pub fn remove_virtual_host(&mut self, hostname: &Fqdn) -> Option<VirtualHost> {
        self.virtual_hosts.remove(hostname)
    }

    pub fn insert_mapping(&mut self, mapping: Mapping) -> Option<Mapping> {
        if mapping.id.get() >= self.next_mapping_id {
            self.next_mapping_id = mapping.id.get() + 1;
        }
        self.mappings.insert(mapping.id, mapping)
    }

    pub fn remove_mapping(&mut self, id: MappingId) -> Option<Mapping> {
        self.mappings.remove(&id)
    }

    /// Server blocks with their aliases and mappings, for listing.
    pub fn with_mappings(&self, primary: Option<&Fqdn>) -> Vec<VirtualHostWithMappings> {
        self.block_roots()
            .map(|root| VirtualHostWithMappings {
                virtual_host: root.clone(),
                is_primary: primary == Some(root.hostname()),
                aliases: self.aliases_of(root.hostname()).cloned().collect(),
                mappings: self.block_mappings(root.hostname()).cloned().collect(),
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fqdn(name: &str) -> Fqdn {
        Fqdn::new(name).unwrap()
    }

    #[test]
    fn test_fqdn_normalizes_and_rejects() {
        assert_eq!(fqdn("Example.COM.").as_str(), "example.com");
        assert!(fqdn("*.example.com").is_wildcard());

        for bad in ["", "localhost", "-bad.com", "bad-.com", "a..com", "exa mple.com", "a.*.com"] {
            let err = Fqdn::new(bad).unwrap_err();
            assert_eq!(err.field, "hostname", "{bad} should be rejected");
        }
        assert!(Fqdn::new(&format!("{}.com", "a".repeat(64))).is_err());
    }

    #[test]
    fn test_covering_wildcard() {
        assert_eq!(
            fqdn("api.example.com").covering_wildcard(),
            Some(fqdn("*.example.com"))
        );
        assert_eq!(fqdn("example.com").covering_wildcard(), None);
        assert_eq!(fqdn("*.example.com").covering_wildcard(), None);
    }

    #[test]
    fn test_mapping_path_normalization() {
        assert_eq!(MappingPath::new("/").unwrap().as_str(), "/");
        assert_eq!(MappingPath::new("//api//v1").unwrap().as_str(), "/api/v1");
        assert_eq!(MappingPath::new("/api/").unwrap().as_str(), "/api/");
        assert_eq!(MappingPath::new("///").unwrap().as_str(), "/");

        assert!(MappingPath::new("api").is_err());
        assert!(MappingPath::new("/a/../b").is_err());
        assert!(MappingPath::new("/a b").is_err());
        assert!(MappingPath::new("/a;return 200").is_err());
        assert!(MappingPath::new("/a{").is_err());
    }

    #[test]
    fn test_match_pattern_semantics() {
        assert!(MatchPattern::Equals.matches("/a", "/a"));
        assert!(!MatchPattern::Equals.matches("/a", "/a/"));
        assert!(MatchPattern::BeginsWith.matches("/api", "/api/users"));
        assert!(MatchPattern::Contains.matches("/admin", "/x/admin/y"));
        assert!(MatchPattern::EndsWith.matches("/index.php", "/blog/index.php"));
        assert_eq!(MatchPattern::default(), MatchPattern::BeginsWith);
        assert_eq!("ends-with".parse::<MatchPattern>().unwrap(), MatchPattern::EndsWith);
        assert!("prefix".parse::<MatchPattern>().is_err());
    }

    #[test]
    fn test_response_code_range() {
        assert!(HttpResponseCode::new(100).is_ok());
        assert!(HttpResponseCode::new(599).is_ok());
        assert!(HttpResponseCode::new(99).is_err());
        assert!(HttpResponseCode::new(600).is_err());
        assert!("abc".parse::<HttpResponseCode>().is_err());
    }

    #[test]
    fn test_mapping_target_payload_must_match_tag() {
        let code = MappingTarget::new(TargetType::ResponseCode, None, Some(403)).unwrap();
        assert_eq!(code.target_type(), TargetType::ResponseCode);

        let err = MappingTarget::new(TargetType::ResponseCode, Some("x"), Some(403)).unwrap_err();
        assert_eq!(err.field, "target value");
        let err = MappingTarget::new(TargetType::Url, Some("http://a.com"), Some(200)).unwrap_err();
        assert_eq!(err.field, "target response code");
        let err = MappingTarget::new(TargetType::Redirect, None, None).unwrap_err();
        assert_eq!(err.field, "target value");

        assert!(MappingTarget::new(TargetType::Url, Some("not a url"), None).is_err());
        assert!(MappingTarget::new(TargetType::Url, Some("ftp://a.com"), None).is_err());
        assert!(MappingTarget::new(TargetType::InlineResponse, Some("   "), None).is_err());
        assert!(MappingTarget::new(TargetType::Redirect, Some("example.com"), None).is_err());
        assert!(MappingTarget::new(TargetType::Redirect, Some("/login"), None).is_ok());
        assert!(MappingTarget::new(TargetType::Redirect, Some("https://a.com/x"), None).is_ok());
    }

    #[test]
    fn test_service_target() {
        let target = MappingTarget::new(TargetType::Url, Some("service://php-webserver:8080"), None)
            .unwrap();
        let service = target.service().unwrap();
        assert_eq!(service.name, "php-webserver");
        assert_eq!(service.port, Some(8080));

        let plain = MappingTarget::new(TargetType::Url, Some("http://127.0.0.1:3000"), None).unwrap();
        assert!(plain.service().is_none());
    }

    #[test]
    fn test_url_target_rejects_directive_breaking_text() {
        for raw in [
            "http://a.com/x; } location /secret { return 200 pwned; }",
            "http://a.com/x y",
            "http://a.com/x\nreturn",
            "http://a.com/\"quoted\"",
            "http://a.com/it's",
            "http://a.com/{id}",
        ] {
            assert!(
                MappingTarget::new(TargetType::Url, Some(raw), None).is_err(),
                "accepted {raw:?}"
            );
        }
        assert!(MappingTarget::new(TargetType::Url, Some("https://a.com/x?q=1&r=%3B"), None).is_ok());

        let stored = r#"{"target_type":"url","url":"http://a.com/x; return 200"}"#;
        assert!(serde_json::from_str::<MappingTarget>(stored).is_err());
    }

    #[test]
    fn test_virtual_host_shape() {
        assert!(VirtualHost::top_level(fqdn("example.com")).is_ok());
        assert!(VirtualHost::new(fqdn("www.example.com"), VirtualHostType::Alias, None).is_err());
        assert!(
            VirtualHost::new(
                fqdn("example.com"),
                VirtualHostType::TopLevel,
                Some(fqdn("example.org"))
            )
            .is_err()
        );
        assert!(VirtualHost::alias(fqdn("example.com"), fqdn("example.com")).is_err());
        assert!(VirtualHost::top_level(fqdn("*.example.com")).is_err());
        assert!(VirtualHost::new(fqdn("*.example.com"), VirtualHostType::Wildcard, None).is_ok());
        assert!(VirtualHost::new(fqdn("example.com"), VirtualHostType::Wildcard, None).is_err());
    }

    #[test]
    fn test_model_document_is_deterministic() {
        let mut model = HostingModel::default();
        model.insert_virtual_host(VirtualHost::top_level(fqdn("b.com")).unwrap());
        model.insert_virtual_host(VirtualHost::top_level(fqdn("a.com")).unwrap());
        let id = model.allocate_mapping_id();
        model.insert_mapping(Mapping {
            id,
            hostname: fqdn("a.com"),
            path: MappingPath::new("/").unwrap(),
            match_pattern: MatchPattern::BeginsWith,
            target: MappingTarget::new(TargetType::ResponseCode, None, Some(403)).unwrap(),
        });

        let first = serde_json::to_string(&model).unwrap();
        let reloaded: HostingModel = serde_json::from_str(&first).unwrap();
        assert_eq!(reloaded, model);
        assert_eq!(serde_json::to_string(&reloaded).unwrap(), first);
        assert!(first.find("a.com").unwrap() < first.find("b.com").unwrap());
        assert!(first.contains(r#""target_type":"response-code""#));
    }

    #[test]
    fn test_model_document_rejects_invalid_content() {
        let bad_host = r#"{"version":1,"next_mapping_id":1,"virtual_hosts":[{"hostname":"www.a.com","type":"alias"}],"mappings":[]}"#;
        assert!(serde_json::from_str::<HostingModel>(bad_host).is_err());

        let stale_counter = r#"{"version":1,"next_mapping_id":1,"virtual_hosts":[{"hostname":"a.com","type":"top-level"}],"mappings":[{"id":1,"hostname":"a.com","path":"/","match_pattern":"equals","target_type":"response-code","code":404}]}"#;
        assert!(serde_json::from_str::<HostingModel>(stale_counter).is_err());
    }

    #[test]
    fn test_mapping_ids_are_never_reused() {
        let mut model = HostingModel::default();
        let first = model.allocate_mapping_id();
        let second = model.allocate_mapping_id();
        assert_eq!(first.get() + 1, second.get());
        model.remove_mapping(second);
        assert!(model.allocate_mapping_id() > second);
    }
}
