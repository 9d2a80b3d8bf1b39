//! Geni immediate-family client.
//!
//! # Responsibility
//! - Fetch `GET {base}/api/{profile}/immediate-family` with an OAuth token.
//! - Map HTTP statuses onto `RemoteError` kinds.
//! - Turn the node/edge payload into a `FamilyListing`.
//!
//! # Invariants
//! - Union edges carrying a `rel_modifier` (adopted, foster, step) never
//!   produce a father or a child.
//! - The token file is rewritten only after a successful token exchange.

use super::{FamilyListing, RemoteError, RemoteGraph};
use crate::model::profile::{Gender, Profile, ProfileId, Union};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use url::Url;

const PROFILE_PREFIX: &str = "profile-";
const UNION_PREFIX: &str = "union-";
const TOKEN_EXPIRY_MARGIN_SECS: f64 = 60.0;
const DEFAULT_EXPIRES_IN_SECS: f64 = 3600.0;

/// Connection settings for the Geni API.
#[derive(Debug, Clone, PartialEq)]
pub struct GeniClientConfig {
    pub base_url: String,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub token_file: PathBuf,
    /// Fixed token that bypasses the token file and refresh flow.
    pub access_token: Option<String>,
    pub timeout: Duration,
}

/// Persisted OAuth token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredToken {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    /// Unix seconds after which the token is treated as expired.
    #[serde(default)]
    pub expires_at: f64,
}

impl StoredToken {
    fn is_expired(&self, now: f64) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    expires_in: Option<f64>,
}

/// Blocking Geni client.
pub struct GeniClient {
    agent: ureq::Agent,
    config: GeniClientConfig,
    token: Option<StoredToken>,
}

impl GeniClient {
    /// Builds a client and loads the token file when present.
    pub fn new(config: GeniClientConfig) -> Result<Self, RemoteError> {
        let token = load_token(&config.token_file)?;
        let agent = ureq::Agent::new_with_config(
            ureq::config::Config::builder()
                .timeout_global(Some(config.timeout))
                .http_status_as_error(false)
                .build(),
        );
        Ok(Self {
            agent,
            config,
            token,
        })
    }

    /// Browser URL where the user grants access and receives a code.
    pub fn authorization_url(&self) -> Result<String, RemoteError> {
        let client_id = self.require_client_id()?;
        let url = Url::parse_with_params(
            &format!("{}/oauth/authorize", self.base_url()),
            [
                ("client_id", client_id),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("response_type", "code"),
            ],
        )
        .map_err(|err| RemoteError::InvalidResponse(format!("invalid base url: {err}")))?;
        Ok(url.into())
    }

    /// Exchanges an authorization code and stores the resulting token.
    pub fn exchange_code(&mut self, code: &str) -> Result<(), RemoteError> {
        let client_id = self.require_client_id()?.to_string();
        let client_secret = self.require_client_secret()?.to_string();
        let redirect_uri = self.config.redirect_uri.clone();
        let fields = [
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("code", code.trim()),
            ("redirect_uri", redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];
        let response = self.request_token(&fields)?;
        self.store_token(response, None)?;
        info!("event=geni_auth module=remote status=ok grant=authorization_code");
        Ok(())
    }

    /// Whether a usable (or refreshable) token is available.
    pub fn has_token(&self) -> bool {
        self.config.access_token.is_some() || self.token.is_some()
    }

    fn base_url(&self) -> &str {
        self.config.base_url.trim_end_matches('/')
    }

    fn require_client_id(&self) -> Result<&str, RemoteError> {
        self.config
            .client_id
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .ok_or(RemoteError::AuthExpired)
    }

    fn require_client_secret(&self) -> Result<&str, RemoteError> {
        self.config
            .client_secret
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .ok_or(RemoteError::AuthExpired)
    }

    fn access_token(&mut self) -> Result<String, RemoteError> {
        if let Some(token) = &self.config.access_token {
            return Ok(token.clone());
        }
        let expired = match &self.token {
            Some(token) => token.is_expired(unix_now()),
            None => return Err(RemoteError::AuthExpired),
        };
        if expired {
            self.refresh()?;
        }
        self.token
            .as_ref()
            .map(|token| token.access_token.clone())
            .ok_or(RemoteError::AuthExpired)
    }

    fn refresh(&mut self) -> Result<(), RemoteError> {
        if self.config.access_token.is_some() {
            return Err(RemoteError::AuthExpired);
        }
        let refresh_token = self
            .token
            .as_ref()
            .and_then(|token| token.refresh_token.clone())
            .ok_or(RemoteError::AuthExpired)?;
        let client_id = self.require_client_id()?.to_string();
        let client_secret = self.require_client_secret()?.to_string();
        let fields = [
            ("client_id", client_id.as_str()),
            ("client_secret", client_secret.as_str()),
            ("refresh_token", refresh_token.as_str()),
            ("grant_type", "refresh_token"),
        ];
        let response = match self.request_token(&fields) {
            Ok(response) => response,
            Err(err) => {
                warn!(
                    "event=geni_auth module=remote status=error grant=refresh_token kind={}",
                    err.kind()
                );
                return Err(RemoteError::AuthExpired);
            }
        };
        self.store_token(response, Some(refresh_token))?;
        info!("event=geni_auth module=remote status=ok grant=refresh_token");
        Ok(())
    }

    fn request_token(&self, fields: &[(&str, &str)]) -> Result<TokenResponse, RemoteError> {
        let url = format!("{}/oauth/token", self.base_url());
        let mut response = self
            .agent
            .post(&url)
            .send_form(fields.iter().copied())
            .map_err(|err| RemoteError::Network(err.to_string()))?;
        let status = response.status().as_u16();
        if status != 200 {
            return Err(match status {
                429 => RemoteError::RateLimited { retry_after: None },
                500..=599 => RemoteError::Network(format!("token endpoint returned {status}")),
                _ => RemoteError::AuthExpired,
            });
        }
        response
            .body_mut()
            .read_json::<TokenResponse>()
            .map_err(|err| RemoteError::InvalidResponse(err.to_string()))
    }

    fn store_token(
        &mut self,
        response: TokenResponse,
        previous_refresh: Option<String>,
    ) -> Result<(), RemoteError> {
        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let token = StoredToken {
            access_token: response.access_token,
            refresh_token: response.refresh_token.or(previous_refresh),
            expires_at: unix_now() + expires_in - TOKEN_EXPIRY_MARGIN_SECS,
        };
        save_token(&self.config.token_file, &token)?;
        self.token = Some(token);
        Ok(())
    }

    fn fetch_once(&mut self, profile_id: &str) -> Result<FamilyListing, RemoteError> {
        let token = self.access_token()?;
        let url = format!(
            "{}/api/{}/immediate-family",
            self.base_url(),
            api_profile_id(profile_id)
        );
        let mut response = self
            .agent
            .get(&url)
            .query("access_token", &token)
            .call()
            .map_err(|err| RemoteError::Network(err.to_string()))?;

        let status = response.status().as_u16();
        match status {
            200 => {
                let payload = response
                    .body_mut()
                    .read_json::<Value>()
                    .map_err(|err| RemoteError::InvalidResponse(err.to_string()))?;
                parse_family(&payload, profile_id)
            }
            429 => {
                let retry_after = response
                    .headers()
                    .get("retry-after")
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.trim().parse::<u64>().ok())
                    .map(Duration::from_secs);
                Err(RemoteError::RateLimited { retry_after })
            }
            401 => Err(RemoteError::AuthExpired),
            403 => Err(RemoteError::PermissionDenied(profile_id.to_string())),
            404 => Err(RemoteError::NotFound(profile_id.to_string())),
            500..=599 => Err(RemoteError::Network(format!("server returned {status}"))),
            _ => Err(RemoteError::InvalidResponse(format!(
                "unexpected status {status}"
            ))),
        }
    }
}

impl RemoteGraph for GeniClient {
    fn get_family(&mut self, profile_id: &str) -> Result<FamilyListing, RemoteError> {
        match self.fetch_once(profile_id) {
            Err(RemoteError::AuthExpired) if self.token.is_some() => {
                // Server rejected a token we believed valid; refresh once.
                self.refresh()?;
                self.fetch_once(profile_id)
            }
            other => other,
        }
    }
}

/// Parses an immediate-family payload.
///
/// `requested_id` is only used in error messages; the listing's focus id is
/// whatever the service reports, which may differ from the request.
pub fn parse_family(payload: &Value, requested_id: &str) -> Result<FamilyListing, RemoteError> {
    let focus_node = payload.get("focus").ok_or_else(|| {
        RemoteError::InvalidResponse(format!("no focus in listing for {requested_id}"))
    })?;
    let focus = parse_profile(focus_node).ok_or_else(|| {
        RemoteError::InvalidResponse(format!("focus without id in listing for {requested_id}"))
    })?;

    let empty = Map::new();
    let nodes = payload
        .get("nodes")
        .and_then(Value::as_object)
        .unwrap_or(&empty);

    let focus_edges = nodes
        .get(&focus.id)
        .and_then(node_edges)
        .or_else(|| node_edges(focus_node))
        .unwrap_or(&empty);

    let mut listing = FamilyListing::of(focus.clone());

    for (union_id, focus_edge) in focus_edges {
        if !union_id.starts_with(UNION_PREFIX) {
            continue;
        }
        let union_edges = nodes
            .get(union_id)
            .and_then(node_edges)
            .unwrap_or(&empty);

        match edge_rel(focus_edge) {
            Some("child") if is_biological(focus_edge) => {
                for (member_id, edge) in union_edges {
                    if edge_rel(edge) != Some("partner") {
                        continue;
                    }
                    let Some(parent) = profile_node(nodes, member_id) else {
                        continue;
                    };
                    match parent.gender {
                        Gender::Male if listing.father.is_none() => listing.father = Some(parent),
                        Gender::Female if listing.mother.is_none() => listing.mother = Some(parent),
                        _ => {}
                    }
                }
            }
            Some("partner") => {
                for (member_id, edge) in union_edges {
                    if *member_id == focus.id {
                        continue;
                    }
                    let Some(member) = profile_node(nodes, member_id) else {
                        continue;
                    };
                    match edge_rel(edge) {
                        Some("partner") => push_unique(&mut listing.spouses, member),
                        Some("child") if is_biological(edge) => {
                            push_unique(&mut listing.children, member)
                        }
                        _ => {}
                    }
                }
            }
            _ => {}
        }
    }

    for (node_id, node) in nodes {
        if node_id.starts_with(UNION_PREFIX) {
            listing.unions.push(parse_union(node_id, node));
        }
    }

    Ok(listing)
}

fn parse_profile(node: &Value) -> Option<Profile> {
    let id = node.get("id").and_then(Value::as_str)?.trim();
    if id.is_empty() {
        return None;
    }
    let display_name = text_field(node, "display_name")
        .or_else(|| text_field(node, "name"))
        .unwrap_or_default();
    let gender = node
        .get("gender")
        .and_then(Value::as_str)
        .map(Gender::from_label)
        .unwrap_or_default();

    let mut profile = Profile::new(id, display_name, gender);
    profile.first_name = text_field(node, "first_name");
    profile.last_name = text_field(node, "last_name");
    profile.birth_date = event_date(node, "birth");
    profile.death_date = event_date(node, "death");
    profile.is_alive = node
        .get("is_alive")
        .and_then(Value::as_bool)
        .unwrap_or(false);
    Some(profile)
}

fn parse_union(union_id: &str, node: &Value) -> Union {
    let mut union = Union {
        id: union_id.to_string(),
        status: text_field(node, "status"),
        ..Union::default()
    };
    if let Some(edges) = node_edges(node) {
        for (member_id, edge) in edges {
            if !member_id.starts_with(PROFILE_PREFIX) {
                continue;
            }
            match edge_rel(edge) {
                Some("partner") => union.partner_ids.push(member_id.clone()),
                Some("child") if is_biological(edge) => union.child_ids.push(member_id.clone()),
                _ => {}
            }
        }
    }
    union
}

fn profile_node(nodes: &Map<String, Value>, id: &str) -> Option<Profile> {
    if !id.starts_with(PROFILE_PREFIX) {
        return None;
    }
    nodes.get(id).and_then(parse_profile)
}

fn node_edges(node: &Value) -> Option<&Map<String, Value>> {
    node.get("edges").and_then(Value::as_object)
}

fn edge_rel(edge: &Value) -> Option<&str> {
    edge.get("rel").and_then(Value::as_str)
}

fn is_biological(edge: &Value) -> bool {
    edge.get("rel_modifier")
        .and_then(Value::as_str)
        .map(|modifier| modifier.trim().is_empty())
        .unwrap_or(true)
}

fn text_field(node: &Value, key: &str) -> Option<String> {
    node.get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

/// Date hint from `{event: {date: {formatted_date}}}` or `{event: {date: "..."}}`.
fn event_date(node: &Value, event: &str) -> Option<String> {
    let date = node.get(event)?.get("date")?;
    match date {
        Value::String(raw) => Some(raw.trim().to_string()).filter(|raw| !raw.is_empty()),
        Value::Object(_) => text_field(date, "formatted_date"),
        _ => None,
    }
}

fn push_unique(profiles: &mut Vec<Profile>, profile: Profile) {
    if !profiles.iter().any(|existing| existing.id == profile.id) {
        profiles.push(profile);
    }
}

fn api_profile_id(profile_id: &str) -> ProfileId {
    if profile_id.starts_with(PROFILE_PREFIX) {
        profile_id.to_string()
    } else {
        format!("{PROFILE_PREFIX}{profile_id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_payload() -> Value {
        json!({
            "focus": {
                "id": "profile-20",
                "name": "John Smith",
                "first_name": "John",
                "last_name": "Smith",
                "gender": "male",
                "birth": { "date": { "formatted_date": "1850" } }
            },
            "nodes": {
                "profile-20": {
                    "id": "profile-20",
                    "name": "John Smith",
                    "gender": "male",
                    "edges": {
                        "union-1": { "rel": "child" },
                        "union-2": { "rel": "partner" },
                        "union-3": { "rel": "child", "rel_modifier": "adopt" }
                    }
                },
                "union-1": {
                    "id": "union-1",
                    "status": "spouse",
                    "edges": {
                        "profile-10": { "rel": "partner" },
                        "profile-11": { "rel": "partner" },
                        "profile-20": { "rel": "child" }
                    }
                },
                "union-2": {
                    "id": "union-2",
                    "edges": {
                        "profile-20": { "rel": "partner" },
                        "profile-21": { "rel": "partner" },
                        "profile-31": { "rel": "child" },
                        "profile-30": { "rel": "child" },
                        "profile-32": { "rel": "child", "rel_modifier": "step" }
                    }
                },
                "union-3": {
                    "id": "union-3",
                    "edges": {
                        "profile-12": { "rel": "partner" },
                        "profile-20": { "rel": "child", "rel_modifier": "adopt" }
                    }
                },
                "profile-10": { "id": "profile-10", "name": "William Smith", "gender": "male" },
                "profile-11": { "id": "profile-11", "name": "Mary Jones", "gender": "female" },
                "profile-12": { "id": "profile-12", "name": "Adoptive Father", "gender": "male" },
                "profile-21": { "id": "profile-21", "name": "Anne Brown", "gender": "female" },
                "profile-30": { "id": "profile-30", "name": "James Smith", "gender": "male" },
                "profile-31": { "id": "profile-31", "name": "Ellen Smith", "gender": "female" },
                "profile-32": { "id": "profile-32", "name": "Step Son", "gender": "male" }
            }
        })
    }

    #[test]
    fn parse_family_picks_biological_parents_and_children() {
        let listing = parse_family(&sample_payload(), "20").unwrap();

        assert_eq!(listing.focus.id, "profile-20");
        assert_eq!(listing.focus.birth_date.as_deref(), Some("1850"));
        assert_eq!(listing.father.as_ref().map(|p| p.id.as_str()), Some("profile-10"));
        assert_eq!(listing.mother.as_ref().map(|p| p.id.as_str()), Some("profile-11"));
        assert_eq!(
            listing.spouses.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            vec!["profile-21"]
        );
        assert_eq!(
            listing.children.iter().map(|p| p.id.as_str()).collect::<Vec<_>>(),
            vec!["profile-31", "profile-30"]
        );
        let sons: Vec<&str> = listing.sons().map(|(_, son)| son.id.as_str()).collect();
        assert_eq!(sons, vec!["profile-30"]);
        assert_eq!(listing.unions.len(), 3);
        assert_eq!(listing.unions[0].status.as_deref(), Some("spouse"));
        assert_eq!(listing.unions[0].child_ids, vec!["profile-20".to_string()]);
        assert_eq!(
            listing.unions[1].child_ids,
            vec!["profile-31".to_string(), "profile-30".to_string()]
        );
        assert!(listing.unions[2].child_ids.is_empty());
    }

    #[test]
    fn parse_family_without_focus_is_invalid() {
        let err = parse_family(&json!({ "nodes": {} }), "profile-1").unwrap_err();
        assert!(matches!(err, RemoteError::InvalidResponse(_)));
    }

    #[test]
    fn parse_family_accepts_a_focus_without_nodes() {
        let listing = parse_family(
            &json!({ "focus": { "id": "profile-5", "display_name": "Solo", "gender": "male" } }),
            "5",
        )
        .unwrap();
        assert_eq!(listing.focus.label(), "Solo");
        assert!(listing.father.is_none());
        assert!(listing.children.is_empty());
    }

    #[test]
    fn api_ids_get_the_profile_prefix() {
        assert_eq!(api_profile_id("123"), "profile-123");
        assert_eq!(api_profile_id("profile-123"), "profile-123");
    }

    #[test]
    fn authorization_url_encodes_the_redirect_uri() {
        let dir = tempfile::tempdir().unwrap();
        let client = GeniClient::new(GeniClientConfig {
            base_url: "https://www.geni.com/".to_string(),
            client_id: Some("app 7".to_string()),
            client_secret: None,
            redirect_uri: "http://localhost:8080/cb?x=1".to_string(),
            token_file: dir.path().join("token.json"),
            access_token: None,
            timeout: Duration::from_secs(5),
        })
        .unwrap();

        assert_eq!(
            client.authorization_url().unwrap(),
            "https://www.geni.com/oauth/authorize?client_id=app+7\
             &redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fcb%3Fx%3D1&response_type=code"
        );
    }

    #[test]
    fn token_file_round_trips_and_missing_file_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("token.json");
        assert_eq!(load_token(&path).unwrap(), None);

        let token = StoredToken {
            access_token: "abc".to_string(),
            refresh_token: Some("def".to_string()),
            expires_at: 10.0,
        };
        save_token(&path, &token).unwrap();
        assert_eq!(load_token(&path).unwrap(), Some(token.clone()));
        assert!(token.is_expired(10.0));
        assert!(!token.is_expired(9.0));
    }
}
