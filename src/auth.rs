//! Permission checks from the caller's bearer token.
//!
//! The API Gateway authorizer has already verified the token signature, so the claims are
//! read without validation. These checks reject early; the table policies stay authoritative.

use std::collections::BTreeSet;

use base64::{Engine as _, engine::general_purpose};
use lambda_http::Request;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Permission {
    ReadTickets,
    CreateTickets,
    UpdateTickets,
    AcceptTickets,
    UploadImages,
    ReadAssignees,
    SubmitInventory,
}

impl Permission {
    const ALL: [Permission; 7] = [
        Permission::ReadTickets,
        Permission::CreateTickets,
        Permission::UpdateTickets,
        Permission::AcceptTickets,
        Permission::UploadImages,
        Permission::ReadAssignees,
        Permission::SubmitInventory,
    ];

    pub fn code(self) -> &'static str {
        match self {
            Permission::ReadTickets => "tickets:read",
            Permission::CreateTickets => "tickets:create",
            Permission::UpdateTickets => "tickets:update",
            Permission::AcceptTickets => "tickets:accept",
            Permission::UploadImages => "tickets:images",
            Permission::ReadAssignees => "assignees:read",
            Permission::SubmitInventory => "inventory:submit",
        }
    }

    pub fn from_code(code: &str) -> Option<Permission> {
        Self::ALL.into_iter().find(|p| p.code() == code)
    }
}

/// Permissions granted by each role group.
fn role_permissions(role: &str) -> &'static [Permission] {
    match role {
        "Admin" => &Permission::ALL,
        "Supervisor" => &[
            Permission::ReadTickets,
            Permission::CreateTickets,
            Permission::UpdateTickets,
            Permission::AcceptTickets,
            Permission::UploadImages,
            Permission::ReadAssignees,
        ],
        "Tecnico" => &[
            Permission::ReadTickets,
            Permission::UpdateTickets,
            Permission::UploadImages,
            Permission::ReadAssignees,
            Permission::SubmitInventory,
        ],
        "Solicitante" => &[Permission::ReadTickets, Permission::CreateTickets, Permission::UploadImages],
        _ => &[],
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PermissionSet(BTreeSet<Permission>);

impl PermissionSet {
    /// Explicit `permissions` codes plus whatever the `cognito:groups` roles grant.
    /// Unknown codes and roles grant nothing.
    pub fn from_claims(claims: &Value) -> Self {
        let mut set = BTreeSet::new();
        if let Some(codes) = claims.get("permissions") {
            set.extend(parse_list_value(codes).iter().filter_map(|c| Permission::from_code(c)));
        }
        if let Some(groups) = claims.get("cognito:groups") {
            for group in parse_list_value(groups) {
                set.extend(role_permissions(&group).iter().copied());
            }
        }
        PermissionSet(set)
    }

    pub fn from_event(event: &Request) -> Self {
        bearer_claims(event).map(|c| Self::from_claims(&c)).unwrap_or_default()
    }

    pub fn allows(&self, permission: Permission) -> bool {
        self.0.contains(&permission)
    }

    pub fn codes(&self) -> Vec<&'static str> {
        self.0.iter().map(|p| p.code()).collect()
    }
}

fn bearer_claims(event: &Request) -> Option<Value> {
    let auth_str = event.headers().get("Authorization").and_then(|h| h.to_str().ok())?;
    let token = auth_str.strip_prefix("Bearer ").unwrap_or(auth_str);
    parse_jwt_payload(token)
}

/// Caller's display name for log lines.
pub fn get_given_name_from_event(event: &Request) -> Option<String> {
    let claims = bearer_claims(event)?;
    claims
        .get("given_name")
        .or(claims.get("cognito:username"))
        .or(claims.get("username"))
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
}

/// Comma-separated string or JSON array of strings.
fn parse_list_value(value: &Value) -> Vec<String> {
    if let Some(s) = value.as_str() {
        return s
            .split(',')
            .map(|g| g.trim().to_string())
            .filter(|g| !g.is_empty())
            .collect();
    }
    value
        .as_array()
        .map(|items| items.iter().filter_map(|g| g.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default()
}

/// Decodes the JWT payload segment (no signature check).
fn parse_jwt_payload(token: &str) -> Option<Value> {
    let parts: Vec<&str> = token.split('.').collect();
    if parts.len() != 3 {
        return None;
    }

    let payload_part = parts[1];
    let padding = match payload_part.len() % 4 {
        2 => "==",
        3 => "=",
        _ => "",
    };
    let padded_payload = format!("{}{}", payload_part, padding);

    general_purpose::URL_SAFE_NO_PAD
        .decode(payload_part)
        .or_else(|_| general_purpose::URL_SAFE.decode(&padded_payload))
        .ok()
        .and_then(|decoded| serde_json::from_slice(&decoded).ok())
}
