//! Role classification and selection
//!
//! Roles arrive from the upstream userinfo endpoint as `nhsid_nrbac_roles`.
//! A role grants access when its role code (the last `:`-separated segment of
//! `role_code`, e.g. `R8000`) is listed in the configured access codes, or
//! when no access codes are configured.

use crate::error::BrokerError;
use crate::model::RoleDetails;
use crate::store::SessionDirectory;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
struct UserInfo {
    #[serde(default)]
    nhsid_nrbac_roles: Vec<NrbacRole>,
    #[serde(default)]
    nhsid_user_orgs: Vec<UserOrg>,
}

#[derive(Debug, Deserialize)]
struct NrbacRole {
    person_roleid: String,
    #[serde(default)]
    role_name: Option<String>,
    #[serde(default)]
    role_code: Option<String>,
    #[serde(default)]
    org_code: Option<String>,
}

#[derive(Debug, Deserialize)]
struct UserOrg {
    org_code: String,
    #[serde(default)]
    org_name: Option<String>,
}

/// Extract the user's roles from a userinfo response
pub fn roles_from_userinfo(userinfo: &serde_json::Value) -> Result<Vec<RoleDetails>, BrokerError> {
    let info = UserInfo::deserialize(userinfo)
        .map_err(|e| BrokerError::Upstream(format!("malformed userinfo: {}", e)))?;

    Ok(info
        .nhsid_nrbac_roles
        .into_iter()
        .map(|role| {
            let org_name = role.org_code.as_ref().and_then(|code| {
                info.nhsid_user_orgs
                    .iter()
                    .find(|org| &org.org_code == code)
                    .and_then(|org| org.org_name.clone())
            });
            RoleDetails {
                role_id: role.person_roleid,
                role_name: role.role_name,
                role_code: role.role_code,
                org_code: role.org_code,
                org_name,
            }
        })
        .collect())
}

fn role_code_suffix(role: &RoleDetails) -> Option<&str> {
    role.role_code
        .as_deref()
        .and_then(|code| code.rsplit(':').next())
        .filter(|code| !code.is_empty())
}

/// Split roles into `(with_access, without_access)`
pub fn classify(
    roles: Vec<RoleDetails>,
    access_codes: &[String],
) -> (Vec<RoleDetails>, Vec<RoleDetails>) {
    if access_codes.is_empty() {
        return (roles, Vec::new());
    }
    roles.into_iter().partition(|role| {
        role_code_suffix(role).is_some_and(|code| access_codes.iter().any(|c| c == code))
    })
}

/// Changes the role a signed-in user acts under
pub struct RoleSelector {
    directory: Arc<dyn SessionDirectory>,
}

impl RoleSelector {
    pub fn new(directory: Arc<dyn SessionDirectory>) -> Self {
        Self { directory }
    }

    /// Make `role_id` the user's selected role
    ///
    /// The role must be one of the user's roles with access.
    #[tracing::instrument(name = "broker.select_role", skip(self, username), err)]
    pub async fn select(&self, username: &str, role_id: &str) -> Result<RoleDetails, BrokerError> {
        let mut record = self
            .directory
            .get_identity(username)
            .await?
            .ok_or_else(|| BrokerError::InvalidRole(role_id.to_string()))?;

        let role = record
            .roles_with_access
            .iter()
            .find(|role| role.role_id == role_id)
            .cloned()
            .ok_or_else(|| BrokerError::InvalidRole(role_id.to_string()))?;

        record.currently_selected_role = Some(role.clone());
        self.directory.put_identity(&record).await?;

        Ok(role)
    }
}
