//! Operator-facing outputs of an applied stack.
//!
//! Only identifiers and addresses. Secret values are never included; an
//! operator retrieves them from the credential store by `*_secret_id`.

use std::collections::BTreeMap;

use serde::Serialize;

use tierform_core::topology::{
    ADMIN_USER, APP_ADMIN_CREDENTIALS, DATABASE, DB_CREDENTIALS, FILE_SYSTEM, LOAD_BALANCER,
    USER_POOL, USER_POOL_CLIENT, USER_POOL_DOMAIN,
};
use tierform_state::{ResourceRecord, StateResult, StateStore};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StackOutputs {
    pub entry_point_url: Option<String>,
    pub admin_username: Option<String>,
    pub admin_credentials_secret_id: Option<String>,
    pub db_credentials_secret_id: Option<String>,
    pub database_endpoint: Option<String>,
    pub file_system_id: Option<String>,
    pub user_pool_id: Option<String>,
    pub user_pool_client_id: Option<String>,
    pub login_domain: Option<String>,
}

impl StackOutputs {
    /// Collect outputs from ready records. Missing or unready resources
    /// leave their fields empty.
    pub fn from_records(records: &[ResourceRecord]) -> Self {
        let ready: BTreeMap<&str, &BTreeMap<String, String>> = records
            .iter()
            .filter(|r| r.is_ready())
            .map(|r| (r.name.as_str(), &r.outputs))
            .collect();
        let get = |resource: &str, attribute: &str| {
            ready.get(resource).and_then(|o| o.get(attribute)).cloned()
        };

        let database_endpoint = get(DATABASE, "endpoint")
            .map(|host| match get(DATABASE, "port") {
                Some(port) => format!("{host}:{port}"),
                None => host,
            });

        StackOutputs {
            entry_point_url: get(LOAD_BALANCER, "dns_name").map(|dns| format!("https://{dns}")),
            admin_username: get(ADMIN_USER, "username"),
            admin_credentials_secret_id: get(APP_ADMIN_CREDENTIALS, "secret_id"),
            db_credentials_secret_id: get(DB_CREDENTIALS, "secret_id"),
            database_endpoint,
            file_system_id: get(FILE_SYSTEM, "file_system_id"),
            user_pool_id: get(USER_POOL, "user_pool_id"),
            user_pool_client_id: get(USER_POOL_CLIENT, "client_id"),
            login_domain: get(USER_POOL_DOMAIN, "domain"),
        }
    }

    pub fn load(state: &StateStore) -> StateResult<Self> {
        Ok(Self::from_records(&state.list_resources()?))
    }

    /// `(label, value)` pairs for table output.
    pub fn entries(&self) -> Vec<(&'static str, Option<&str>)> {
        vec![
            ("entry_point_url", self.entry_point_url.as_deref()),
            ("admin_username", self.admin_username.as_deref()),
            ("admin_credentials_secret_id", self.admin_credentials_secret_id.as_deref()),
            ("db_credentials_secret_id", self.db_credentials_secret_id.as_deref()),
            ("database_endpoint", self.database_endpoint.as_deref()),
            ("file_system_id", self.file_system_id.as_deref()),
            ("user_pool_id", self.user_pool_id.as_deref()),
            ("user_pool_client_id", self.user_pool_client_id.as_deref()),
            ("login_domain", self.login_domain.as_deref()),
        ]
    }
}
