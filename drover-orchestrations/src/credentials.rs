//! Connection parameters handed to the remote execution channel
//!
//! Mutual TLS replaces password authentication: the server certificate is
//! verified against the mounted CA and the client authenticates with the
//! minted certificate.

use std::collections::BTreeMap;

use crate::resources::DatabaseCluster;

pub const SSL_MODE: &str = "verify-full";
pub const REQUIRE_AUTH: &str = "none";

/// CNPG superuser the client certificate is minted for
pub const DATABASE_USER: &str = "postgres";

/// File names inside the mounted certificate secrets
pub const CA_FILE: &str = "ca.crt";
pub const CERT_FILE: &str = "tls.crt";
pub const KEY_FILE: &str = "tls.key";

/// Mount points of one action inside the helper pod
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountPaths {
    pub data: String,
    pub serving_cert: String,
    pub client_cert: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialBundle {
    pub username: String,
    pub host: String,
    pub root_ca_path: String,
    pub cert_path: String,
    pub key_path: String,
    pub ssl_mode: &'static str,
    pub require_auth: &'static str,
}

impl CredentialBundle {
    pub fn assemble(cluster: &DatabaseCluster, username: &str, mounts: &MountPaths) -> Self {
        Self {
            username: username.to_string(),
            host: cluster.write_host(),
            root_ca_path: join_path(&mounts.serving_cert, CA_FILE),
            cert_path: join_path(&mounts.client_cert, CERT_FILE),
            key_path: join_path(&mounts.client_cert, KEY_FILE),
            ssl_mode: SSL_MODE,
            require_auth: REQUIRE_AUTH,
        }
    }

    /// libpq environment variables
    pub fn to_env(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            ("PGUSER".to_string(), self.username.clone()),
            ("PGHOST".to_string(), self.host.clone()),
            ("PGSSLROOTCERT".to_string(), self.root_ca_path.clone()),
            ("PGSSLCERT".to_string(), self.cert_path.clone()),
            ("PGSSLKEY".to_string(), self.key_path.clone()),
            ("PGSSLMODE".to_string(), self.ssl_mode.to_string()),
            ("PGREQUIREAUTH".to_string(), self.require_auth.to_string()),
        ])
    }
}

/// Join a relative path onto a mount point without doubling separators
pub fn join_path(base: &str, relative: &str) -> String {
    let base = base.trim_end_matches('/');
    let relative = relative.trim_start_matches("./").trim_start_matches('/');
    format!("{}/{}", base, relative)
}
