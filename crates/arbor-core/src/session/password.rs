//! Forced password changes over a side transport.

use serde_json::Value;
use tracing::{debug, info};

use super::SESSION_TARGET;
use crate::driver::{ConnectionTarget, Credentials, Driver, Params, QueryOptions};
use crate::errors::{ErrorKind, ErrorPayload};

const ALTER_CURRENT_USER: &str = "ALTER CURRENT USER SET PASSWORD FROM $oldPw TO $newPw";
const LEGACY_CHANGE_PASSWORD: &str = "CALL dbms.security.changePassword($password)";
const SYSTEM_DATABASE: &str = "system";

/// A password change requested for an account, typically one whose password
/// has expired.
#[derive(Clone, PartialEq, Eq)]
pub struct PasswordChange {
    /// Server address.
    pub host: String,
    /// Account name.
    pub username: String,
    /// Password currently set.
    pub current_password: String,
    /// Password to set.
    pub new_password: String,
    /// Require an encrypted transport.
    pub encrypted: bool,
}

impl std::fmt::Debug for PasswordChange {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("PasswordChange")
            .field("host", &self.host)
            .field("username", &self.username)
            .field("encrypted", &self.encrypted)
            .finish_non_exhaustive()
    }
}

/// Which statement changed the password.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PasswordChangeMethod {
    /// `ALTER CURRENT USER` against the `system` database.
    InBand,
    /// The legacy procedure, used when the server lacks multi-database
    /// support.
    Legacy,
}

impl PasswordChange {
    fn target(&self, database: Option<&str>) -> ConnectionTarget {
        ConnectionTarget {
            host: self.host.clone(),
            credentials: Credentials::basic(&self.username, &self.current_password),
            encrypted: self.encrypted,
            database: database.map(str::to_owned),
        }
    }
}

/// Changes the password, falling back to the legacy procedure exactly once
/// when the server reports missing multi-database support.
///
/// # Errors
///
/// Returns the in-band failure when it is not a capability problem, or a
/// [`ErrorKind::Capability`] payload when the fallback fails too.
pub async fn change_password(
    driver: &dyn Driver,
    request: &PasswordChange,
    app: &str,
) -> Result<PasswordChangeMethod, ErrorPayload> {
    let mut params = Params::new();
    params.insert("oldPw".to_owned(), Value::String(request.current_password.clone()));
    params.insert("newPw".to_owned(), Value::String(request.new_password.clone()));
    let options = QueryOptions::system(app, Some(SYSTEM_DATABASE.to_owned()));

    let in_band = driver
        .run_isolated(
            &request.target(Some(SYSTEM_DATABASE)),
            ALTER_CURRENT_USER,
            &params,
            &options,
        )
        .await;
    let error = match in_band {
        Ok(_) => {
            info!(target: SESSION_TARGET, username = %request.username, "password changed");
            return Ok(PasswordChangeMethod::InBand);
        }
        Err(error) if error.is_multi_database_unsupported() => error,
        Err(error) => return Err(error.to_payload()),
    };

    debug!(
        target: SESSION_TARGET,
        %error,
        "server lacks multi-database support, using legacy password procedure"
    );
    let mut params = Params::new();
    params.insert("password".to_owned(), Value::String(request.new_password.clone()));
    let options = QueryOptions::system(app, None);
    driver
        .run_isolated(&request.target(None), LEGACY_CHANGE_PASSWORD, &params, &options)
        .await
        .map(|_| PasswordChangeMethod::Legacy)
        .map_err(|fallback| {
            let payload = ErrorPayload::new(
                ErrorKind::Capability,
                format!("password change failed: {fallback}"),
            );
            match fallback.code() {
                Some(code) => payload.with_code(code),
                None => payload,
            }
        })
}
