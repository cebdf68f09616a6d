//! VolumeReplicationClass parameter handling
//!
//! Keys under the reserved prefix configure the controller itself (currently
//! the coordinates of the replication secret) and are never forwarded to the
//! driver.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Secret;

use crate::error::{Error, Result};

/// Prefix reserved for controller parameters
pub const REPLICATION_PARAMETER_PREFIX: &str = "replication.storage.openshift.io/";

/// Name of the secret passed to the driver
pub const SECRET_NAME_KEY: &str = "replication.storage.openshift.io/replication-secret-name";

/// Namespace of the secret passed to the driver
pub const SECRET_NAMESPACE_KEY: &str =
    "replication.storage.openshift.io/replication-secret-namespace";

const RECOGNISED_KEYS: &[&str] = &[SECRET_NAME_KEY, SECRET_NAMESPACE_KEY];

/// Reject reserved keys the controller does not understand
pub fn validate_prefixed_parameters(parameters: &BTreeMap<String, String>) -> Result<()> {
    for key in parameters.keys() {
        if key.starts_with(REPLICATION_PARAMETER_PREFIX) && !RECOGNISED_KEYS.contains(&key.as_str())
        {
            return Err(Error::Validation(format!(
                "invalid parameter key {:?} in VolumeReplicationClass",
                key
            )));
        }
    }
    Ok(())
}

/// Parameters forwarded to the driver, with reserved keys removed
pub fn driver_parameters(parameters: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    parameters
        .iter()
        .filter(|(k, _)| !k.starts_with(REPLICATION_PARAMETER_PREFIX))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

/// Where to read the replication secret from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretReference {
    pub name: String,
    pub namespace: String,
}

/// Secret coordinates, present only when both name and namespace are set
pub fn secret_reference(parameters: &BTreeMap<String, String>) -> Option<SecretReference> {
    let name = parameters.get(SECRET_NAME_KEY).filter(|v| !v.is_empty())?;
    let namespace = parameters
        .get(SECRET_NAMESPACE_KEY)
        .filter(|v| !v.is_empty())?;
    Some(SecretReference {
        name: name.clone(),
        namespace: namespace.clone(),
    })
}

/// Flatten a Secret into the string map sent to the driver
pub fn secret_data(secret: &Secret) -> BTreeMap<String, String> {
    let mut data: BTreeMap<String, String> = secret
        .data
        .iter()
        .flatten()
        .map(|(k, v)| (k.clone(), String::from_utf8_lossy(&v.0).into_owned()))
        .collect();
    // stringData is write-only on a real API server, but honour it when present
    for (k, v) in secret.string_data.iter().flatten() {
        data.entry(k.clone()).or_insert_with(|| v.clone());
    }
    data
}
