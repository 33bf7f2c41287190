//! # Provider Parameters
//!
//! Assembles the parameter blob sent to the provider in the mount request.
//! This mimics the parameters the CSI driver would send for a pod mount.

use std::collections::BTreeMap;

use crate::constants::{
    CSI_POD_NAME, CSI_POD_NAMESPACE, CSI_POD_SERVICE_ACCOUNT_NAME, CSI_POD_UID,
    UNKNOWN_POD_IDENTITY,
};

/// Merge provider-class parameters, synthetic pod identity attributes, and
/// token attributes into the JSON parameter string the provider expects.
///
/// Pod name and UID are fixed placeholders: there is no pod behind this
/// mount, and the contract documents that limitation rather than inventing
/// an identity. Token attributes are merged last and overwrite any class
/// parameter with the same key.
pub fn assemble(
    class_parameters: Option<&BTreeMap<String, String>>,
    namespace: &str,
    service_account_name: &str,
    token_attributes: &BTreeMap<String, String>,
) -> Result<String, serde_json::Error> {
    let mut parameters = class_parameters.cloned().unwrap_or_default();

    parameters.insert(CSI_POD_NAME.to_string(), UNKNOWN_POD_IDENTITY.to_string());
    parameters.insert(CSI_POD_NAMESPACE.to_string(), namespace.to_string());
    parameters.insert(CSI_POD_UID.to_string(), UNKNOWN_POD_IDENTITY.to_string());
    parameters.insert(
        CSI_POD_SERVICE_ACCOUNT_NAME.to_string(),
        service_account_name.to_string(),
    );

    for (key, value) in token_attributes {
        parameters.insert(key.clone(), value.clone());
    }

    serde_json::to_string(&parameters)
}
