//! Ahead-of-time artifacts and the `_encap_` unit attributes that carry them.
//!
//! Attributes on an execution unit prefixed with `_encap_` are either AOT
//! entries or backend options:
//!
//! * `_encap_aot_requested` set to `"1"` switches the unit to AOT mode.
//! * `_encap_aot_exec_<signature>` holds a base64 serialized executable.
//! * `_encap_aot_function_<signature>` holds the JSON of the source function.
//! * any other `_encap_<key>` is forwarded to the backend as option `<key>`.

use std::collections::BTreeMap;

use base64::Engine;

use crate::backend::BackendOptions;
use crate::error::{ExecutorError, ExecutorResult};
use crate::function::Function;
use crate::signature::Signature;

pub const ATTR_PREFIX: &str = "_encap_";
pub const AOT_PREFIX: &str = "_encap_aot_";
pub const AOT_REQUESTED_ATTR: &str = "_encap_aot_requested";
pub const AOT_EXEC_PREFIX: &str = "_encap_aot_exec_";
pub const AOT_FUNCTION_PREFIX: &str = "_encap_aot_function_";

/// Precompiled executables and functions keyed by signature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AotTable {
    executables: BTreeMap<Signature, Vec<u8>>,
    functions: BTreeMap<Signature, String>,
}

impl AotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_executable(&mut self, signature: Signature, serialized: Vec<u8>) {
        self.executables.insert(signature, serialized);
    }

    pub fn insert_function(&mut self, signature: Signature, function: &Function) -> ExecutorResult<()> {
        self.functions.insert(signature, function.to_json()?);
        Ok(())
    }

    pub fn executable(&self, signature: &Signature) -> Option<&[u8]> {
        self.executables.get(signature).map(Vec::as_slice)
    }

    /// Deserialized function for `signature`, if one was supplied.
    pub fn function(&self, signature: &Signature) -> Option<ExecutorResult<Function>> {
        self.functions.get(signature).map(|text| Function::from_json(text))
    }

    pub fn is_empty(&self) -> bool {
        self.executables.is_empty() && self.functions.is_empty()
    }

    /// Renders the table back into unit attributes, including the request flag.
    pub fn to_attributes(&self) -> BTreeMap<String, String> {
        let mut attrs = BTreeMap::new();
        attrs.insert(AOT_REQUESTED_ATTR.to_string(), "1".to_string());
        for (signature, bytes) in &self.executables {
            attrs.insert(
                format!("{AOT_EXEC_PREFIX}{signature}"),
                base64::engine::general_purpose::STANDARD.encode(bytes),
            );
        }
        for (signature, text) in &self.functions {
            attrs.insert(format!("{AOT_FUNCTION_PREFIX}{signature}"), text.clone());
        }
        attrs
    }
}

/// Unit attributes split into the AOT table and backend options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UnitAttributes {
    pub aot: Option<AotTable>,
    pub backend_options: BackendOptions,
}

pub fn parse_unit_attributes(
    unit: &str,
    attrs: &BTreeMap<String, String>,
) -> ExecutorResult<UnitAttributes> {
    let mut table = AotTable::new();
    let mut requested = false;
    let mut backend_options = BackendOptions::new();

    for (name, value) in attrs {
        if !name.starts_with(ATTR_PREFIX) {
            continue;
        }
        if name.starts_with(AOT_PREFIX) {
            if let Some(signature) = name.strip_prefix(AOT_EXEC_PREFIX) {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(value.as_bytes())
                    .map_err(|err| {
                        ExecutorError::config(format!(
                            "AOT executable for signature '{signature}' is not valid base64: {err}"
                        ))
                    })?;
                table.insert_executable(Signature::from(signature), bytes);
            } else if let Some(signature) = name.strip_prefix(AOT_FUNCTION_PREFIX) {
                table
                    .functions
                    .insert(Signature::from(signature), value.clone());
            } else if name == AOT_REQUESTED_ATTR {
                requested = value == "1";
                if requested {
                    tracing::info!(unit, "using AOT for {unit}");
                }
            } else {
                return Err(ExecutorError::config(format!(
                    "attributes beginning with {AOT_PREFIX} must be \
                     {AOT_EXEC_PREFIX}<signature> or {AOT_FUNCTION_PREFIX}<signature>, but got {name}"
                )));
            }
            continue;
        }
        let key = &name[ATTR_PREFIX.len()..];
        tracing::debug!(unit, attribute = key, value = %value, "backend option");
        backend_options.insert(key.to_string(), value.clone());
    }

    if !table.is_empty() && !requested {
        return Err(ExecutorError::config(format!(
            "unit {unit} has functions or executables embedded in it, even though AOT was not requested"
        )));
    }

    Ok(UnitAttributes {
        aot: requested.then_some(table),
        backend_options,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn attrs(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn splits_aot_entries_and_backend_options() {
        let parsed = parse_unit_attributes(
            "cluster_0",
            &attrs(&[
                ("_encap_aot_requested", "1"),
                ("_encap_aot_exec_2,;/", "AQID"),
                ("_encap_ice_cores", "4"),
                ("unrelated", "x"),
            ]),
        )
        .unwrap();
        let table = parsed.aot.unwrap();
        assert_eq!(table.executable(&Signature::from("2,;/")), Some(&[1u8, 2, 3][..]));
        assert_eq!(parsed.backend_options.get("ice_cores").map(String::as_str), Some("4"));
        assert_eq!(parsed.backend_options.len(), 1);
    }

    #[test]
    fn unknown_aot_attribute_is_rejected() {
        let err = parse_unit_attributes("cluster_0", &attrs(&[("_encap_aot_bogus", "1")]));
        assert!(matches!(err, Err(ExecutorError::ConfigInvalid(_))));
    }

    #[test]
    fn entries_without_request_are_rejected() {
        let err = parse_unit_attributes(
            "cluster_0",
            &attrs(&[("_encap_aot_function_;/", "{}")]),
        );
        assert!(matches!(err, Err(ExecutorError::ConfigInvalid(_))));
    }

    #[test]
    fn table_round_trips_through_attributes() {
        let mut table = AotTable::new();
        table.insert_executable(Signature::from("3,;/"), vec![9, 8, 7]);
        let parsed = parse_unit_attributes("cluster_1", &table.to_attributes()).unwrap();
        assert_eq!(parsed.aot, Some(table));
    }
}
