//! `${resource.attribute}` references inside property values.
//!
//! A reference is both an implicit dependency edge and a value that is
//! substituted once the referenced resource reports ready outputs.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::LazyLock;

use regex::Regex;
use thiserror::Error;

static REFERENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z0-9_-]+)\.([A-Za-z0-9_]+)\}").expect("reference pattern compiles")
});

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RefError {
    /// The referenced resource has no ready outputs yet.
    #[error("{reference} is not resolvable yet: {resource} has no ready outputs")]
    Unready { reference: String, resource: String },
    #[error("{reference}: {resource} exposes no attribute {attribute}")]
    MissingAttribute {
        reference: String,
        resource: String,
        attribute: String,
    },
}

/// One parsed `${resource.attribute}` occurrence.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttrRef {
    pub resource: String,
    pub attribute: String,
}

impl fmt::Display for AttrRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${{{}.{}}}", self.resource, self.attribute)
    }
}

/// Every reference in a property value, in order of appearance.
pub fn references(value: &str) -> Vec<AttrRef> {
    REFERENCE
        .captures_iter(value)
        .map(|caps| AttrRef {
            resource: caps[1].to_string(),
            attribute: caps[2].to_string(),
        })
        .collect()
}

/// Substitute every reference using the ready outputs of other resources.
pub fn interpolate(
    value: &str,
    outputs: &BTreeMap<String, BTreeMap<String, String>>,
) -> Result<String, RefError> {
    let mut result = String::with_capacity(value.len());
    let mut last = 0;
    for caps in REFERENCE.captures_iter(value) {
        let Some(whole) = caps.get(0) else { continue };
        let reference = AttrRef {
            resource: caps[1].to_string(),
            attribute: caps[2].to_string(),
        };
        let attrs = outputs.get(&reference.resource).ok_or_else(|| RefError::Unready {
            reference: reference.to_string(),
            resource: reference.resource.clone(),
        })?;
        let resolved = attrs
            .get(&reference.attribute)
            .ok_or_else(|| RefError::MissingAttribute {
                reference: reference.to_string(),
                resource: reference.resource.clone(),
                attribute: reference.attribute.clone(),
            })?;
        result.push_str(&value[last..whole.start()]);
        result.push_str(resolved);
        last = whole.end();
    }
    result.push_str(&value[last..]);
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs() -> BTreeMap<String, BTreeMap<String, String>> {
        let mut db = BTreeMap::new();
        db.insert("endpoint".to_string(), "db.internal".to_string());
        db.insert("port".to_string(), "5432".to_string());
        let mut all = BTreeMap::new();
        all.insert("database".to_string(), db);
        all
    }

    #[test]
    fn finds_all_references() {
        let refs = references("postgres://${database.endpoint}:${database.port}/${schema.name}");
        assert_eq!(refs.len(), 3);
        assert_eq!(refs[0].resource, "database");
        assert_eq!(refs[0].attribute, "endpoint");
        assert_eq!(refs[2].to_string(), "${schema.name}");
    }

    #[test]
    fn plain_values_have_no_references() {
        assert!(references("5432").is_empty());
        assert!(references("${incomplete").is_empty());
    }

    #[test]
    fn interpolates_ready_outputs() {
        let value = interpolate("${database.endpoint}:${database.port}", &outputs()).unwrap();
        assert_eq!(value, "db.internal:5432");
    }

    #[test]
    fn interpolation_of_unready_resource_fails() {
        let err = interpolate("${volume.file_system_id}", &outputs()).unwrap_err();
        assert!(matches!(err, RefError::Unready { ref resource, .. } if resource == "volume"));
    }

    #[test]
    fn interpolation_of_missing_attribute_fails() {
        let err = interpolate("${database.password}", &outputs()).unwrap_err();
        assert!(matches!(err, RefError::MissingAttribute { ref attribute, .. } if attribute == "password"));
    }
}
